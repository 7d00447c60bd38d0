//! ## Session
//!
//! One connected instrument. Every transport access goes through a single gate; checked
//! transactions wait for the instrument to report completion before touching the wire and
//! drain its error queue afterwards.
//!

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};
use std::thread;
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::coder::{ElementType, Value};
use crate::command::{CommandTable, Effective, Field, Override, Overrides};
use crate::config::SessionConfig;
use crate::dialect::{Completion, Dialect, Scpi};
use crate::error::{Error, QueuedError, Result};
use crate::transport::{default_connector, Connector, Resource, Transport, TransportOptions};

// ==========
// Profile
// ==========

/// ### Profile
///
/// An instrument family: its name, the prefix its identification string starts with,
/// dialect, command table, how to open it and what to send before letting go of it.
///
#[derive(Clone)]
pub struct Profile {
    name: String,
    id_prefix: String,
    dialect: Arc<dyn Dialect>,
    commands: CommandTable,
    connector: Connector,
    shutdown_commands: Vec<String>,
}

impl Profile {
    /// A SCPI profile with no commands, opened through the default connector.
    pub fn new(name: &str, id_prefix: &str) -> Profile {
        Profile {
            name: name.to_string(),
            id_prefix: id_prefix.to_string(),
            dialect: Arc::new(Scpi),
            commands: CommandTable::empty(name),
            connector: default_connector(),
            shutdown_commands: Vec::new(),
        }
    }

    pub fn with_dialect(mut self, dialect: impl Dialect + 'static) -> Self {
        self.dialect = Arc::new(dialect);
        self
    }

    pub fn with_commands(mut self, commands: CommandTable) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_connector<F>(mut self, connector: F) -> Self
    where
        F: Fn(&str, &TransportOptions) -> Result<Box<dyn Transport>> + Send + Sync + 'static,
    {
        self.connector = Arc::new(connector);
        self
    }

    /// Append a command written, best effort, when the session shuts down.
    pub fn with_shutdown_command(mut self, command: &str) -> Self {
        self.shutdown_commands.push(command.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id_prefix(&self) -> &str {
        &self.id_prefix
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("name", &self.name)
            .field("id_prefix", &self.id_prefix)
            .field("dialect", &self.dialect)
            .field("commands", &self.commands.name())
            .field("shutdown_commands", &self.shutdown_commands)
            .finish_non_exhaustive()
    }
}

// ==========
// Session
// ==========

/// ### Health
///
/// Result of a non-blocking status probe.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Another transaction holds the gate
    Busy,
    Ready,
    /// The instrument did not identify itself as the expected model
    Degraded,
}

/// ### Session
///
/// Exclusive owner of one instrument's transport. `Send + Sync`: share it by reference
/// or behind an `Arc`, every transaction is serialized through the gate.
///
pub struct Session {
    profile: Profile,
    config: SessionConfig,
    transport: Mutex<Box<dyn Transport>>,
    identification: RwLock<String>,
    healthy: AtomicBool,
    shut_down: AtomicBool,
    class_overrides: Overrides,
    instance_overrides: RwLock<Overrides>,
    reserved: BTreeSet<String>,
}

impl Session {
    /// ### Open
    ///
    /// Open `resource` and bring the session up: flush stale errors and probe the
    /// identification. A failed or mismatching probe leaves the session degraded but
    /// still usable.
    ///
    pub fn open(profile: Profile, resource: impl Into<Resource>, config: SessionConfig) -> Result<Session> {
        let transport = resource.into().open(&profile.connector, &config.transport)?;
        debug!("{}: using {}", profile.name, transport.describe());

        let reserved = profile.commands.override_namespace();
        let class_overrides = profile.commands.class_overrides().clone();
        let session = Session {
            profile,
            config,
            transport: Mutex::new(transport),
            identification: RwLock::new(String::new()),
            healthy: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            class_overrides,
            instance_overrides: RwLock::new(Overrides::new()),
            reserved,
        };

        let probe = session.transaction(|tx| {
            match tx.flush_errors() {
                Ok(stale) if !stale.is_empty() => {
                    debug!("{}: flushed {} stale errors", session.name(), stale.len())
                }
                Ok(_) => {}
                Err(e) => warn!("{}: could not flush the error queue: {e}", session.name()),
            }
            tx.checked(|tx| tx.identify())
        });
        session.record_probe(probe);

        Ok(session)
    }

    /// Session over an already opened transport with the default configuration.
    pub fn new(profile: Profile, transport: impl Transport + 'static) -> Result<Session> {
        let transport: Box<dyn Transport> = Box::new(transport);
        Session::open(profile, transport, SessionConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Identification string read by the last probe.
    pub fn identification(&self) -> String {
        read_lock(&self.identification).clone()
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn dialect(&self) -> &dyn Dialect {
        self.profile.dialect()
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Transport>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_probe(&self, probe: Result<String>) -> bool {
        let healthy = match probe {
            Ok(idn) if idn.starts_with(&self.profile.id_prefix) => {
                info!("{}: IDN {idn}", self.name());
                info!("Connected to {}", self.name());
                *write_lock(&self.identification) = idn;
                true
            }
            Ok(idn) => {
                warn!(
                    "{}: identification `{idn}` does not start with `{}`",
                    self.name(),
                    self.profile.id_prefix
                );
                *write_lock(&self.identification) = idn;
                false
            }
            Err(e) => {
                warn!("{}: could not retrieve the identification: {e}", self.name());
                false
            }
        };
        self.healthy.store(healthy, Ordering::SeqCst);
        healthy
    }

    // ==========
    // Transactions
    // ==========

    /// ### Transaction
    ///
    /// Hold the gate for the whole of `f`. The primitives of the `Transaction` are
    /// unchecked; use `Transaction::checked` for readiness and error checks.
    ///
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut guard = self.lock();
        if self.is_shut_down() {
            return Err(Error::AlreadyShutDown(self.name().to_string()));
        }
        let mut tx = Transaction {
            session: self,
            transport: &mut **guard,
        };
        f(&mut tx)
    }

    fn checked<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        self.transaction(|tx| tx.checked(f))
    }

    /// Write `command` and read the reply, with readiness and error checks.
    pub fn ask(&self, command: &str) -> Result<String> {
        self.checked(|tx| tx.ask(command))
    }

    /// `ask` without readiness or error checks.
    pub fn ask_unchecked(&self, command: &str) -> Result<String> {
        self.transaction(|tx| tx.ask(command))
    }

    pub fn write(&self, command: &str) -> Result<()> {
        self.checked(|tx| tx.write(command))
    }

    /// Read a pending reply. Gated but unchecked: a completion query would consume the
    /// reply being waited for.
    pub fn read(&self) -> Result<String> {
        self.transaction(|tx| tx.read())
    }

    pub fn read_values(&self, command: &str, separator: &str) -> Result<Vec<Value>> {
        self.checked(|tx| tx.read_values(command, separator))
    }

    pub fn read_binary_values(
        &self,
        command: &str,
        header_bytes: usize,
        element: ElementType,
    ) -> Result<Vec<f64>> {
        self.checked(|tx| tx.read_binary_values(command, header_bytes, element))
    }

    /// Drain the error queue and return what it held.
    pub fn flush_errors(&self) -> Result<Vec<QueuedError>> {
        self.transaction(|tx| tx.flush_errors())
    }

    /// Drain the error queue, failing with `CommunicationError` if it held anything.
    pub fn check_errors(&self) -> Result<()> {
        self.transaction(|tx| tx.check_errors())
    }

    // ==========
    // Commands
    // ==========

    fn resolve(&self, name: &str) -> Result<Effective> {
        if self.reserved.contains(name) {
            return Err(Error::ReservedName(name.to_string()));
        }
        let spec = self
            .profile
            .commands
            .get(name)
            .ok_or_else(|| Error::UnknownCommand(name.to_string()))?;
        let instance = read_lock(&self.instance_overrides);
        Ok(spec.resolve(name, &[&*instance, &self.class_overrides]))
    }

    /// ### Get
    ///
    /// Read a declared command.
    ///
    pub fn get(&self, name: &str) -> Result<Value> {
        let effective = self.resolve(name)?;
        effective.read(name, |command, separator| self.read_values(command, separator))
    }

    pub fn get_as<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        T::try_from(self.get(name)?)
    }

    /// ### Set
    ///
    /// Write a declared command. Nothing is sent when validation or encoding fails.
    ///
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let effective = self.resolve(name)?;
        effective.write(name, value.into(), |command| self.write(command))
    }

    /// ### Configure
    ///
    /// Override one field of a dynamic command for this session only.
    ///
    pub fn configure(&self, command: &str, value: Override) -> Result<()> {
        self.profile.commands.check_override(command, value.field())?;
        debug!("{}: {command} configured with {value:?}", self.name());
        write_lock(&self.instance_overrides).set(command, value);
        Ok(())
    }

    /// Drop this session's override of `field`, returning to the class or declared value.
    pub fn unconfigure(&self, command: &str, field: Field) -> Option<Override> {
        write_lock(&self.instance_overrides).remove(command, field)
    }

    pub fn docs(&self, name: &str) -> Option<String> {
        self.profile.commands.get(name).map(|spec| spec.docs())
    }

    // ==========
    // Base Vocabulary
    // ==========

    /// Identification string, as reported now.
    pub fn id(&self) -> Result<String> {
        self.checked(|tx| tx.identify())
    }

    pub fn complete(&self) -> Result<Completion> {
        self.transaction(|tx| tx.complete())
    }

    /// Installed options, as the instrument reports them.
    pub fn options(&self) -> Result<String> {
        let query = self
            .dialect()
            .options()
            .ok_or(Error::UnsupportedDialect("options query"))?;
        Ok(self.ask(query)?.trim().to_string())
    }

    /// Clear the status registers and error queue.
    pub fn clear(&self) -> Result<()> {
        let command = self
            .dialect()
            .clear_status()
            .ok_or(Error::UnsupportedDialect("clear status"))?;
        self.write(command)
    }

    pub fn reset(&self) -> Result<()> {
        let command = self
            .dialect()
            .reset()
            .ok_or(Error::UnsupportedDialect("reset"))?;
        self.write(command)
    }

    // ==========
    // Status & Shutdown
    // ==========

    /// ### Status
    ///
    /// Never waits for the gate. A degraded session re-probes its identification when
    /// the gate is free, and reports `Busy` when it is not. A shut-down session reports
    /// `Degraded` and is never probed.
    ///
    pub fn status(&self) -> Health {
        let mut guard = match self.transport.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Health::Busy,
        };
        if self.is_shut_down() {
            return Health::Degraded;
        }
        if self.is_healthy() {
            return Health::Ready;
        }

        let mut tx = Transaction {
            session: self,
            transport: &mut **guard,
        };
        let probe = tx.identify();
        drop(guard);

        if self.record_probe(probe) {
            Health::Ready
        } else {
            Health::Degraded
        }
    }

    /// ### Shutdown
    ///
    /// Write the profile's shutdown commands, best effort, and refuse every later
    /// transaction. The flag is claimed under the gate, so only the first caller writes
    /// the commands; later or concurrent calls do nothing.
    ///
    pub fn shutdown(&self) {
        let mut guard = self.lock();
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut tx = Transaction {
            session: self,
            transport: &mut **guard,
        };
        for command in &self.profile.shutdown_commands {
            if let Err(e) = tx.checked(|tx| tx.write(command)) {
                warn!("{}: shutdown command `{command}` failed: {e}", self.name());
            }
        }
        info!("Shutting down {}", self.name());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.profile.name)
            .field("healthy", &self.is_healthy())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

// ==========
// Transaction
// ==========

/// ### Transaction
///
/// The transport of a session while its gate is held. Primitives here never lock, so
/// they compose into one atomic exchange.
///
pub struct Transaction<'a> {
    session: &'a Session,
    transport: &'a mut dyn Transport,
}

impl Transaction<'_> {
    pub fn write(&mut self, command: &str) -> Result<()> {
        debug!("{} <- {command}", self.session.name());
        self.transport.write(command)?;
        Ok(())
    }

    pub fn read(&mut self) -> Result<String> {
        let reply = self.transport.read()?;
        debug!("{} -> {reply}", self.session.name());
        Ok(reply)
    }

    pub fn ask(&mut self, command: &str) -> Result<String> {
        self.write(command)?;
        self.read()
    }

    pub fn read_values(&mut self, command: &str, separator: &str) -> Result<Vec<Value>> {
        debug!("{} <- {command}", self.session.name());
        let values = self.transport.query_values(command, separator)?;
        debug!("{} -> {values:?}", self.session.name());
        Ok(values)
    }

    pub fn read_binary_values(
        &mut self,
        command: &str,
        header_bytes: usize,
        element: ElementType,
    ) -> Result<Vec<f64>> {
        debug!("{} <- {command}", self.session.name());
        let values = self.transport.query_binary(command, header_bytes, element)?;
        debug!("{} -> {} {element:?} values", self.session.name(), values.len());
        Ok(values)
    }

    /// ### Checked
    ///
    /// Wait until ready, run `f`, then drain the error queue.
    ///
    pub fn checked<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.wait_until_ready()?;
        let result = f(self)?;
        self.check_errors()?;
        Ok(result)
    }

    pub fn identify(&mut self) -> Result<String> {
        let session = self.session;
        let query = session
            .dialect()
            .identify()
            .ok_or(Error::UnsupportedDialect("identification query"))?;
        self.ask(query)
    }

    pub fn complete(&mut self) -> Result<Completion> {
        let session = self.session;
        let query = session
            .dialect()
            .operation_complete()
            .ok_or(Error::UnsupportedDialect("operation complete query"))?;
        let reply = self.ask(query)?;
        Ok(session.dialect().parse_completion(&reply))
    }

    /// ### Wait Until Ready
    ///
    /// Poll the completion query until the instrument reports completion. Instruments
    /// without a completion query are always ready.
    ///
    pub fn wait_until_ready(&mut self) -> Result<()> {
        let session = self.session;
        let Some(query) = session.dialect().operation_complete() else {
            return Ok(());
        };
        let timeout = session.config.ready_timeout;

        let started = Instant::now();
        loop {
            let reply = self.ask(query)?;
            if session.dialect().parse_completion(&reply) == Completion::Complete {
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(Error::Timeout(timeout));
            }
            thread::sleep(session.config.poll_interval.min(timeout - elapsed));
        }
    }

    /// ### Flush Errors
    ///
    /// Read the error queue until it reports empty, at most `max_queued_errors` entries.
    ///
    pub fn flush_errors(&mut self) -> Result<Vec<QueuedError>> {
        let session = self.session;
        let Some(query) = session.dialect().error_query() else {
            return Ok(Vec::new());
        };
        self.wait_until_ready()?;

        let mut errors = Vec::new();
        while errors.len() < session.config.max_queued_errors {
            let reply = self.ask(query)?;
            match session.dialect().parse_error(&reply) {
                Some(queued) => {
                    error!("{}: error read from error queue: {queued}", session.name());
                    errors.push(queued);
                }
                None => return Ok(errors),
            }
        }

        warn!(
            "{}: stopped draining the error queue after {} entries",
            session.name(),
            errors.len()
        );
        Ok(errors)
    }

    pub fn check_errors(&mut self) -> Result<()> {
        match Error::from_queue(self.flush_errors()?) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
