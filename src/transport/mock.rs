//! ## Mock Transports
//!
//! In-memory transports for exercising drivers without hardware.
//!
//! - `ProtocolTransport` replays a strict script of `(write, reply)` pairs and fails on
//!   any deviation.
//! - `SimTransport` answers every write through a responder closure and records what
//!   was written.
//!

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, bail, Result};

use super::Transport;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Script {
    steps: VecDeque<(Option<String>, Option<String>)>,
    pending: VecDeque<String>,
}

/// ### Protocol Transport
///
/// Each step is `(expected write, reply)`. A step with a write and a reply answers the
/// next read with the reply; a step without a write is a reply the device sends
/// unprompted. Clones share the same script, so a test can keep a clone to check that
/// the whole script was consumed.
///
#[derive(Debug, Clone, Default)]
pub struct ProtocolTransport {
    script: Arc<Mutex<Script>>,
}

impl ProtocolTransport {
    pub fn new<W, R>(steps: impl IntoIterator<Item = (Option<W>, Option<R>)>) -> Self
    where
        W: Into<String>,
        R: Into<String>,
    {
        let steps = steps
            .into_iter()
            .map(|(w, r)| (w.map(Into::into), r.map(Into::into)))
            .collect();
        ProtocolTransport {
            script: Arc::new(Mutex::new(Script {
                steps,
                pending: VecDeque::new(),
            })),
        }
    }

    /// Number of script steps and unread replies left.
    pub fn remaining(&self) -> usize {
        let script = lock(&self.script);
        script.steps.len() + script.pending.len()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }
}

impl Transport for ProtocolTransport {
    fn write(&mut self, command: &str) -> Result<()> {
        let mut script = lock(&self.script);
        match script.steps.pop_front() {
            Some((Some(expected), reply)) if expected == command => {
                script.pending.extend(reply);
                Ok(())
            }
            Some((expected, reply)) => {
                let found = format!("{expected:?}");
                script.steps.push_front((expected, reply));
                bail!("unexpected write `{command}`, script expected {found}")
            }
            None => bail!("unexpected write `{command}` after the end of the script"),
        }
    }

    fn read_raw(&mut self) -> Result<Vec<u8>> {
        let mut script = lock(&self.script);
        if let Some(reply) = script.pending.pop_front() {
            return Ok(reply.into_bytes());
        }
        if matches!(script.steps.front(), Some((None, Some(_)))) {
            let reply = script.steps.pop_front().and_then(|(_, r)| r).unwrap_or_default();
            return Ok(reply.into_bytes());
        }
        match script.steps.front() {
            Some((expected, _)) => bail!("unexpected read, script expected write {expected:?}"),
            None => bail!("unexpected read after the end of the script"),
        }
    }

    fn describe(&self) -> String {
        "protocol transport".to_string()
    }
}

type Responder = Box<dyn FnMut(&str) -> Option<Vec<u8>> + Send>;

/// ### Write Log
///
/// Shared record of the commands written to a `SimTransport`.
///
#[derive(Debug, Clone, Default)]
pub struct WriteLog(Arc<Mutex<Vec<String>>>);

impl WriteLog {
    pub fn commands(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    /// Commands written, leaving out the ones the predicate rejects.
    pub fn commands_where(&self, keep: impl Fn(&str) -> bool) -> Vec<String> {
        lock(&self.0).iter().filter(|c| keep(c)).cloned().collect()
    }

    pub fn clear(&self) {
        lock(&self.0).clear();
    }

    fn push(&self, command: &str) {
        lock(&self.0).push(command.to_string());
    }
}

/// ### Sim Transport
///
/// A simulated device: the responder sees every written command and may queue a reply.
///
pub struct SimTransport {
    responder: Responder,
    pending: VecDeque<Vec<u8>>,
    log: WriteLog,
}

impl SimTransport {
    /// Simulated device answering in text.
    pub fn new<F>(mut responder: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        Self::raw(move |command| responder(command).map(String::into_bytes))
    }

    /// Simulated device answering with raw bytes.
    pub fn raw<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> Option<Vec<u8>> + Send + 'static,
    {
        SimTransport {
            responder: Box::new(responder),
            pending: VecDeque::new(),
            log: WriteLog::default(),
        }
    }

    pub fn log(&self) -> WriteLog {
        self.log.clone()
    }
}

impl Transport for SimTransport {
    fn write(&mut self, command: &str) -> Result<()> {
        self.log.push(command);
        if let Some(reply) = (self.responder)(command) {
            self.pending.push_back(reply);
        }
        Ok(())
    }

    fn read_raw(&mut self) -> Result<Vec<u8>> {
        self.pending
            .pop_front()
            .ok_or_else(|| anyhow!("read with no reply pending"))
    }

    fn describe(&self) -> String {
        "simulated transport".to_string()
    }
}
