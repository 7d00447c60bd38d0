//! ## Channels
//!
//! Commands of one channel of a multi-channel instrument. The channel's command table
//! is written channel-agnostic; the channel wraps every command it sends with its read
//! or write wrapper, where `{ch}` is the channel id and `{cmd}` the formatted command.
//!

use crate::coder::Value;
use crate::command::CommandTable;
use crate::error::Result;
use crate::session::Session;

/// ### Channel
///
/// A command table bound to one channel id. Channels hold no transport: every call is a
/// transaction on the session passed in.
///
#[derive(Debug, Clone)]
pub struct Channel {
    id: String,
    read_wrapper: String,
    write_wrapper: String,
    commands: CommandTable,
}

impl Channel {
    /// A channel that sends its commands unwrapped.
    pub fn new(id: &str, commands: CommandTable) -> Channel {
        Channel {
            id: id.to_string(),
            read_wrapper: "{cmd}".to_string(),
            write_wrapper: "{cmd}".to_string(),
            commands,
        }
    }

    /// Wrapper applied to read commands, e.g. `print(smu{ch}.{cmd})`.
    pub fn with_read_wrapper(mut self, wrapper: &str) -> Self {
        self.read_wrapper = wrapper.to_string();
        self
    }

    /// Wrapper applied to written commands, e.g. `smu{ch}.{cmd}`.
    pub fn with_write_wrapper(mut self, wrapper: &str) -> Self {
        self.write_wrapper = wrapper.to_string();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    fn wrap(&self, wrapper: &str, command: &str) -> String {
        wrapper.replace("{ch}", &self.id).replace("{cmd}", command)
    }

    pub fn get(&self, session: &Session, name: &str) -> Result<Value> {
        let effective = self
            .commands
            .lookup(name)?
            .resolve(name, &[self.commands.class_overrides()]);
        effective.read(name, |command, separator| {
            session.read_values(&self.wrap(&self.read_wrapper, command), separator)
        })
    }

    pub fn get_as<T>(&self, session: &Session, name: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = crate::Error>,
    {
        T::try_from(self.get(session, name)?)
    }

    pub fn set(&self, session: &Session, name: &str, value: impl Into<Value>) -> Result<()> {
        let effective = self
            .commands
            .lookup(name)?
            .resolve(name, &[self.commands.class_overrides()]);
        effective.write(name, value.into(), |command| {
            session.write(&self.wrap(&self.write_wrapper, command))
        })
    }

    /// Send a free-form command through the read wrapper and return the reply.
    pub fn ask(&self, session: &Session, command: &str) -> Result<String> {
        session.ask(&self.wrap(&self.read_wrapper, command))
    }

    /// Send a free-form command through the write wrapper.
    pub fn write(&self, session: &Session, command: &str) -> Result<()> {
        session.write(&self.wrap(&self.write_wrapper, command))
    }
}
