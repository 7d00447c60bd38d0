//! ## Errors
//!
//! The errors surfaced by sessions and command transactions.
//!

use std::time::Duration;

/// ### Result
///
/// Alias for results returned by the session and command layer.
///
pub type Result<T> = std::result::Result<T, Error>;

/// ### Queued Error
///
/// One entry read from the instrument's error queue.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedError {
    /// Numeric error code reported by the instrument
    pub code: i32,
    /// Message text following the code
    pub message: String,
}

impl std::fmt::Display for QueuedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.code, self.message)
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("command `{command}` cannot be {direction}")]
    UnsupportedOperation {
        command: String,
        direction: &'static str,
    },
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("value {0} not found in mapped values")]
    ValueNotFound(String),
    #[error("the operation did not complete in the timeout specified ({0:?})")]
    Timeout(Duration),
    #[error(
        "error read from error queue. First error read from the error queue is: {first} ({} queued)",
        .queued.len()
    )]
    CommunicationError {
        first: QueuedError,
        queued: Vec<QueuedError>,
    },
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    #[error("{0} is not supported by the instrument dialect")]
    UnsupportedDialect(&'static str),
    #[error("session for {0} is already shut down")]
    AlreadyShutDown(String),
    #[error("invalid command declaration: {0}")]
    InvalidDeclaration(String),
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("{0} is a reserved name and it cannot be read")]
    ReservedName(String),
    #[error("command `{0}` is not overridable")]
    NotOverridable(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn unreadable(command: &str) -> Error {
        Error::UnsupportedOperation {
            command: command.to_string(),
            direction: "read",
        }
    }

    pub(crate) fn unwritable(command: &str) -> Error {
        Error::UnsupportedOperation {
            command: command.to_string(),
            direction: "set",
        }
    }

    /// ### Communication Error
    ///
    /// Build the error raised for a non-empty error queue. Returns `None` for an empty queue.
    ///
    pub fn from_queue(queued: Vec<QueuedError>) -> Option<Error> {
        let first = queued.first()?.clone();
        Some(Error::CommunicationError { first, queued })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn communication_error_mentions_first_fault() {
        let err = Error::from_queue(vec![
            QueuedError {
                code: -113,
                message: "Undefined header".into(),
            },
            QueuedError {
                code: -222,
                message: "Data out of range".into(),
            },
        ])
        .expect("queue is not empty");

        let text = err.to_string();
        assert!(text.contains("-113, Undefined header"));
        assert!(text.contains("2 queued"));
    }

    #[test]
    fn empty_queue_is_not_an_error() {
        assert!(Error::from_queue(Vec::new()).is_none());
    }

    #[test]
    fn unsupported_operation_names_direction() {
        assert_eq!(
            Error::unreadable("voltage").to_string(),
            "command `voltage` cannot be read"
        );
    }
}
