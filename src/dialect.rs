//! ## Dialects
//!
//! The textual conventions an instrument family uses for identification, completion,
//! options, error-queue, clear and reset. A dialect that returns `None` for a query does
//! not support it.
//!

use std::fmt::Debug;

use crate::constants::{scpi, tsp};
use crate::error::QueuedError;

/// ### Completion
///
/// Reply of an operation-complete query.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Complete,
    Pending,
    /// The reply was neither of the expected tokens
    Indeterminate,
}

pub trait Dialect: Debug + Send + Sync {
    fn identify(&self) -> Option<&str> {
        None
    }

    fn operation_complete(&self) -> Option<&str> {
        None
    }

    fn parse_completion(&self, reply: &str) -> Completion {
        match reply.trim() {
            "1" => Completion::Complete,
            "0" => Completion::Pending,
            _ => Completion::Indeterminate,
        }
    }

    fn options(&self) -> Option<&str> {
        None
    }

    fn error_query(&self) -> Option<&str> {
        None
    }

    /// `None` when the reply is the "no error" sentinel.
    fn parse_error(&self, _reply: &str) -> Option<QueuedError> {
        None
    }

    fn clear_status(&self) -> Option<&str> {
        None
    }

    fn reset(&self) -> Option<&str> {
        None
    }
}

fn unquote(message: &str) -> String {
    message.trim().trim_matches('"').to_string()
}

/// ### SCPI
///
/// IEEE 488.2 common commands with the `SYST:ERR?` error queue.
///
#[derive(Debug, Clone, Copy, Default)]
pub struct Scpi;

impl Dialect for Scpi {
    fn identify(&self) -> Option<&str> {
        Some(scpi::IDENTIFY)
    }

    fn operation_complete(&self) -> Option<&str> {
        Some(scpi::OPERATION_COMPLETE)
    }

    fn options(&self) -> Option<&str> {
        Some(scpi::OPTIONS)
    }

    fn error_query(&self) -> Option<&str> {
        Some(scpi::ERROR_QUERY)
    }

    /// `<code>,<message>` or `<code> <message>`. Code zero (`+0`, `0`) and an empty reply
    /// mean the queue is empty. A reply without a numeric code is kept whole as the
    /// message, with code 0.
    fn parse_error(&self, reply: &str) -> Option<QueuedError> {
        let reply = reply.trim();
        if reply.is_empty() || reply.starts_with("+0") {
            return None;
        }

        let split_at = reply.find([',', ' ']).unwrap_or(reply.len());
        let (code, message) = reply.split_at(split_at);
        match code.trim_start_matches('+').parse::<i32>() {
            Ok(0) => None,
            Ok(code) => Some(QueuedError {
                code,
                message: unquote(message.trim_start_matches([',', ' '])),
            }),
            Err(_) => Some(QueuedError {
                code: 0,
                message: reply.to_string(),
            }),
        }
    }

    fn clear_status(&self) -> Option<&str> {
        Some(scpi::CLEAR_STATUS)
    }

    fn reset(&self) -> Option<&str> {
        Some(scpi::RESET)
    }
}

/// ### TSP
///
/// Keithley Test Script Processor conventions (2600 series). There is no options query.
///
#[derive(Debug, Clone, Copy, Default)]
pub struct Tsp;

impl Dialect for Tsp {
    fn identify(&self) -> Option<&str> {
        Some(tsp::IDENTIFY)
    }

    fn operation_complete(&self) -> Option<&str> {
        Some(tsp::OPERATION_COMPLETE)
    }

    fn error_query(&self) -> Option<&str> {
        Some(tsp::ERROR_QUERY)
    }

    /// Tab separated `code\tmessage[\tseverity\tnode]`. A single field or code 0 means the
    /// queue is empty.
    fn parse_error(&self, reply: &str) -> Option<QueuedError> {
        let mut fields = reply.trim().split('\t');
        let code = fields.next()?;
        let message = fields.next()?;
        let code = code.trim().parse::<f64>().ok()? as i32;
        (code != 0).then(|| QueuedError {
            code,
            message: unquote(message),
        })
    }

    fn clear_status(&self) -> Option<&str> {
        Some(tsp::CLEAR_STATUS)
    }

    fn reset(&self) -> Option<&str> {
        Some(tsp::RESET)
    }
}

/// ### Bare
///
/// No standard vocabulary. Sessions skip readiness polling and error draining.
///
#[derive(Debug, Clone, Copy, Default)]
pub struct Bare;

impl Dialect for Bare {}
