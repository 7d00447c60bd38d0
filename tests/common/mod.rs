#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rs_instrument::transport::mock::SimTransport;

pub const NO_ERROR: &str = "+0,\"No error\"";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Replies the simulated device gives to `SYST:ERR?`; empty means no error.
#[derive(Clone, Default)]
pub struct ErrorQueue(Arc<Mutex<VecDeque<String>>>);

impl ErrorQueue {
    pub fn push(&self, reply: &str) {
        self.0.lock().unwrap().push_back(reply.to_string());
    }

    fn next(&self) -> String {
        self.0
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| NO_ERROR.to_string())
    }
}

/// A SCPI device that is always ready, identifies as `idn` and hands every other
/// command to `handler`.
pub fn scpi_device<F>(idn: &str, errors: ErrorQueue, mut handler: F) -> SimTransport
where
    F: FnMut(&str) -> Option<String> + Send + 'static,
{
    let idn = idn.to_string();
    SimTransport::new(move |command| match command {
        "*OPC?" => Some("1".to_string()),
        "SYST:ERR?" => Some(errors.next()),
        "*IDN?" => Some(idn.clone()),
        other => handler(other),
    })
}

/// Commands written, without the readiness and error-queue traffic.
pub fn is_payload(command: &str) -> bool {
    !matches!(command, "*OPC?" | "SYST:ERR?" | "*IDN?")
}
