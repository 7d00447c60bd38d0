//! ## Constants
//!
//! Defaults and protocol constants used throughout the crate.
//!

pub mod session {
    use std::time::Duration;

    /// Interval between two completion queries while waiting for the instrument
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
    /// Deadline for the instrument to report completion before a transaction fails
    pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);
    /// Upper bound on error-queue entries drained in one flush
    pub const DEFAULT_MAX_QUEUED_ERRORS: usize = 100;
    /// Default separator between tokens of a value reply
    pub const DEFAULT_SEPARATOR: &str = ",";
}

pub mod scpi {
    pub const IDENTIFY: &str = "*IDN?";
    pub const OPERATION_COMPLETE: &str = "*OPC?";
    pub const OPTIONS: &str = "*OPT?";
    pub const ERROR_QUERY: &str = "SYST:ERR?";
    pub const CLEAR_STATUS: &str = "*CLS";
    pub const RESET: &str = "*RST";
}

pub mod tsp {
    pub const IDENTIFY: &str = "*IDN?";
    pub const OPERATION_COMPLETE: &str = "waitcomplete() print([[1]])";
    pub const ERROR_QUERY: &str = "print(errorqueue.next())";
    pub const CLEAR_STATUS: &str = "status.reset()";
    pub const RESET: &str = "*reset()";
}

#[cfg(feature = "usbtmc")]
pub mod usb {
    /// The class code for usbtmc
    pub const USBTMC_CLASS_CODE: u8 = 0xFE;
    /// The subclass code for usbtmc
    pub const USBTMC_SUBCLASS_CODE: u8 = 0x03;
    /// The protocol code for the USB488 spec of usbtmc
    pub const USBTMC_PROTOCOL_CODE: u8 = 0x01;
}

#[cfg(feature = "usbtmc")]
pub mod usbtmc {
    use std::time::Duration;

    /// The default timeout for a single USB transfer
    pub const DEFAULT_TIMEOUT_DURATION: Duration = Duration::from_secs(2);
    /// The size in bytes of a USBTMC header in a bulk transfer
    pub const HEADER_SIZE: usize = 12;
    /// Largest chunk of payload sent in one DEV_DEP_MSG_OUT transaction
    pub const APPLICATION_BUFFER_SIZE: usize = 1024 * 8;
    /// Termination character requested when the device supports it
    pub const TERM_CHAR: u8 = b'\n';

    pub const STATUS_SUCCESS: u8 = 0x01;
    pub const STATUS_PENDING: u8 = 0x02;
    pub const STATUS_FAILED: u8 = 0x80;

    pub const INITIATE_CLEAR: u8 = 5;
    pub const CHECK_CLEAR_STATUS: u8 = 6;
    pub const GET_CAPABILITIES: u8 = 7;

    pub const DEV_DEP_MSG_OUT: u8 = 1;
    pub const REQUEST_DEV_DEP_MSG_IN: u8 = 2;
}
