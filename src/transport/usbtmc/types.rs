//! ## Types
//!
//! Descriptions of a USBTMC device gathered while opening it.
//!

use rusb::{Direction, TransferType};

/// ### Device Id
///
/// USB vendor and product identifiers.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceId {
    /// ### From Locator
    ///
    /// Parse `USB[board]::<vendor>::<product>[::<serial>][::INSTR]`. Identifiers may be
    /// hexadecimal (`0x1AB1`) or decimal.
    ///
    pub fn from_locator(locator: &str) -> Option<DeviceId> {
        let mut parts = locator.split("::");
        if !parts.next()?.to_ascii_uppercase().starts_with("USB") {
            return None;
        }
        let vendor_id = parse_id(parts.next()?)?;
        let product_id = parse_id(parts.next()?)?;
        Some(DeviceId {
            vendor_id,
            product_id,
        })
    }
}

fn parse_id(text: &str) -> Option<u16> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// ### Device Address
///
/// USB bus number and device address.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAddr {
    pub bus: u8,
    pub device: u8,
}

/// ### Device Info
///
/// A USBTMC device found on the bus.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub address: DeviceAddr,
}

/// ### bTag
///
/// Identifies a bulk transfer. Wraps from 255 back to 1, zero is never used.
///
#[derive(Debug, Clone)]
pub struct BTag(u8);

impl BTag {
    pub fn new() -> BTag {
        BTag(1)
    }

    /// Return the current tag and advance.
    pub fn next(&mut self) -> u8 {
        let btag = self.0;
        self.0 = if btag == 255 { 1 } else { btag + 1 };
        btag
    }
}

/// ### Device Mode
///
/// Configuration, interface and setting that expose the USBTMC interface, and whether a
/// kernel driver had to be detached to claim it.
///
#[derive(Debug, Clone, Default)]
pub struct DeviceMode {
    pub config_number: u8,
    pub interface_number: u8,
    pub setting_number: u8,
    /// Important for returning control to the OS (on Linux)
    pub has_kernel_driver: bool,
}

#[derive(Clone, Debug)]
pub struct Endpoint {
    pub address: u8,
    pub max_packet_size: u16,
    pub transfer_type: TransferType,
    pub direction: Direction,
}

impl Endpoint {
    pub fn is(&self, transfer_type: TransferType, direction: Direction) -> bool {
        self.transfer_type == transfer_type && self.direction == direction
    }
}

/// ### USBTMC Endpoints
///
/// The mandatory bulk pair and the optional interrupt endpoint.
///
#[derive(Clone, Debug)]
pub struct UsbtmcEndpoints {
    pub bulk_out: Endpoint,
    pub bulk_in: Endpoint,
    pub interrupt: Option<Endpoint>,
}

/// ### Capabilities
///
/// What the device reported in GET_CAPABILITIES.
///
#[derive(Clone, Debug, Default)]
pub struct Capabilities {
    pub bcd_version: u16,
    pub accepts_indicator_pulse: bool,
    pub is_talk_only: bool,
    pub is_listen_only: bool,
    /// Replies end on the termination character when requested
    pub supports_term_char: bool,
}
