//! ## Control
//!
//! Class-specific control requests used while bringing a device up.
//!

use std::time::Duration;

use anyhow::Result;
use rusb::{DeviceHandle, Direction, Recipient, RequestType, UsbContext};

use super::types::{Capabilities, Endpoint};
use super::UsbtmcError;
use crate::constants::usbtmc::*;

fn interface_request() -> u8 {
    rusb::request_type(Direction::In, RequestType::Class, Recipient::Interface)
}

/// ### Get Capabilities
///
/// Read the interface and device capabilities of the USBTMC interface.
///
pub fn get_capabilities<T: UsbContext>(
    handle: &DeviceHandle<T>,
    interface_number: u8,
    timeout: Duration,
) -> Result<Capabilities> {
    let mut buffer = [0x00; 0x18];
    handle.read_control(
        interface_request(),
        GET_CAPABILITIES,
        0x0000,
        u16::from(interface_number),
        &mut buffer,
        timeout,
    )?;

    parse_capabilities(&buffer)
}

pub fn parse_capabilities(buffer: &[u8; 0x18]) -> Result<Capabilities> {
    if buffer[0] != STATUS_SUCCESS {
        return Err(UsbtmcError::StatusUnexpectedFailure(buffer[0]).into());
    }

    let interface_capabilities = buffer[4];
    let device_capabilities = buffer[5];

    Ok(Capabilities {
        bcd_version: u16::from_le_bytes([buffer[2], buffer[3]]),
        accepts_indicator_pulse: interface_capabilities & 0b0000_0100 != 0,
        is_talk_only: interface_capabilities & 0b0000_0010 != 0,
        is_listen_only: interface_capabilities & 0b0000_0001 != 0,
        supports_term_char: device_capabilities & 0b0000_0001 != 0,
    })
}

/// ### Clear Buffers
///
/// INITIATE_CLEAR then poll CHECK_CLEAR_STATUS until the device is done.
///
pub fn clear_buffers<T: UsbContext>(
    handle: &DeviceHandle<T>,
    interface_number: u8,
    timeout: Duration,
) -> Result<()> {
    let w_index = u16::from(interface_number);

    let mut buffer = [0x00; 0x01];
    handle.read_control(interface_request(), INITIATE_CLEAR, 0x0000, w_index, &mut buffer, timeout)?;
    if buffer[0] != STATUS_SUCCESS {
        return Err(UsbtmcError::StatusUnexpectedFailure(buffer[0]).into());
    }

    let mut buffer = [0x00; 0x02];
    loop {
        handle.read_control(
            interface_request(),
            CHECK_CLEAR_STATUS,
            0x0000,
            w_index,
            &mut buffer,
            timeout,
        )?;

        match buffer[0] {
            STATUS_PENDING if buffer[1] & 0b0000_0001 != 0 => {
                return Err(UsbtmcError::BulkInFifoNotEmpty.into())
            }
            STATUS_PENDING => continue,
            STATUS_SUCCESS => return Ok(()),
            STATUS_FAILED => return Err(UsbtmcError::StatusFailure.into()),
            other => return Err(UsbtmcError::StatusUnexpectedFailure(other).into()),
        }
    }
}

/// ### Clear Halt
///
/// Clear any halt on the endpoint.
///
pub fn clear_halt<T: UsbContext>(handle: &DeviceHandle<T>, endpoint: &Endpoint) -> Result<()> {
    handle.clear_halt(endpoint.address)?;
    Ok(())
}
