//! Bulk
//!
//! Device-dependent messages over the bulk endpoints.
//!

use std::time::Duration;

use anyhow::Result;
use rusb::{DeviceHandle, Direction, TransferType, UsbContext};

use super::types::{BTag, Capabilities, Endpoint};
use super::UsbtmcError;
use crate::constants::usbtmc::*;

const END_OF_MESSAGE: u8 = 0b0000_0001;
const TERM_CHAR_ENABLED: u8 = 0b0000_0010;

/// ### Header
///
/// The 12 byte bulk header shared by every message type.
///
pub fn header(msg_id: u8, btag: u8, transfer_size: u32, attributes: u8, term_char: u8) -> [u8; HEADER_SIZE] {
    let mut header = [0x00; HEADER_SIZE];
    header[0] = msg_id;
    header[1] = btag;
    header[2] = !btag;
    header[4..8].copy_from_slice(&transfer_size.to_le_bytes());
    header[8] = attributes;
    header[9] = term_char;
    header
}

/// ### Out Message
///
/// One DEV_DEP_MSG_OUT transaction: header, payload and padding to a 4 byte boundary.
///
pub fn out_message(btag: u8, payload: &[u8], end_of_message: bool) -> Vec<u8> {
    let attributes = if end_of_message { END_OF_MESSAGE } else { 0 };
    let mut message = header(DEV_DEP_MSG_OUT, btag, payload.len() as u32, attributes, 0).to_vec();
    message.extend_from_slice(payload);
    let padding = (4 - message.len() % 4) % 4;
    message.resize(message.len() + padding, 0x00);
    message
}

/// ### Write
///
/// Send data to the BULK OUT endpoint, split into application-sized transactions.
///
pub fn write<T: UsbContext>(
    handle: &DeviceHandle<T>,
    btag: &mut BTag,
    data: &[u8],
    bulk_out: &Endpoint,
    timeout: Duration,
) -> Result<()> {
    if !bulk_out.is(TransferType::Bulk, Direction::Out) {
        return Err(UsbtmcError::IncorrectEndpoint.into());
    }

    let num_transactions = data.len().div_ceil(APPLICATION_BUFFER_SIZE).max(1);
    let chunks = data.chunks(APPLICATION_BUFFER_SIZE).chain(data.is_empty().then_some(&[][..]));

    for (n, chunk) in chunks.enumerate() {
        let message = out_message(btag.next(), chunk, n + 1 == num_transactions);
        handle.write_bulk(bulk_out.address, &message, timeout)?;
    }

    Ok(())
}

/// ### Read
///
/// Request DEV_DEP_MSG_IN transfers until the device flags the end of the message.
///
pub fn read<T: UsbContext>(
    handle: &DeviceHandle<T>,
    btag: &mut BTag,
    bulk_in: &Endpoint,
    bulk_out: &Endpoint,
    capabilities: &Capabilities,
    timeout: Duration,
) -> Result<Vec<u8>> {
    if !bulk_out.is(TransferType::Bulk, Direction::Out) || !bulk_in.is(TransferType::Bulk, Direction::In) {
        return Err(UsbtmcError::IncorrectEndpoint.into());
    }

    let (attributes, term_char) = if capabilities.supports_term_char {
        (TERM_CHAR_ENABLED, TERM_CHAR)
    } else {
        (0, 0)
    };

    let mut output = Vec::new();
    let mut buffer = vec![0x00; APPLICATION_BUFFER_SIZE + HEADER_SIZE];

    loop {
        let request = header(
            REQUEST_DEV_DEP_MSG_IN,
            btag.next(),
            APPLICATION_BUFFER_SIZE as u32,
            attributes,
            term_char,
        );
        handle.write_bulk(bulk_out.address, &request, timeout)?;

        let bytes_read = handle.read_bulk(bulk_in.address, &mut buffer, timeout)?;
        if bytes_read < HEADER_SIZE {
            return Err(UsbtmcError::ShortTransfer(bytes_read).into());
        }

        let (payload_size, end_of_message) = parse_in_header(&buffer[..HEADER_SIZE]);
        let end = (HEADER_SIZE + payload_size).min(bytes_read);
        output.extend_from_slice(&buffer[HEADER_SIZE..end]);

        if end_of_message {
            return Ok(output);
        }
    }
}

/// Payload size and end-of-message flag of a DEV_DEP_MSG_IN header.
pub fn parse_in_header(header: &[u8]) -> (usize, bool) {
    let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    (size, header[8] & END_OF_MESSAGE != 0)
}
