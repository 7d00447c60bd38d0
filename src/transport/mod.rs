//! ## Transport
//!
//! The byte-stream capability a session talks through, and the resolution of resource
//! locators into an open transport.
//!

pub mod mock;
#[cfg(feature = "usbtmc")]
pub mod usbtmc;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::coder::{ElementType, Value};
use crate::error::Error;

/// ### Transport
///
/// Primitive text I/O with one device. Implementors provide `write` and `read_raw`;
/// every other primitive has a default built on those two.
///
pub trait Transport: Send {
    /// Send one command. The transport appends its own line terminator.
    fn write(&mut self, command: &str) -> Result<()>;

    /// Read one complete reply as bytes.
    fn read_raw(&mut self) -> Result<Vec<u8>>;

    /// Read one reply as trimmed utf-8 text.
    fn read(&mut self) -> Result<String> {
        let raw = self.read_raw()?;
        Ok(std::str::from_utf8(&raw)?.trim().to_string())
    }

    fn query(&mut self, command: &str) -> Result<String> {
        self.write(command)?;
        self.read()
    }

    /// Query and split the reply into value tokens.
    fn query_values(&mut self, command: &str, separator: &str) -> Result<Vec<Value>> {
        let reply = self.query(command)?;
        Ok(split_values(&reply, separator))
    }

    /// Query and decode a binary reply, skipping `header_bytes` leading bytes.
    fn query_binary(
        &mut self,
        command: &str,
        header_bytes: usize,
        element: ElementType,
    ) -> Result<Vec<f64>> {
        self.write(command)?;
        let raw = self.read_raw()?;
        decode_binary(&raw, header_bytes, element)
    }

    /// Human readable description used in logs.
    fn describe(&self) -> String {
        "transport".to_string()
    }
}

/// Split a reply into trimmed, parsed tokens. Empty fields keep their position as
/// empty text; only the field after a trailing separator is dropped.
pub fn split_values(reply: &str, separator: &str) -> Vec<Value> {
    let mut tokens: Vec<&str> = reply.split(separator).map(str::trim).collect();
    if tokens.len() > 1 && tokens.last().is_some_and(|token| token.is_empty()) {
        tokens.pop();
    }
    tokens.into_iter().map(Value::parse).collect()
}

/// Decode a little-endian binary block after `header_bytes`. A single trailing line
/// feed that breaks element alignment is treated as the reply terminator.
pub fn decode_binary(raw: &[u8], header_bytes: usize, element: ElementType) -> Result<Vec<f64>> {
    let mut data = raw
        .get(header_bytes..)
        .ok_or_else(|| anyhow!("reply of {} bytes is shorter than its header", raw.len()))?;
    if data.len() % element.size() != 0 && data.last() == Some(&b'\n') {
        data = &data[..data.len() - 1];
    }
    if data.len() % element.size() != 0 {
        return Err(anyhow!(
            "binary reply of {} bytes is not a whole number of {:?} elements",
            data.len(),
            element
        ));
    }

    Ok(data
        .chunks_exact(element.size())
        .filter_map(|chunk| element.decode_le(chunk))
        .collect())
}

/// Keyword options passed to a transport at construction, opaque to the session.
pub type TransportOptions = BTreeMap<String, String>;

/// Opens a transport for a resource locator.
pub type Connector =
    Arc<dyn Fn(&str, &TransportOptions) -> crate::Result<Box<dyn Transport>> + Send + Sync>;

/// ### Resource
///
/// Where a session finds its transport.
///
pub enum Resource {
    /// An already opened transport
    Open(Box<dyn Transport>),
    /// A VISA-style resource locator, e.g. `USB0::0x1AB1::0x04CE::INSTR`
    Locator(String),
    /// A GPIB primary address on board 0
    Address(u8),
}

impl Resource {
    /// The locator string for resources that still need opening.
    pub fn locator(&self) -> Option<String> {
        match self {
            Resource::Open(_) => None,
            Resource::Locator(locator) => Some(locator.clone()),
            Resource::Address(address) => Some(format!("GPIB0::{address}::INSTR")),
        }
    }

    pub(crate) fn open(
        self,
        connector: &Connector,
        options: &TransportOptions,
    ) -> crate::Result<Box<dyn Transport>> {
        match self {
            Resource::Open(transport) => Ok(transport),
            other => {
                let locator = other.locator().unwrap_or_default();
                log::debug!("opening transport for {locator}");
                connector(&locator, options)
            }
        }
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::Open(transport) => write!(f, "Open({})", transport.describe()),
            Resource::Locator(locator) => write!(f, "Locator({locator})"),
            Resource::Address(address) => write!(f, "Address({address})"),
        }
    }
}

impl From<&str> for Resource {
    fn from(locator: &str) -> Resource {
        Resource::Locator(locator.to_string())
    }
}

impl From<String> for Resource {
    fn from(locator: String) -> Resource {
        Resource::Locator(locator)
    }
}

impl From<u8> for Resource {
    fn from(address: u8) -> Resource {
        Resource::Address(address)
    }
}

impl From<Box<dyn Transport>> for Resource {
    fn from(transport: Box<dyn Transport>) -> Resource {
        Resource::Open(transport)
    }
}

/// ### Connect
///
/// Default connector: USB locators open through USBTMC, every other interface reports
/// `TransportUnavailable`.
///
pub fn connect(locator: &str, options: &TransportOptions) -> crate::Result<Box<dyn Transport>> {
    if locator.to_ascii_uppercase().starts_with("USB") {
        return open_usb(locator, options);
    }
    Err(Error::TransportUnavailable(format!(
        "no transport available for resource `{locator}`"
    )))
}

pub fn default_connector() -> Connector {
    Arc::new(connect)
}

#[cfg(feature = "usbtmc")]
fn open_usb(locator: &str, options: &TransportOptions) -> crate::Result<Box<dyn Transport>> {
    let id = usbtmc::DeviceId::from_locator(locator)
        .ok_or_else(|| Error::TransportUnavailable(format!("malformed USB resource `{locator}`")))?;
    let transport = usbtmc::UsbtmcTransport::connect(id, options)
        .map_err(|e| Error::TransportUnavailable(format!("{locator}: {e:#}")))?;
    Ok(Box::new(transport))
}

#[cfg(not(feature = "usbtmc"))]
fn open_usb(locator: &str, _options: &TransportOptions) -> crate::Result<Box<dyn Transport>> {
    Err(Error::TransportUnavailable(format!(
        "{locator}: USBTMC support not enabled. Rebuild with --features usbtmc"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpib_address_becomes_locator() {
        assert_eq!(
            Resource::from(5u8).locator().as_deref(),
            Some("GPIB0::5::INSTR")
        );
    }

    #[test]
    fn unknown_interfaces_are_unavailable() {
        let result = connect("ASRL1::INSTR", &TransportOptions::new());
        assert!(matches!(result, Err(Error::TransportUnavailable(_))));
    }

    #[test]
    fn values_split_on_separator() {
        let values = split_values("1.5, 2,ON,", ",");
        assert_eq!(values, vec![Value::Float(1.5), Value::Int(2), Value::from("ON")]);
    }

    #[test]
    fn empty_fields_keep_their_position() {
        assert_eq!(
            split_values("1,,3", ","),
            vec![Value::Int(1), Value::from(""), Value::Int(3)]
        );
        assert_eq!(split_values("", ","), vec![Value::from("")]);
    }

    #[test]
    fn binary_block_skips_header_and_terminator() {
        let mut raw = b"#18".to_vec();
        raw.extend_from_slice(&1.0f32.to_le_bytes());
        raw.extend_from_slice(&(-2.5f32).to_le_bytes());
        raw.push(b'\n');

        let values = decode_binary(&raw, 3, ElementType::F32).unwrap();
        assert_eq!(values, vec![1.0, -2.5]);
    }

    #[test]
    fn misaligned_binary_block_is_rejected() {
        assert!(decode_binary(&[0, 1, 2], 0, ElementType::I16).is_err());
        assert!(decode_binary(&[0], 2, ElementType::U8).is_err());
    }
}
