//! ## USBTMC
//!
//! Pure Rust USBTMC transport over libusb. Writes DEVICE_DEPENDENT messages to the BULK
//! OUT endpoint and reads DEVICE_DEPENDENT messages from the BULK IN endpoint.
//!

mod bulk;
mod control;
mod init;
mod types;

use std::time::Duration;

use anyhow::{Context, Result};
use humantime_serde::re::humantime;
use rusb::{DeviceHandle, UsbContext};

use crate::constants::usbtmc::DEFAULT_TIMEOUT_DURATION;
use crate::transport::{Transport, TransportOptions};

pub use init::DeviceFilter;
pub use types::{Capabilities, DeviceAddr, DeviceId, DeviceInfo};
use types::{BTag, DeviceMode, UsbtmcEndpoints};

#[derive(Debug, thiserror::Error)]
pub enum UsbtmcError {
    #[error("device not found")]
    DeviceNotFound,
    #[error("device is not compatible with USBTMC")]
    DeviceIncompatible,
    #[error("specified interface not found")]
    InterfaceNotFound,
    #[error("specified interface setting not found")]
    InterfaceSettingNotFound,
    #[error("bulk out endpoint not found")]
    BulkOutEndpointNotFound,
    #[error("bulk in endpoint not found")]
    BulkInEndpointNotFound,
    #[error("used incorrect endpoint")]
    IncorrectEndpoint,
    #[error("bulk in FIFO is not empty")]
    BulkInFifoNotEmpty,
    #[error("control request failed")]
    StatusFailure,
    #[error("control request unexpectedly failed with status {0:#04x}")]
    StatusUnexpectedFailure(u8),
    #[error("bulk in transfer of {0} bytes is shorter than its header")]
    ShortTransfer(usize),
}

/// ### Devices
///
/// List the USBTMC devices on the bus.
///
pub fn devices() -> Result<Vec<DeviceInfo>> {
    let context = rusb::Context::new()?;
    init::list_devices(&context)
}

/// ### USBTMC Transport
///
/// Owns a claimed USBTMC interface. The interface is released, and any detached kernel
/// driver reattached, on drop.
///
pub struct UsbtmcTransport {
    handle: DeviceHandle<rusb::Context>,
    mode: DeviceMode,
    timeout: Duration,
    capabilities: Capabilities,
    btag: BTag,
    endpoints: UsbtmcEndpoints,
    terminator: String,
}

impl UsbtmcTransport {
    /// ### Connect
    ///
    /// Open and initialize the first device matching `filter`.
    ///
    /// Recognised options: `timeout` (humantime duration, default 2s) and `terminator`
    /// (appended to every write, default `\n`).
    ///
    pub fn connect(filter: impl DeviceFilter, options: &TransportOptions) -> Result<UsbtmcTransport> {
        let timeout = match options.get("timeout") {
            Some(text) => humantime::parse_duration(text)
                .with_context(|| format!("invalid USBTMC timeout `{text}`"))?,
            None => DEFAULT_TIMEOUT_DURATION,
        };
        let terminator = options.get("terminator").cloned().unwrap_or_else(|| "\n".to_string());

        let context = rusb::Context::new()?;
        let (device, mut handle) = init::open_device(&context, &filter)?;

        let mut mode = init::usbtmc_mode(&device)?;
        init::detach_kernel_driver(&mut mode, &mut handle)?;
        let endpoints = init::endpoints(&mode, &device)?;

        handle.set_active_configuration(mode.config_number)?;
        handle.claim_interface(mode.interface_number)?;
        handle.set_alternate_setting(mode.interface_number, mode.setting_number)?;

        let capabilities = control::get_capabilities(&handle, mode.interface_number, timeout)?;

        control::clear_buffers(&handle, mode.interface_number, timeout)?;
        control::clear_halt(&handle, &endpoints.bulk_out)?;
        control::clear_halt(&handle, &endpoints.bulk_in)?;

        log::debug!(
            "USBTMC device {:04x}:{:04x} claimed interface {} ({:?})",
            device.device_descriptor()?.vendor_id(),
            device.device_descriptor()?.product_id(),
            mode.interface_number,
            capabilities
        );

        Ok(UsbtmcTransport {
            handle,
            mode,
            timeout,
            capabilities,
            btag: BTag::new(),
            endpoints,
            terminator,
        })
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn set_timeout(&mut self, duration: Duration) {
        self.timeout = duration;
    }

    /// USB488 devices report service requests through an interrupt IN endpoint.
    pub fn has_interrupt_endpoint(&self) -> bool {
        self.endpoints.interrupt.is_some()
    }
}

impl Transport for UsbtmcTransport {
    fn write(&mut self, command: &str) -> Result<()> {
        let data = format!("{command}{}", self.terminator);
        bulk::write(
            &self.handle,
            &mut self.btag,
            data.as_bytes(),
            &self.endpoints.bulk_out,
            self.timeout,
        )
    }

    fn read_raw(&mut self) -> Result<Vec<u8>> {
        bulk::read(
            &self.handle,
            &mut self.btag,
            &self.endpoints.bulk_in,
            &self.endpoints.bulk_out,
            &self.capabilities,
            self.timeout,
        )
    }

    fn describe(&self) -> String {
        format!(
            "USBTMC interface {} ({} byte packets, {}ms timeout)",
            self.mode.interface_number,
            self.endpoints.bulk_in.max_packet_size,
            self.timeout.as_millis()
        )
    }
}

fn release<T: UsbContext>(handle: &mut DeviceHandle<T>, mode: &DeviceMode) -> rusb::Result<()> {
    handle.release_interface(mode.interface_number)?;
    if mode.has_kernel_driver {
        handle.attach_kernel_driver(mode.interface_number)?;
    }
    Ok(())
}

impl Drop for UsbtmcTransport {
    fn drop(&mut self) {
        if let Err(e) = release(&mut self.handle, &self.mode) {
            log::warn!("failed to release USBTMC interface {}: {e}", self.mode.interface_number);
        }
    }
}
