//! ## Initialization
//!
//! Find, open and describe a USBTMC device.
//!

use anyhow::Result;
use rusb::{Device, DeviceDescriptor, DeviceHandle, Direction, InterfaceDescriptor, TransferType, UsbContext};

use super::types::{DeviceAddr, DeviceId, DeviceInfo, DeviceMode, Endpoint, UsbtmcEndpoints};
use super::UsbtmcError;
use crate::constants::usb::*;

/// ### Device Filter
///
/// Selects which USBTMC device to open.
///
pub trait DeviceFilter {
    fn apply_filter<T: UsbContext>(&self, device: &Device<T>, device_desc: &DeviceDescriptor) -> bool;
}

/// First device found
impl DeviceFilter for () {
    fn apply_filter<T: UsbContext>(&self, _device: &Device<T>, _device_desc: &DeviceDescriptor) -> bool {
        true
    }
}

impl DeviceFilter for DeviceAddr {
    fn apply_filter<T: UsbContext>(&self, device: &Device<T>, _device_desc: &DeviceDescriptor) -> bool {
        self.bus == device.bus_number() && self.device == device.address()
    }
}

impl DeviceFilter for DeviceId {
    fn apply_filter<T: UsbContext>(&self, _device: &Device<T>, device_desc: &DeviceDescriptor) -> bool {
        self.vendor_id == device_desc.vendor_id() && self.product_id == device_desc.product_id()
    }
}

impl DeviceFilter for DeviceInfo {
    fn apply_filter<T: UsbContext>(&self, device: &Device<T>, device_desc: &DeviceDescriptor) -> bool {
        self.id.apply_filter(device, device_desc) && self.address.apply_filter(device, device_desc)
    }
}

fn is_tmc_interface(interface_desc: &InterfaceDescriptor) -> bool {
    interface_desc.class_code() == USBTMC_CLASS_CODE
        && interface_desc.sub_class_code() == USBTMC_SUBCLASS_CODE
        && interface_desc.protocol_code() == USBTMC_PROTOCOL_CODE
}

fn is_tmc_device<T: UsbContext>(device: &Device<T>, device_desc: &DeviceDescriptor) -> bool {
    (0..device_desc.num_configurations()).any(|config_no| {
        device.config_descriptor(config_no).is_ok_and(|config_desc| {
            config_desc
                .interfaces()
                .any(|interface| interface.descriptors().any(|d| is_tmc_interface(&d)))
        })
    })
}

/// ### List Devices
///
/// Every USBTMC device visible to the context.
///
pub fn list_devices<T: UsbContext>(context: &T) -> Result<Vec<DeviceInfo>> {
    Ok(context
        .devices()?
        .iter()
        .filter_map(|device| {
            let device_desc = device.device_descriptor().ok()?;
            is_tmc_device(&device, &device_desc).then(|| DeviceInfo {
                id: DeviceId {
                    vendor_id: device_desc.vendor_id(),
                    product_id: device_desc.product_id(),
                },
                address: DeviceAddr {
                    bus: device.bus_number(),
                    device: device.address(),
                },
            })
        })
        .collect())
}

/// ### Open Device
///
/// Open the first USBTMC device accepted by the filter.
///
pub fn open_device<T: UsbContext>(
    context: &T,
    filter: &impl DeviceFilter,
) -> Result<(Device<T>, DeviceHandle<T>)> {
    for device in context.devices()?.iter() {
        let Ok(device_desc) = device.device_descriptor() else {
            continue;
        };
        if is_tmc_device(&device, &device_desc) && filter.apply_filter(&device, &device_desc) {
            if let Ok(handle) = device.open() {
                return Ok((device, handle));
            }
        }
    }

    Err(UsbtmcError::DeviceNotFound.into())
}

/// ### USBTMC Mode
///
/// The first configuration, interface and setting that speaks USBTMC/USB488.
///
pub fn usbtmc_mode<T: UsbContext>(device: &Device<T>) -> Result<DeviceMode> {
    let device_desc = device.device_descriptor()?;

    for n in 0..device_desc.num_configurations() {
        let config_desc = device.config_descriptor(n)?;
        for interface in config_desc.interfaces() {
            if let Some(interface_desc) = interface.descriptors().find(is_tmc_interface) {
                return Ok(DeviceMode {
                    config_number: config_desc.number(),
                    interface_number: interface_desc.interface_number(),
                    setting_number: interface_desc.setting_number(),
                    has_kernel_driver: false,
                });
            }
        }
    }

    Err(UsbtmcError::DeviceIncompatible.into())
}

/// ### Detach Kernel Driver
///
/// Detach an active kernel driver for the lifetime of the transport.
///
pub fn detach_kernel_driver<T: UsbContext>(mode: &mut DeviceMode, handle: &mut DeviceHandle<T>) -> Result<()> {
    mode.has_kernel_driver = match handle.kernel_driver_active(mode.interface_number) {
        Ok(true) => {
            handle.detach_kernel_driver(mode.interface_number)?;
            true
        }
        _ => false,
    };

    Ok(())
}

/// ### Endpoints
///
/// Locate the bulk and interrupt endpoints of the USBTMC interface.
///
pub fn endpoints<T: UsbContext>(mode: &DeviceMode, device: &Device<T>) -> Result<UsbtmcEndpoints> {
    let config_desc = device.config_descriptor(mode.config_number.saturating_sub(1))?;
    let interface = config_desc
        .interfaces()
        .find(|inter| inter.number() == mode.interface_number)
        .ok_or(UsbtmcError::InterfaceNotFound)?;
    let interface_desc = interface
        .descriptors()
        .find(|d| d.setting_number() == mode.setting_number)
        .ok_or(UsbtmcError::InterfaceSettingNotFound)?;

    let endpoints: Vec<Endpoint> = interface_desc
        .endpoint_descriptors()
        .map(|endpoint| Endpoint {
            address: endpoint.address(),
            max_packet_size: endpoint.max_packet_size(),
            transfer_type: endpoint.transfer_type(),
            direction: endpoint.direction(),
        })
        .collect();
    let find = |transfer_type, direction| {
        endpoints
            .iter()
            .find(|ep| ep.is(transfer_type, direction))
            .cloned()
    };

    Ok(UsbtmcEndpoints {
        bulk_out: find(TransferType::Bulk, Direction::Out).ok_or(UsbtmcError::BulkOutEndpointNotFound)?,
        bulk_in: find(TransferType::Bulk, Direction::In).ok_or(UsbtmcError::BulkInEndpointNotFound)?,
        interrupt: find(TransferType::Interrupt, Direction::In),
    })
}
