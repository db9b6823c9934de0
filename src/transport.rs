//! Bulk USB transport for the PTP link.
//!
//! The protocol core only consumes the [`Transport`] trait; [`UsbTransport`]
//! is the rusb-backed implementation that claims the still-image interface
//! of an attached camera and exposes its bulk endpoint pair.

use std::time::Duration;

use anyhow::Context;
use rusb::{Device, DeviceHandle, Direction, GlobalContext, TransferType};

use crate::ptp::PtpError;

/// USB device class for still image capture devices (PTP).
const USB_CLASS_STILL_IMAGE: u8 = 6;

/// A bidirectional bulk byte channel to an already-attached device. A read
/// may return fewer bytes than requested (one bulk transfer at a time) and
/// may occasionally be empty.
pub trait Transport: Send {
    fn write(&mut self, data: &[u8]) -> anyhow::Result<usize>;
    fn read(&mut self, max_len: usize) -> anyhow::Result<Vec<u8>>;

    /// Gives the interface back to the OS. Runs during teardown; callers
    /// log failures instead of escalating them.
    fn release(&mut self) -> anyhow::Result<()>;
}

/// A bounded retry loop: at most `max_attempts` tries, `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: usize, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PtpInterface {
    number: u8,
    ep_in: u8,
    ep_out: u8,
}

/// Summary of a candidate camera, for `--list`.
#[derive(Debug, Clone)]
pub struct DeviceSummary {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product: Option<String>,
}

pub struct UsbTransport {
    handle: DeviceHandle<GlobalContext>,
    interface: PtpInterface,
    timeout: Duration,
    released: bool,
}

impl UsbTransport {
    /// Opens the first attached device that exposes a still-image interface
    /// with a bulk endpoint pair, optionally filtered by vendor/product id.
    pub fn open_first(
        vid: Option<u16>,
        pid: Option<u16>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let devices = rusb::devices().context("could not enumerate usb devices")?;

        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(descriptor) => descriptor,
                Err(_) => continue,
            };

            if vid.map_or(false, |vid| descriptor.vendor_id() != vid)
                || pid.map_or(false, |pid| descriptor.product_id() != pid)
            {
                continue;
            }

            let interface = match find_ptp_interface(&device) {
                Some(interface) => interface,
                None => continue,
            };

            debug!(
                "opening {:04x}:{:04x} on bus {:03} (interface {}, bulk in {:#04x}, bulk out {:#04x})",
                descriptor.vendor_id(),
                descriptor.product_id(),
                device.bus_number(),
                interface.number,
                interface.ep_in,
                interface.ep_out,
            );

            let handle = device
                .open()
                .context("could not open usb device (check permissions)")?;

            // a camera that was mounted as storage may still hold the interface
            let _ = handle.set_auto_detach_kernel_driver(true);

            handle
                .claim_interface(interface.number)
                .context("could not claim ptp interface")?;

            return Ok(Self {
                handle,
                interface,
                timeout,
                released: false,
            });
        }

        Err(PtpError::TransportUnavailable).context("no ptp-capable usb device found")
    }

    /// Enumerates every attached device with a still-image interface.
    pub fn list() -> anyhow::Result<Vec<DeviceSummary>> {
        let devices = rusb::devices().context("could not enumerate usb devices")?;
        let mut found = Vec::new();

        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(descriptor) => descriptor,
                Err(_) => continue,
            };

            if find_ptp_interface(&device).is_none() {
                continue;
            }

            let product = device
                .open()
                .and_then(|handle| handle.read_product_string_ascii(&descriptor))
                .ok();

            found.push(DeviceSummary {
                bus: device.bus_number(),
                address: device.address(),
                vendor_id: descriptor.vendor_id(),
                product_id: descriptor.product_id(),
                product,
            });
        }

        Ok(found)
    }
}

impl Transport for UsbTransport {
    fn write(&mut self, data: &[u8]) -> anyhow::Result<usize> {
        self.handle
            .write_bulk(self.interface.ep_out, data, self.timeout)
            .context("bulk write failed")
    }

    fn read(&mut self, max_len: usize) -> anyhow::Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len];

        match self
            .handle
            .read_bulk(self.interface.ep_in, &mut buf, self.timeout)
        {
            Ok(len) => {
                buf.truncate(len);
                Ok(buf)
            }
            // a timed-out transfer surfaces as an empty chunk; the session
            // layer bounds how many of those it will tolerate
            Err(rusb::Error::Timeout) => Ok(Vec::new()),
            Err(err) => Err(err).context("bulk read failed"),
        }
    }

    fn release(&mut self) -> anyhow::Result<()> {
        if self.released {
            return Ok(());
        }

        self.released = true;
        self.handle
            .release_interface(self.interface.number)
            .context("could not release ptp interface")
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.handle.release_interface(self.interface.number) {
                debug!("failed to release ptp interface on drop: {}", err);
            }
        }
    }
}

fn find_ptp_interface(device: &Device<GlobalContext>) -> Option<PtpInterface> {
    let config = device.active_config_descriptor().ok()?;

    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            if descriptor.class_code() != USB_CLASS_STILL_IMAGE {
                continue;
            }

            let mut ep_in = None;
            let mut ep_out = None;

            for endpoint in descriptor.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }

                match endpoint.direction() {
                    Direction::In => ep_in = Some(endpoint.address()),
                    Direction::Out => ep_out = Some(endpoint.address()),
                }
            }

            if let (Some(ep_in), Some(ep_out)) = (ep_in, ep_out) {
                return Some(PtpInterface {
                    number: descriptor.interface_number(),
                    ep_in,
                    ep_out,
                });
            }
        }
    }

    None
}
