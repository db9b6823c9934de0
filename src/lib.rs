//! PTP client for reading a camera's identity and shutter actuation count
//! over a USB bulk transport.

#[macro_use]
extern crate tracing;

#[macro_use]
extern crate num_derive;

pub mod client;
pub mod config;
pub mod device_info;
pub mod ptp;
pub mod session;
pub mod transport;
pub mod vendor;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{query_camera, CameraInfo, SHUTTER_COUNT_UNAVAILABLE};
pub use config::ShutterCountConfig;
pub use ptp::PtpError;
