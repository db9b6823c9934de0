//! One-shot camera query orchestration.

use anyhow::Context as _;
use serde::Serialize;

use crate::config::ShutterCountConfig;
use crate::device_info::DeviceInfo;
use crate::ptp::{PtpError, StandardCommandCode};
use crate::session::PtpLink;
use crate::transport::Transport;
use crate::vendor::Vendor;

/// Reported when no strategy produced a count, or the vendor is
/// unrecognized; the two cases are deliberately not distinguished.
pub const SHUTTER_COUNT_UNAVAILABLE: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraInfo {
    pub manufacturer: String,
    pub model: String,
    pub version: String,
    pub serial: String,
    pub shutter_count: i64,
}

/// Runs one full query against an already-established transport: open the
/// session, read the device identity, run the vendor strategy, then tear
/// everything down. Teardown happens on every exit path and never masks
/// the error that ended the query.
pub fn query_camera(
    transport: Box<dyn Transport>,
    config: &ShutterCountConfig,
) -> anyhow::Result<CameraInfo> {
    let mut link = PtpLink::new(transport, config.header_wait.policy());

    let result = run_query(&mut link, config);

    if link.is_open() {
        link.close();
    }
    link.release();

    result
}

fn run_query(link: &mut PtpLink, config: &ShutterCountConfig) -> anyhow::Result<CameraInfo> {
    link.open().context("could not establish ptp session")?;

    let exchange = link
        .execute(StandardCommandCode::GetDeviceInfo, &[])
        .context("could not read device info")?;

    if !exchange.ok() {
        return Err(PtpError::Protocol(exchange.response_code)).context("device info refused");
    }

    let payload = exchange
        .data
        .ok_or(PtpError::MalformedPacket)
        .context("device info response carried no data")?;

    let device = DeviceInfo::parse(&payload);

    info!(
        "connected to {} {} (serial {})",
        device.manufacturer, device.model, device.serial
    );

    let vendor = Vendor::detect(&device);

    let shutter_count = match vendor.strategy(
        config.event_drain.policy(),
        config.prop_poll.policy(),
    ) {
        Some(strategy) => strategy.acquire_shutter_count(link)?,
        None => {
            warn!(
                "unrecognized vendor (manufacturer {:?}, extension id {:#x}), \
                 shutter count unavailable",
                device.manufacturer, device.vendor_extension_id
            );
            None
        }
    };

    Ok(CameraInfo {
        manufacturer: device.manufacturer,
        model: device.model,
        version: device.version,
        serial: device.serial,
        shutter_count: shutter_count.unwrap_or(SHUTTER_COUNT_UNAVAILABLE),
    })
}
