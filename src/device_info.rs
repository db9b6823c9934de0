//! GetDeviceInfo payload parsing.
//!
//! The device-info structure is variable length: fixed fields, five counted
//! arrays of 16-bit codes, then the identity strings. Only the vendor
//! extension id and the four identity strings are kept; everything else is
//! consumed and skipped. Camera firmware is known to emit slightly short
//! payloads, so an offset that runs past the end truncates the affected
//! field instead of failing the parse.

use crate::ptp::read_ptp_string;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor_extension_id: u32,
    pub manufacturer: String,
    pub model: String,
    pub version: String,
    pub serial: String,
}

impl DeviceInfo {
    /// Parses the payload of a GetDeviceInfo data container.
    pub fn parse(payload: &[u8]) -> Self {
        let mut offset = 0;

        let _standard_version = read_u16(payload, &mut offset);
        let vendor_extension_id = read_u32(payload, &mut offset);
        let _vendor_extension_version = read_u16(payload, &mut offset);
        let _vendor_extension_desc = read_ptp_string(payload, &mut offset);
        let _functional_mode = read_u16(payload, &mut offset);

        // operations, events, device properties, capture formats, image
        // formats: `count: u32` followed by `count` 16-bit codes apiece,
        // none of which matter here
        for _ in 0..5 {
            skip_code_array(payload, &mut offset);
        }

        let manufacturer = read_ptp_string(payload, &mut offset);
        let model = read_ptp_string(payload, &mut offset);
        let version = read_ptp_string(payload, &mut offset);
        let serial = read_ptp_string(payload, &mut offset);

        DeviceInfo {
            vendor_extension_id,
            manufacturer,
            model,
            version,
            serial,
        }
    }
}

fn read_u16(buf: &[u8], offset: &mut usize) -> u16 {
    if *offset + 2 > buf.len() {
        *offset = buf.len();
        return 0;
    }

    let value = u16::from_le_bytes([buf[*offset], buf[*offset + 1]]);
    *offset += 2;
    value
}

fn read_u32(buf: &[u8], offset: &mut usize) -> u32 {
    if *offset + 4 > buf.len() {
        *offset = buf.len();
        return 0;
    }

    let value = u32::from_le_bytes([
        buf[*offset],
        buf[*offset + 1],
        buf[*offset + 2],
        buf[*offset + 3],
    ]);
    *offset += 4;
    value
}

/// Skips a `count: u32` array of 16-bit codes without interpreting them.
fn skip_code_array(buf: &[u8], offset: &mut usize) {
    let count = read_u32(buf, offset) as usize;
    *offset = buf.len().min(offset.saturating_add(count.saturating_mul(2)));
}
