//! PTP container framing and primitive decoding.
//!
//! Every unit on the wire is a container: a 12-byte little-endian header
//! (`length`, `type`, `code`, `transaction id`) followed by a payload. For
//! command and response containers the payload is an array of 32-bit
//! parameter words; for data containers it is opaque bytes.

use std::{
    error::Error,
    fmt::{self, Display},
};

use bytes::{Buf, BufMut};
use num_traits::FromPrimitive;

/// Size of the container header on the wire.
pub const CONTAINER_HEADER_LEN: usize = 12;

#[repr(u16)]
#[derive(ToPrimitive, FromPrimitive, Copy, Clone, Eq, PartialEq, Debug)]
pub enum ContainerKind {
    Command = 1,
    Data = 2,
    Response = 3,
}

#[repr(u16)]
#[derive(ToPrimitive, FromPrimitive, Copy, Clone, Eq, PartialEq, Debug)]
pub enum StandardCommandCode {
    GetDeviceInfo = 0x1001,
    OpenSession = 0x1002,
    CloseSession = 0x1003,
    GetDevicePropValue = 0x1015,
}

impl From<StandardCommandCode> for u16 {
    fn from(code: StandardCommandCode) -> u16 {
        code as u16
    }
}

#[repr(u16)]
#[derive(ToPrimitive, FromPrimitive, Copy, Clone, Eq, PartialEq, Debug)]
pub enum ResponseCode {
    Ok = 0x2001,
    SessionAlreadyOpen = 0x201E,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtpError {
    TransportUnavailable,
    MalformedPacket,
    NoResponse,
    Protocol(u16),
    Session,
    VendorInit,
}

impl Display for PtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PtpError::TransportUnavailable => {
                write!(f, "no usable ptp interface on this device")
            }
            PtpError::MalformedPacket => write!(f, "malformed ptp container"),
            PtpError::NoResponse => write!(f, "device did not respond"),
            PtpError::Protocol(code) => {
                write!(f, "operation failed with response code {:#06x}", code)
            }
            PtpError::Session => write!(f, "could not open ptp session"),
            PtpError::VendorInit => write!(f, "vendor setup sequence failed"),
        }
    }
}

impl Error for PtpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Total container length in bytes, header included.
    pub length: u32,
    pub kind: ContainerKind,
    pub code: u16,
    pub transaction_id: u32,
}

#[derive(Debug, Clone)]
pub struct Container {
    pub header: ContainerHeader,
    /// Container bytes after the header.
    pub payload: Vec<u8>,
}

/// Builds a command container carrying `params` as little-endian words.
pub fn encode_command(code: u16, transaction_id: u32, params: &[u32]) -> Vec<u8> {
    let length = CONTAINER_HEADER_LEN + 4 * params.len();
    let mut buf = Vec::with_capacity(length);

    buf.put_u32_le(length as u32);
    buf.put_u16_le(ContainerKind::Command as u16);
    buf.put_u16_le(code);
    buf.put_u32_le(transaction_id);

    for &param in params {
        buf.put_u32_le(param);
    }

    buf
}

/// Decodes the leading container header from `buf`.
pub fn decode_header(buf: &[u8]) -> Result<ContainerHeader, PtpError> {
    if buf.len() < CONTAINER_HEADER_LEN {
        return Err(PtpError::MalformedPacket);
    }

    let mut buf = buf;
    let length = buf.get_u32_le();
    let kind = buf.get_u16_le();
    let code = buf.get_u16_le();
    let transaction_id = buf.get_u32_le();

    let kind = ContainerKind::from_u16(kind).ok_or(PtpError::MalformedPacket)?;

    Ok(ContainerHeader {
        length,
        kind,
        code,
        transaction_id,
    })
}

/// Decodes a PTP string at `*offset`: one count byte (character count,
/// terminating NUL included), then that many UTF-16LE code units. The NUL is
/// consumed but excluded from the output. A buffer that ends mid-string
/// truncates the result rather than failing; device responses are sometimes
/// cut short at chunk boundaries upstream.
pub fn read_ptp_string(buf: &[u8], offset: &mut usize) -> String {
    if *offset >= buf.len() {
        return String::new();
    }

    let count = buf[*offset] as usize;
    *offset += 1;

    let mut units = Vec::with_capacity(count);

    for _ in 0..count {
        if *offset + 2 > buf.len() {
            break;
        }

        let unit = u16::from_le_bytes([buf[*offset], buf[*offset + 1]]);
        *offset += 2;

        if unit == 0 {
            break;
        }

        units.push(unit);
    }

    String::from_utf16_lossy(&units)
}
