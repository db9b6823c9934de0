//! PTP session lifecycle and command/response exchange.
//!
//! One [`PtpLink`] owns the transport and the transaction counter for the
//! duration of a query. All exchanges are strictly sequential: a command is
//! written, then containers are read back until the response arrives.

use std::thread;

use anyhow::Context as _;
use bytes::Buf;

use crate::ptp::{
    self, Container, ContainerKind, PtpError, ResponseCode, StandardCommandCode,
    CONTAINER_HEADER_LEN,
};
use crate::transport::{RetryPolicy, Transport};

/// The counter is reset to this sentinel before OpenSession so that the
/// first command issued carries transaction id 0.
const TRANSACTION_ID_SENTINEL: i64 = -1;

/// PTP sessions are opened with a fixed session id of 1.
const SESSION_ID: u32 = 1;

/// Upper bound for a single bulk read.
const READ_CHUNK_LEN: usize = 8 * 1024;

/// Outcome of one command: at most one data payload, then the response.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub data: Option<Vec<u8>>,
    pub response_code: u16,
}

impl Exchange {
    pub fn ok(&self) -> bool {
        self.response_code == ResponseCode::Ok as u16
    }
}

pub struct PtpLink {
    transport: Box<dyn Transport>,
    transaction_id: i64,
    session_open: bool,
    /// Carry-over bytes from reads that straddled a container boundary.
    pending: Vec<u8>,
    header_retry: RetryPolicy,
}

impl PtpLink {
    pub fn new(transport: Box<dyn Transport>, header_retry: RetryPolicy) -> Self {
        Self {
            transport,
            transaction_id: TRANSACTION_ID_SENTINEL,
            session_open: false,
            pending: Vec::new(),
            header_retry,
        }
    }

    pub fn is_open(&self) -> bool {
        self.session_open
    }

    fn next_transaction_id(&mut self) -> u32 {
        self.transaction_id += 1;
        self.transaction_id as u32
    }

    /// Sends one command and reads containers until its response arrives.
    pub fn execute(&mut self, code: impl Into<u16>, params: &[u32]) -> anyhow::Result<Exchange> {
        let code = code.into();
        let transaction_id = self.next_transaction_id();

        trace!(
            "sending {:#06x} (transaction {}, {} params)",
            code,
            transaction_id,
            params.len()
        );

        let command = ptp::encode_command(code, transaction_id, params);
        self.transport
            .write(&command)
            .with_context(|| format!("could not send command {:#06x}", code))?;

        let mut data = None;

        loop {
            let container = self.read_container()?;

            if container.header.transaction_id != transaction_id {
                debug!(
                    "container for transaction {} while waiting on {}",
                    container.header.transaction_id, transaction_id
                );
            }

            match container.header.kind {
                ContainerKind::Data => data = Some(container.payload),
                ContainerKind::Response => {
                    trace!(
                        "response {:#06x} for transaction {}",
                        container.header.code,
                        transaction_id
                    );

                    return Ok(Exchange {
                        data,
                        response_code: container.header.code,
                    });
                }
                ContainerKind::Command => {
                    return Err(PtpError::MalformedPacket)
                        .context("device sent a command container mid-exchange");
                }
            }
        }
    }

    /// Reads GetDevicePropValue for `prop`. A device that does not support
    /// the property answers with a bare response container; that is "no
    /// value", not an error.
    pub fn get_device_prop_value(&mut self, prop: u16) -> anyhow::Result<Option<u32>> {
        let exchange = self.execute(StandardCommandCode::GetDevicePropValue, &[prop as u32])?;

        let payload = match exchange.data {
            Some(payload) => payload,
            None => return Ok(None),
        };

        if payload.len() < 4 {
            return Err(PtpError::MalformedPacket)
                .with_context(|| format!("property {:#06x} payload too short", prop));
        }

        Ok(Some((&payload[..4]).get_u32_le()))
    }

    /// Opens the session. A device left with a stale session from an earlier
    /// client answers "already open"; recovery is one CloseSession followed
    /// by exactly one retried OpenSession.
    pub fn open(&mut self) -> anyhow::Result<()> {
        self.transaction_id = TRANSACTION_ID_SENTINEL;

        let exchange = self
            .execute(StandardCommandCode::OpenSession, &[SESSION_ID])
            .context("could not open session")?;

        if exchange.ok() {
            self.session_open = true;
            return Ok(());
        }

        if exchange.response_code != ResponseCode::SessionAlreadyOpen as u16 {
            return Err(PtpError::Protocol(exchange.response_code))
                .context("device refused to open session");
        }

        debug!("session already open, closing and retrying once");

        self.execute(StandardCommandCode::CloseSession, &[])
            .context("could not close stale session")?;

        self.transaction_id = TRANSACTION_ID_SENTINEL;

        let retry = self
            .execute(StandardCommandCode::OpenSession, &[SESSION_ID])
            .context("could not reopen session")?;

        if !retry.ok() {
            return Err(PtpError::Session).with_context(|| {
                format!("retried open failed with {:#06x}", retry.response_code)
            });
        }

        self.session_open = true;
        Ok(())
    }

    /// Closes the session. Runs during teardown, so failures are logged and
    /// swallowed.
    pub fn close(&mut self) {
        match self.execute(StandardCommandCode::CloseSession, &[]) {
            Ok(exchange) if exchange.ok() => trace!("session closed"),
            Ok(exchange) => warn!(
                "close session returned {:#06x}",
                exchange.response_code
            ),
            Err(err) => warn!("failed to close session: {:#}", err),
        }

        self.session_open = false;
    }

    /// Releases the transport. Best-effort: a failed release must not mask
    /// whatever error ended the query.
    pub fn release(&mut self) {
        if let Err(err) = self.transport.release() {
            warn!("failed to release transport: {:#}", err);
        }
    }

    fn read_container(&mut self) -> anyhow::Result<Container> {
        self.fill_pending(CONTAINER_HEADER_LEN)?;

        let header = ptp::decode_header(&self.pending)?;
        let total = header.length as usize;

        if total < CONTAINER_HEADER_LEN {
            return Err(PtpError::MalformedPacket).context("container length below header size");
        }

        self.fill_pending(total)?;

        let payload = self.pending[CONTAINER_HEADER_LEN..total].to_vec();
        self.pending.drain(..total);

        Ok(Container { header, payload })
    }

    /// Reads chunks until `wanted` bytes are buffered, tolerating a bounded
    /// number of empty reads.
    fn fill_pending(&mut self, wanted: usize) -> anyhow::Result<()> {
        let mut empty_reads = 0;

        while self.pending.len() < wanted {
            let chunk = self.transport.read(READ_CHUNK_LEN)?;

            if chunk.is_empty() {
                empty_reads += 1;

                if empty_reads >= self.header_retry.max_attempts {
                    return Err(PtpError::NoResponse.into());
                }

                thread::sleep(self.header_retry.interval);
                continue;
            }

            empty_reads = 0;
            self.pending.extend_from_slice(&chunk);
        }

        Ok(())
    }
}
