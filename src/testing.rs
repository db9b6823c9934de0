//! Test doubles shared across the protocol tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::BufMut;

use crate::ptp::{ContainerKind, CONTAINER_HEADER_LEN};
use crate::transport::Transport;

/// A transport that replays a fixed sequence of read chunks and records
/// every write. Once the script is exhausted, reads come back empty, which
/// the session layer treats as a silent device.
pub(crate) struct ScriptedTransport {
    reads: VecDeque<Vec<u8>>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    released: Arc<Mutex<bool>>,
}

impl ScriptedTransport {
    pub fn new(reads: Vec<Vec<u8>>) -> Self {
        Self {
            reads: reads.into(),
            written: Arc::new(Mutex::new(Vec::new())),
            released: Arc::new(Mutex::new(false)),
        }
    }

    pub fn written(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        self.written.clone()
    }

    pub fn released(&self) -> Arc<Mutex<bool>> {
        self.released.clone()
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, data: &[u8]) -> anyhow::Result<usize> {
        self.written.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn read(&mut self, _max_len: usize) -> anyhow::Result<Vec<u8>> {
        Ok(self.reads.pop_front().unwrap_or_default())
    }

    fn release(&mut self) -> anyhow::Result<()> {
        *self.released.lock().unwrap() = true;
        Ok(())
    }
}

fn container(kind: ContainerKind, code: u16, transaction_id: u32, payload: &[u8]) -> Vec<u8> {
    let length = CONTAINER_HEADER_LEN + payload.len();
    let mut buf = Vec::with_capacity(length);

    buf.put_u32_le(length as u32);
    buf.put_u16_le(kind as u16);
    buf.put_u16_le(code);
    buf.put_u32_le(transaction_id);
    buf.extend_from_slice(payload);

    buf
}

pub(crate) fn response(code: u16, transaction_id: u32) -> Vec<u8> {
    container(ContainerKind::Response, code, transaction_id, &[])
}

pub(crate) fn data_container(code: u16, transaction_id: u32, payload: &[u8]) -> Vec<u8> {
    container(ContainerKind::Data, code, transaction_id, payload)
}
