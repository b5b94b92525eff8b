//! Test doubles shared between unit and integration tests. Kept as a
//! regular (always-compiled) module rather than `#[cfg(test)]` so
//! `tests/integration.rs`, which links against this crate as an external
//! consumer, can use them too.

use std::time::SystemTime;

use crate::error::ReplayError;
use crate::source::PacketSource;
use crate::types::{LinkType, RawPacket};

/// An in-memory, rewindable packet source for driving the engine without a
/// capture file on disk.
pub struct MemorySource {
    packets: Vec<RawPacket>,
    index: usize,
    dlt: LinkType,
}

impl MemorySource {
    pub fn new(dlt: LinkType, packets: Vec<RawPacket>) -> Self {
        Self {
            packets,
            index: 0,
            dlt,
        }
    }
}

impl PacketSource for MemorySource {
    fn dlt(&self) -> LinkType {
        self.dlt
    }

    fn next_packet(&mut self) -> Result<Option<RawPacket>, ReplayError> {
        if self.index >= self.packets.len() {
            return Ok(None);
        }
        let packet = self.packets[self.index].clone();
        self.index += 1;
        Ok(Some(packet))
    }

    fn rewind(&mut self) -> Result<(), ReplayError> {
        self.index = 0;
        Ok(())
    }
}

pub fn sample_packet(n: u8, len: usize) -> RawPacket {
    RawPacket {
        ts: SystemTime::now(),
        captured_len: len,
        original_len: len,
        data: vec![n; len],
    }
}
