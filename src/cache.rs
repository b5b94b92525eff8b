//! In-memory packet cache, component E: an arena-backed store so a source
//! read once can be replayed on every subsequent loop pass without
//! re-reading the file, per Design Notes §9 (a growing byte buffer plus a
//! record index, replacing the original's linked list of per-packet heap
//! allocations).

use std::time::SystemTime;

use crate::types::RawPacket;

#[derive(Debug, Clone, Copy)]
struct PacketRecord {
    offset: usize,
    len: usize,
    ts: SystemTime,
    original_len: usize,
}

/// One source's worth of cached packets. `append` is only ever called
/// while reading the source for the first time; every later pass reads via
/// `get`.
#[derive(Debug, Default)]
pub struct PacketMemoryCache {
    bytes: Vec<u8>,
    records: Vec<PacketRecord>,
    sealed: bool,
}

impl PacketMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Record one packet's bytes into the arena. Panics if called after
    /// `seal()` — append-after-seal is a programming error in the engine,
    /// not a runtime condition callers can hit.
    pub fn append(&mut self, packet: &RawPacket) {
        assert!(!self.sealed, "cannot append to a sealed packet cache");
        let offset = self.bytes.len();
        self.bytes.extend_from_slice(&packet.data);
        self.records.push(PacketRecord {
            offset,
            len: packet.data.len(),
            ts: packet.ts,
            original_len: packet.original_len,
        });
    }

    /// Mark the cache complete: the source was fully drained in pass one.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn get(&self, index: usize) -> Option<RawPacket> {
        let record = self.records.get(index)?;
        let data = self.bytes[record.offset..record.offset + record.len].to_vec();
        Some(RawPacket {
            ts: record.ts,
            captured_len: record.len,
            original_len: record.original_len,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(n: u8) -> RawPacket {
        RawPacket {
            ts: SystemTime::now(),
            captured_len: 3,
            original_len: 3,
            data: vec![n; 3],
        }
    }

    #[test]
    fn appends_and_reads_back_in_order() {
        let mut cache = PacketMemoryCache::new();
        cache.append(&packet(1));
        cache.append(&packet(2));
        cache.seal();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(0).unwrap().data, vec![1, 1, 1]);
        assert_eq!(cache.get(1).unwrap().data, vec![2, 2, 2]);
        assert!(cache.get(2).is_none());
    }

    #[test]
    #[should_panic]
    fn append_after_seal_panics() {
        let mut cache = PacketMemoryCache::new();
        cache.seal();
        cache.append(&packet(1));
    }
}
