//! Routing cache, component D: bit-packed egress selection read from a
//! small custom binary file, per §4.D/§6. No preparer tool exists in the
//! corpus, so the format is invented here and documented in full.
//!
//! Layout: `[magic: u8 = 0xCA][version: u8 = 1][count: u32 LE]`
//! `[ceil(count/8) bytes of packed bits, MSB-first per byte]`
//! `[comment_len: u32 LE][comment: UTF-8 bytes]`.
//! Bit value 0 selects `Egress::Primary`, 1 selects `Egress::Secondary`.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::ReplayError;
use crate::types::Egress;

const MAGIC: u8 = 0xCA;
const VERSION: u8 = 1;

/// A bit per packet, addressed by that packet's position in the ordered
/// source stream. Built either by `read_cache` or incrementally.
#[derive(Debug, Clone, Default)]
pub struct RoutingCache {
    bits: Vec<u8>,
    count: usize,
    pub comment: Option<String>,
}

impl RoutingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn push(&mut self, egress: Egress) {
        let byte_idx = self.count / 8;
        if byte_idx >= self.bits.len() {
            self.bits.push(0);
        }
        if egress == Egress::Secondary {
            let bit_idx = 7 - (self.count % 8);
            self.bits[byte_idx] |= 1 << bit_idx;
        }
        self.count += 1;
    }

    /// Look up the egress for packet `index`. Per invariant in §4.D, a
    /// request past the end of a short cache falls back to `Primary` rather
    /// than erroring, since truncated routing data shouldn't halt a replay.
    pub fn route(&self, index: usize) -> Egress {
        if index >= self.count {
            return Egress::Primary;
        }
        let byte_idx = index / 8;
        let bit_idx = 7 - (index % 8);
        if self.bits[byte_idx] & (1 << bit_idx) != 0 {
            Egress::Secondary
        } else {
            Egress::Primary
        }
    }

    pub fn write_to(&self, mut w: impl Write) -> Result<(), ReplayError> {
        w.write_u8(MAGIC)
            .and_then(|_| w.write_u8(VERSION))
            .and_then(|_| w.write_u32::<LittleEndian>(self.count as u32))
            .and_then(|_| w.write_all(&self.bits))
            .map_err(|e| ReplayError::io(format!("writing routing cache: {e}")))?;
        let comment = self.comment.as_deref().unwrap_or("");
        w.write_u32::<LittleEndian>(comment.len() as u32)
            .and_then(|_| w.write_all(comment.as_bytes()))
            .map_err(|e| ReplayError::io(format!("writing routing cache comment: {e}")))
    }

    pub fn read_from(mut r: impl Read) -> Result<Self, ReplayError> {
        let magic = r
            .read_u8()
            .map_err(|e| ReplayError::io(format!("reading routing cache magic: {e}")))?;
        if magic != MAGIC {
            return Err(ReplayError::configuration(format!(
                "bad routing cache magic byte: {magic:#x}"
            )));
        }
        let version = r
            .read_u8()
            .map_err(|e| ReplayError::io(format!("reading routing cache version: {e}")))?;
        if version != VERSION {
            return Err(ReplayError::configuration(format!(
                "unsupported routing cache version: {version}"
            )));
        }
        let count = r
            .read_u32::<LittleEndian>()
            .map_err(|e| ReplayError::io(format!("reading routing cache count: {e}")))?
            as usize;
        let nbytes = count.div_ceil(8);
        let mut bits = vec![0u8; nbytes];
        r.read_exact(&mut bits)
            .map_err(|e| ReplayError::io(format!("reading routing cache bits: {e}")))?;
        let comment_len = r
            .read_u32::<LittleEndian>()
            .map_err(|e| ReplayError::io(format!("reading routing cache comment length: {e}")))?
            as usize;
        let mut comment_bytes = vec![0u8; comment_len];
        r.read_exact(&mut comment_bytes)
            .map_err(|e| ReplayError::io(format!("reading routing cache comment: {e}")))?;
        let comment = if comment_bytes.is_empty() {
            None
        } else {
            Some(String::from_utf8(comment_bytes).map_err(|e| {
                ReplayError::configuration(format!("routing cache comment not UTF-8: {e}"))
            })?)
        };
        Ok(Self {
            bits,
            count,
            comment,
        })
    }
}

pub fn read_cache(path: impl AsRef<std::path::Path>) -> Result<RoutingCache, ReplayError> {
    let file = std::fs::File::open(path.as_ref())
        .map_err(|e| ReplayError::io(format!("opening {}: {e}", path.as_ref().display())))?;
    RoutingCache::read_from(std::io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let mut cache = RoutingCache::new();
        for i in 0..20 {
            cache.push(if i % 3 == 0 {
                Egress::Secondary
            } else {
                Egress::Primary
            });
        }
        cache.comment = Some("test cache".to_string());

        let mut buf = Vec::new();
        cache.write_to(&mut buf).unwrap();
        let restored = RoutingCache::read_from(&buf[..]).unwrap();

        assert_eq!(restored.len(), cache.len());
        assert_eq!(restored.comment, cache.comment);
        for i in 0..20 {
            assert_eq!(restored.route(i), cache.route(i));
        }
    }

    #[test]
    fn out_of_range_defaults_to_primary() {
        let mut cache = RoutingCache::new();
        cache.push(Egress::Secondary);
        assert_eq!(cache.route(5), Egress::Primary);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0x00, VERSION, 0, 0, 0, 0];
        assert!(RoutingCache::read_from(&buf[..]).is_err());
    }
}
