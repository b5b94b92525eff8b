use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

/// A single captured packet, as handed to the engine by a `PacketSource`.
///
/// Mirrors the `(timestamp, captured_length, original_length, bytes)` tuple
/// the spec assumes the external capture library provides.
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub ts: SystemTime,
    pub captured_len: usize,
    pub original_len: usize,
    pub data: Vec<u8>,
}

/// Which egress interface a packet is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Egress {
    Primary,
    Secondary,
}

/// Advisory label passed to `SendPacket::open`, carried over from the
/// client-to-server / server-to-client framing of the two-egress model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// Link-layer type identifier, as reported by a capture/send backend.
/// Opaque beyond equality — this crate never interprets the values, only
/// checks they agree across both egresses (invariant 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkType(pub i32);

/// Live, concurrently-observable replay statistics.
///
/// Counters are independent atomics rather than fields behind one lock:
/// `get_stats` is documented to tolerate torn reads across counters (see
/// the concurrency model), so there's no correctness reason to serialize
/// access to them.
#[derive(Debug, Default)]
pub struct Stats {
    pub pkts_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub failed: AtomicU64,
    start_time: Mutex<Option<SystemTime>>,
    end_time: Mutex<Option<SystemTime>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, bytes: usize) {
        self.pkts_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_start_time(&self, t: SystemTime) {
        *self.start_time.lock().unwrap() = Some(t);
    }

    pub fn set_end_time(&self, t: SystemTime) {
        *self.end_time.lock().unwrap() = Some(t);
    }

    pub fn start_time(&self) -> Option<SystemTime> {
        *self.start_time.lock().unwrap()
    }

    pub fn end_time(&self) -> Option<SystemTime> {
        *self.end_time.lock().unwrap()
    }

    /// Snapshot the live counters into an owned, immutable record — the
    /// Rust analog of `tcpreplay_get_stats`'s `memcpy` into `static_stats`.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pkts_sent: self.pkts_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            start_time: self.start_time(),
            end_time: self.end_time(),
        }
    }
}

/// The `static_stats` snapshot: an owned copy handed back to observers.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub pkts_sent: u64,
    pub bytes_sent: u64,
    pub failed: u64,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
}

/// How a `replay()` call ended, distinguishing abort from normal completion
/// without requiring the caller to diff stats snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    Completed,
    Aborted,
}
