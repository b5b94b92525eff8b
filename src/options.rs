use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ReplayError;

/// Maximum number of sources a single `Options` may carry, matching the
/// original `MAX_FILES` ceiling.
pub const MAX_FILES: usize = 1024;

/// Packet emission rate model. See §4.F.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SpeedMode {
    /// Replay at `value` times the capture's original inter-packet timing.
    Multiplier { value: f32 },
    /// Pace sends so cumulative throughput approaches `value` Mbps.
    Mbps { value: f32 },
    /// Send `pps_multi` packets as a burst, then sleep to average `value` pps.
    PacketRate { value: f32, pps_multi: i32 },
    /// No pacing at all.
    TopSpeed,
    /// Each packet waits for an external `manual_callback` to return.
    OneAtATime,
}

impl SpeedMode {
    fn validate(&self) -> Result<(), ReplayError> {
        match *self {
            SpeedMode::Multiplier { value } | SpeedMode::Mbps { value } if value < 0.0 => Err(
                ReplayError::configuration("speed value must be >= 0"),
            ),
            SpeedMode::PacketRate { value, pps_multi } => {
                if value < 0.0 {
                    Err(ReplayError::configuration("speed value must be >= 0"))
                } else if pps_multi < 1 {
                    Err(ReplayError::configuration("pps_multi must be >= 1"))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

impl Default for SpeedMode {
    fn default() -> Self {
        // Replay packets once, in real time — the original default.
        SpeedMode::Multiplier { value: 1.0 }
    }
}

/// Sleep-backend selector. See §4.A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccurateMode {
    GetTimeOfDay,
    NanoSleep,
    Select,
    Rdtsc,
    IoPort,
    AbsTime,
}

impl Default for AccurateMode {
    fn default() -> Self {
        AccurateMode::AbsTime
    }
}

/// Selects which of the two egresses a `set_interface` call targets, per §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceSlot {
    Primary,
    Secondary,
}

/// One entry in the ordered source list.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    Filename(PathBuf),
    Fd(RawFd),
    /// Replay directly from the in-memory packet cache for this index,
    /// bypassing the file/fd source entirely.
    Cache,
}

/// Caller-supplied gate for `SpeedMode::OneAtATime`: called once per
/// packet, returns when the caller wants the next packet sent.
pub type ManualCallback = Arc<dyn Fn() + Send + Sync>;

/// Replay configuration. Setters validate and store; nothing here opens a
/// file descriptor or network handle — that happens in `ReplayContext`,
/// which is also where link-layer consistency and interface resolution are
/// enforced (they depend on state beyond a single setter call).
#[derive(Clone, Default)]
pub struct Options {
    pub loop_count: u32,
    pub sleep_accel: i32,
    pub use_pkthdr_len: bool,
    pub mtu: u32,
    pub limit_send: Option<u64>,
    pub enable_file_cache: bool,
    pub accurate: AccurateMode,
    pub speed: SpeedMode,
    pub sources: Vec<SourceSpec>,
    pub intf1_name: Option<String>,
    pub intf2_name: Option<String>,
    pub comment: Option<String>,
    pub manual_callback: Option<ManualCallback>,
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("loop_count", &self.loop_count)
            .field("sleep_accel", &self.sleep_accel)
            .field("use_pkthdr_len", &self.use_pkthdr_len)
            .field("mtu", &self.mtu)
            .field("limit_send", &self.limit_send)
            .field("enable_file_cache", &self.enable_file_cache)
            .field("accurate", &self.accurate)
            .field("speed", &self.speed)
            .field("sources", &self.sources)
            .field("intf1_name", &self.intf1_name)
            .field("intf2_name", &self.intf2_name)
            .field("comment", &self.comment)
            .field("manual_callback", &self.manual_callback.is_some())
            .finish()
    }
}

impl Options {
    pub fn new() -> Self {
        Self {
            loop_count: 1,
            mtu: 1500,
            accurate: AccurateMode::default(),
            speed: SpeedMode::default(),
            ..Default::default()
        }
    }

    pub fn set_speed_mode(&mut self, mode: SpeedMode) -> Result<(), ReplayError> {
        mode.validate()?;
        self.speed = mode;
        Ok(())
    }

    pub fn set_loop(&mut self, value: u32) {
        self.loop_count = value;
    }

    pub fn set_sleep_accel(&mut self, value: i32) {
        self.sleep_accel = value;
    }

    pub fn set_use_pkthdr_len(&mut self, value: bool) {
        self.use_pkthdr_len = value;
    }

    pub fn set_mtu(&mut self, value: i32) -> Result<(), ReplayError> {
        if value < 64 {
            return Err(ReplayError::configuration("mtu must be >= 64"));
        }
        self.mtu = value as u32;
        Ok(())
    }

    pub fn set_accurate(&mut self, value: AccurateMode) -> Result<(), ReplayError> {
        if !crate::sleep::SleepBackendKind::from(value).is_available() {
            return Err(ReplayError::configuration(format!(
                "sleep backend {:?} is not available in this build",
                value
            )));
        }
        self.accurate = value;
        Ok(())
    }

    pub fn set_file_cache(&mut self, value: bool) {
        self.enable_file_cache = value;
    }

    pub fn add_pcapfile(&mut self, path: impl AsRef<Path>) -> Result<(), ReplayError> {
        if self.sources.len() >= MAX_FILES {
            return Err(ReplayError::configuration(format!(
                "unable to add more than {} files",
                MAX_FILES
            )));
        }
        self.sources
            .push(SourceSpec::Filename(path.as_ref().to_path_buf()));
        Ok(())
    }

    pub fn add_fd_source(&mut self, fd: RawFd) -> Result<(), ReplayError> {
        if self.sources.len() >= MAX_FILES {
            return Err(ReplayError::configuration(format!(
                "unable to add more than {} files",
                MAX_FILES
            )));
        }
        self.sources.push(SourceSpec::Fd(fd));
        Ok(())
    }

    /// Add a source whose packets are supplied directly to the in-memory
    /// cache rather than read from a file or fd — used to pre-load
    /// synthetic packet streams (tests, or a caller building its own
    /// capture in memory).
    pub fn add_cache_source(&mut self) -> Result<(), ReplayError> {
        if self.sources.len() >= MAX_FILES {
            return Err(ReplayError::configuration(format!(
                "unable to add more than {} files",
                MAX_FILES
            )));
        }
        self.sources.push(SourceSpec::Cache);
        Ok(())
    }

    pub fn set_limit_send(&mut self, value: Option<u64>) {
        self.limit_send = value;
    }

    pub fn set_manual_callback(&mut self, callback: ManualCallback) -> Result<(), ReplayError> {
        if self.speed != SpeedMode::OneAtATime {
            return Err(ReplayError::configuration(
                "manual callback requires speed mode OneAtATime",
            ));
        }
        self.manual_callback = Some(callback);
        Ok(())
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}
