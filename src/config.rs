//! JSON configuration file support: the on-disk form of an `Options` that a
//! CLI or other caller can load before constructing a `ReplayContext`.
//! Only `Filename` sources and the manual-callback-free knobs round-trip
//! through JSON — a fd source or a callback has no serializable form, so
//! they're set on `Options` directly by the caller after loading.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ReplayError;
use crate::options::{AccurateMode, Options, SourceSpec, SpeedMode};

/// The serializable subset of `Options`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default = "default_loop_count")]
    pub loop_count: u32,
    #[serde(default)]
    pub sleep_accel: i32,
    #[serde(default)]
    pub use_pkthdr_len: bool,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    #[serde(default)]
    pub limit_send: Option<u64>,
    #[serde(default)]
    pub enable_file_cache: bool,
    #[serde(default)]
    pub accurate: AccurateMode,
    #[serde(default)]
    pub speed: SpeedMode,
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub intf1_name: Option<String>,
    #[serde(default)]
    pub intf2_name: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_loop_count() -> u32 {
    1
}

fn default_mtu() -> u32 {
    1500
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            loop_count: default_loop_count(),
            sleep_accel: 0,
            use_pkthdr_len: false,
            mtu: default_mtu(),
            limit_send: None,
            enable_file_cache: false,
            accurate: AccurateMode::default(),
            speed: SpeedMode::default(),
            sources: Vec::new(),
            intf1_name: None,
            intf2_name: None,
            comment: None,
        }
    }
}

impl ReplayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ReplayError::io(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| ReplayError::configuration(format!("parsing {}: {e}", path.display())))
    }

    pub fn from_file_or_default(path: impl AsRef<Path>) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ReplayError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ReplayError::configuration(format!("serializing config: {e}")))?;
        fs::write(path.as_ref(), json)
            .map_err(|e| ReplayError::io(format!("writing {}: {e}", path.as_ref().display())))
    }

    /// Build a runtime `Options` from this config. Any fd sources or manual
    /// callback the caller needs must be added to the result afterwards.
    pub fn into_options(self) -> Result<Options, ReplayError> {
        let mut options = Options::new();
        options.set_loop(self.loop_count);
        options.set_sleep_accel(self.sleep_accel);
        options.set_use_pkthdr_len(self.use_pkthdr_len);
        options.set_mtu(self.mtu as i32)?;
        options.set_accurate(self.accurate)?;
        options.set_speed_mode(self.speed)?;
        options.set_file_cache(self.enable_file_cache);
        options.set_limit_send(self.limit_send);
        options.intf1_name = self.intf1_name;
        options.intf2_name = self.intf2_name;
        options.comment = self.comment;
        for path in self.sources {
            options.add_pcapfile(path)?;
        }
        Ok(options)
    }

    pub fn from_options(options: &Options) -> Self {
        let sources = options
            .sources
            .iter()
            .filter_map(|s| match s {
                SourceSpec::Filename(path) => Some(path.clone()),
                _ => None,
            })
            .collect();
        Self {
            loop_count: options.loop_count,
            sleep_accel: options.sleep_accel,
            use_pkthdr_len: options.use_pkthdr_len,
            mtu: options.mtu,
            limit_send: options.limit_send,
            enable_file_cache: options.enable_file_cache,
            accurate: options.accurate,
            speed: options.speed,
            sources,
            intf1_name: options.intf1_name.clone(),
            intf2_name: options.intf2_name.clone(),
            comment: options.comment.clone(),
        }
    }
}
