pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod options;
pub mod routing;
pub mod send;
pub mod sleep;
pub mod source;
pub mod testutil;
pub mod timing;
pub mod types;

pub use config::ReplayConfig;
pub use context::{ReplayContext, ReplayControl};
pub use engine::replay;
pub use error::{ReplayError, TaggedMessage};
pub use options::{AccurateMode, InterfaceSlot, ManualCallback, Options, SourceSpec, SpeedMode};
pub use routing::{read_cache, RoutingCache};
pub use send::SendPacket;
pub use source::PacketSource;
pub use types::{Direction, Egress, LinkType, RawPacket, ReplayOutcome, Stats, StatsSnapshot};

/// Thin `(0, -1, -2)`-style wrapper mirroring the original C API's return
/// convention, for callers migrating from it rather than adopting
/// `Result` directly.
pub mod replay_compat {
    use super::*;

    /// Returns `0` on normal completion, `-1` on abort, `-2` on error.
    /// `idx` follows `engine::replay`'s convention: `-1` for all sources,
    /// `0 <= idx < source_cnt` for exactly one.
    pub fn replay(ctx: &mut ReplayContext, idx: i32) -> i32 {
        match engine::replay(ctx, idx) {
            Ok(ReplayOutcome::Completed) => 0,
            Ok(ReplayOutcome::Aborted) => -1,
            Err(_) => -2,
        }
    }
}
