//! Timing controller, component F: turns a `SpeedMode` plus consecutive
//! packet metadata into a sleep deadline. Grounded on the teacher's
//! `capture/replay.rs` `apply_*` family (original-timing / fixed-rate /
//! speed-multiplier delay math), re-derived against absolute elapsed time
//! instead of a per-packet `tokio::time::sleep` so drift doesn't accumulate
//! pass over pass.

use std::time::{Duration, Instant, SystemTime};

use crate::options::SpeedMode;

/// Tracks the wall-clock/replay-clock correspondence established by the
/// first packet of a pass, so every subsequent delay is computed from that
/// anchor rather than chained off the previous packet's actual send time.
pub struct TimingController {
    speed: SpeedMode,
    sleep_accel: i32,
    replay_start: Option<Instant>,
    first_packet_ts: Option<SystemTime>,
    packets_in_burst: i32,
}

/// What the engine should do before sending the next packet.
pub enum TimingAction {
    /// Send immediately, no sleep needed (burst continuation or top speed).
    SendNow,
    /// Sleep until this deadline, then send.
    SleepUntil(Instant),
    /// Block on the external manual callback before sending.
    WaitForManualCallback,
}

impl TimingController {
    pub fn new(speed: SpeedMode, sleep_accel: i32) -> Self {
        Self {
            speed,
            sleep_accel,
            replay_start: None,
            first_packet_ts: None,
            packets_in_burst: 0,
        }
    }

    /// Reset the pass anchor; called at the start of every loop pass since
    /// original-timing and Mbps pacing both re-anchor per pass rather than
    /// carrying drift across loops.
    pub fn reset_pass(&mut self) {
        self.replay_start = None;
        self.first_packet_ts = None;
        self.packets_in_burst = 0;
    }

    /// Compute the action for the next packet, given its captured timestamp
    /// and encoded length (the `Options::use_pkthdr_len` choice decides
    /// which length field the caller passes in as `packet_len`).
    pub fn next_action(&mut self, packet_ts: SystemTime, packet_len: usize) -> TimingAction {
        match self.speed {
            SpeedMode::TopSpeed => TimingAction::SendNow,
            SpeedMode::OneAtATime => TimingAction::WaitForManualCallback,
            SpeedMode::Multiplier { value } => self.multiplier_action(packet_ts, value),
            SpeedMode::Mbps { value } => self.mbps_action(packet_len, value),
            SpeedMode::PacketRate { value, pps_multi } => {
                self.packet_rate_action(packet_len as u64, value, pps_multi)
            }
        }
    }

    fn anchor(&mut self, packet_ts: SystemTime) -> (Instant, SystemTime) {
        match (self.replay_start, self.first_packet_ts) {
            (Some(start), Some(first_ts)) => (start, first_ts),
            _ => {
                let now = Instant::now();
                self.replay_start = Some(now);
                self.first_packet_ts = Some(packet_ts);
                (now, packet_ts)
            }
        }
    }

    /// Replay at `value` times the capture's original inter-packet timing:
    /// target = anchor + (packet_ts - first_ts) / value.
    fn multiplier_action(&mut self, packet_ts: SystemTime, value: f32) -> TimingAction {
        let (start, first_ts) = self.anchor(packet_ts);
        if value <= 0.0 {
            return TimingAction::SendNow;
        }
        let capture_elapsed = packet_ts
            .duration_since(first_ts)
            .unwrap_or(Duration::ZERO);
        let scaled = capture_elapsed.div_f32(value);
        let scaled = self.apply_sleep_accel(scaled);
        TimingAction::SleepUntil(start + scaled)
    }

    /// Pace so bytes-per-second approaches `value` Mbps: every packet
    /// advances the anchor by `len * 8 / (value * 1e6)` seconds, accumulated
    /// rather than recomputed from a running total to avoid float drift.
    fn mbps_action(&mut self, packet_len: usize, value: f32) -> TimingAction {
        let (start, _) = self.anchor(SystemTime::now());
        if value <= 0.0 {
            return TimingAction::SendNow;
        }
        let bits = packet_len as f64 * 8.0;
        let seconds = bits / (value as f64 * 1_000_000.0);
        let delay = Duration::from_secs_f64(seconds.max(0.0));
        let delay = self.apply_sleep_accel(delay);
        self.replay_start = Some(start + delay);
        TimingAction::SleepUntil(start + delay)
    }

    /// Send `pps_multi` packets back-to-back, then sleep so the burst
    /// averages `value` packets per second.
    fn packet_rate_action(&mut self, _len: u64, value: f32, pps_multi: i32) -> TimingAction {
        self.packets_in_burst += 1;
        if self.packets_in_burst < pps_multi {
            return TimingAction::SendNow;
        }
        self.packets_in_burst = 0;
        if value <= 0.0 {
            return TimingAction::SendNow;
        }
        let burst_seconds = pps_multi as f64 / value as f64;
        let delay = self.apply_sleep_accel(Duration::from_secs_f64(burst_seconds));
        TimingAction::SleepUntil(Instant::now() + delay)
    }

    /// Subtract `sleep_accel` microseconds from the computed delay to
    /// compensate for scheduler overhead, clamped to zero rather than going
    /// negative. A negative `sleep_accel` lengthens the delay instead.
    fn apply_sleep_accel(&self, delay: Duration) -> Duration {
        if self.sleep_accel == 0 {
            return delay;
        }
        let adjusted = delay.as_micros() as i128 - self.sleep_accel as i128;
        if adjusted <= 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(adjusted as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_speed_never_sleeps() {
        let mut tc = TimingController::new(SpeedMode::TopSpeed, 0);
        matches!(
            tc.next_action(SystemTime::now(), 100),
            TimingAction::SendNow
        );
    }

    #[test]
    fn one_at_a_time_waits_for_callback() {
        let mut tc = TimingController::new(SpeedMode::OneAtATime, 0);
        assert!(matches!(
            tc.next_action(SystemTime::now(), 100),
            TimingAction::WaitForManualCallback
        ));
    }

    #[test]
    fn multiplier_first_packet_sends_immediately() {
        let mut tc = TimingController::new(SpeedMode::Multiplier { value: 1.0 }, 0);
        let now = SystemTime::now();
        match tc.next_action(now, 100) {
            TimingAction::SleepUntil(deadline) => {
                assert!(deadline <= Instant::now() + Duration::from_millis(5));
            }
            _ => panic!("expected SleepUntil"),
        }
    }

    #[test]
    fn packet_rate_bursts_before_sleeping() {
        let mut tc = TimingController::new(
            SpeedMode::PacketRate {
                value: 100.0,
                pps_multi: 3,
            },
            0,
        );
        assert!(matches!(
            tc.next_action(SystemTime::now(), 100),
            TimingAction::SendNow
        ));
        assert!(matches!(
            tc.next_action(SystemTime::now(), 100),
            TimingAction::SendNow
        ));
        assert!(matches!(
            tc.next_action(SystemTime::now(), 100),
            TimingAction::SleepUntil(_)
        ));
    }

    #[test]
    fn sleep_accel_shortens_delay() {
        // 10_000 bytes at 1 Mbps is an 80ms delay; subtracting 40_000us
        // should visibly shorten it relative to sleep_accel=0.
        let mut tc_normal = TimingController::new(SpeedMode::Mbps { value: 1.0 }, 0);
        let mut tc_fast = TimingController::new(SpeedMode::Mbps { value: 1.0 }, 40_000);
        let start = Instant::now();
        let normal = match tc_normal.next_action(SystemTime::now(), 10_000) {
            TimingAction::SleepUntil(d) => d,
            _ => panic!(),
        };
        let fast = match tc_fast.next_action(SystemTime::now(), 10_000) {
            TimingAction::SleepUntil(d) => d,
            _ => panic!(),
        };
        assert!(fast.saturating_duration_since(start) < normal.saturating_duration_since(start));
    }

    #[test]
    fn sleep_accel_clamps_to_zero_rather_than_going_negative() {
        let mut tc = TimingController::new(SpeedMode::Mbps { value: 1.0 }, 1_000_000);
        let start = Instant::now();
        let delay = match tc.next_action(SystemTime::now(), 10_000) {
            TimingAction::SleepUntil(d) => d,
            _ => panic!(),
        };
        assert!(delay.saturating_duration_since(start) == Duration::ZERO);
    }
}
