//! End-to-end replay scenarios, driven entirely through cache-backed
//! sources so they run without a real capture file or live interface.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use replay_engine::context::ReplayContext;
use replay_engine::options::{Options, SpeedMode};
use replay_engine::routing::RoutingCache;
use replay_engine::send::LoopbackSendPacket;
use replay_engine::testutil::sample_packet;
use replay_engine::types::{Egress, LinkType, ReplayOutcome};
use replay_engine::{engine, replay_compat, ReplayError};

fn seeded_context(packets: usize, speed: SpeedMode) -> ReplayContext {
    let mut options = Options::new();
    options.set_speed_mode(speed).unwrap();
    options.add_cache_source().unwrap();
    let mut ctx = ReplayContext::new(options);
    for i in 0..packets {
        ctx.cache_mut(0).append(&sample_packet(i as u8, 64));
    }
    ctx.cache_mut(0).seal();
    ctx.set_primary_for_test(Box::new(LoopbackSendPacket::new(LinkType(1))));
    ctx
}

#[test]
fn top_speed_sends_every_packet_once() {
    let mut ctx = seeded_context(25, SpeedMode::TopSpeed);
    let outcome = engine::replay(&mut ctx, -1).unwrap();
    assert_eq!(outcome, ReplayOutcome::Completed);
    let stats = ctx.get_stats();
    assert_eq!(stats.pkts_sent, 25);
    assert_eq!(stats.failed, 0);
}

#[test]
fn loop_count_replays_the_same_source_n_times() {
    let mut ctx = seeded_context(4, SpeedMode::TopSpeed);
    ctx.options.set_loop(3);
    let outcome = engine::replay(&mut ctx, -1).unwrap();
    assert_eq!(outcome, ReplayOutcome::Completed);
    assert_eq!(ctx.get_stats().pkts_sent, 12);
}

#[test]
fn limit_send_halts_before_every_pass_completes() {
    let mut ctx = seeded_context(10, SpeedMode::TopSpeed);
    ctx.options.set_loop(5);
    ctx.options.set_limit_send(Some(7));
    let outcome = engine::replay(&mut ctx, -1).unwrap();
    assert_eq!(outcome, ReplayOutcome::Completed);
    assert_eq!(ctx.get_stats().pkts_sent, 7);
}

#[test]
fn abort_before_replay_starts_yields_aborted_immediately() {
    let mut ctx = seeded_context(100, SpeedMode::Multiplier { value: 1.0 });
    ctx.abort();
    let outcome = engine::replay(&mut ctx, -1).unwrap();
    assert_eq!(outcome, ReplayOutcome::Aborted);
}

#[test]
fn abort_from_another_thread_stops_a_slow_replay_quickly() {
    // Mbps-paced replay over widely spaced packets would otherwise take
    // seconds; an abort issued from an observer thread holding only the
    // cloned `ReplayControl` handle should cut it short well within that
    // budget, exercising the cross-thread half of the concurrency model.
    let mut ctx = seeded_context(3, SpeedMode::Mbps { value: 0.001 });
    let control = ctx.control();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        control.abort();
    });
    let start = std::time::Instant::now();
    let outcome = engine::replay(&mut ctx, -1).unwrap();
    handle.join().unwrap();
    assert_eq!(outcome, ReplayOutcome::Aborted);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn suspend_then_restart_still_delivers_all_packets() {
    let mut ctx = seeded_context(6, SpeedMode::TopSpeed);
    let control = ctx.control();
    control.suspend();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        control.restart();
    });
    let outcome = engine::replay(&mut ctx, -1).unwrap();
    handle.join().unwrap();
    assert_eq!(outcome, ReplayOutcome::Completed);
    assert_eq!(ctx.get_stats().pkts_sent, 6);
}

#[test]
fn replay_compat_returns_c_style_codes() {
    let mut completed = seeded_context(2, SpeedMode::TopSpeed);
    assert_eq!(replay_compat::replay(&mut completed, -1), 0);

    let mut aborted = seeded_context(2, SpeedMode::TopSpeed);
    aborted.abort();
    assert_eq!(replay_compat::replay(&mut aborted, -1), -1);

    let mut no_sources = ReplayContext::new(Options::new());
    assert_eq!(replay_compat::replay(&mut no_sources, -1), -2);
}

#[test]
fn routing_cache_splits_traffic_across_two_egresses() {
    let mut ctx = seeded_context(10, SpeedMode::TopSpeed);
    for i in 0..10 {
        ctx.routing.push(if i % 2 == 0 {
            Egress::Primary
        } else {
            Egress::Secondary
        });
    }
    ctx.set_secondary_for_test(Box::new(LoopbackSendPacket::new(LinkType(1))));
    let outcome = engine::replay(&mut ctx, -1).unwrap();
    assert_eq!(outcome, ReplayOutcome::Completed);
    assert_eq!(ctx.get_stats().pkts_sent, 10);
}

#[test]
fn routing_cache_file_round_trips_and_drives_replay() {
    let mut cache = RoutingCache::new();
    for i in 0..8 {
        cache.push(if i < 4 { Egress::Primary } else { Egress::Secondary });
    }
    let mut buf = Vec::new();
    cache.write_to(&mut buf).unwrap();
    let restored = RoutingCache::read_from(&buf[..]).unwrap();

    let mut ctx = seeded_context(8, SpeedMode::TopSpeed);
    ctx.routing = restored;
    ctx.set_secondary_for_test(Box::new(LoopbackSendPacket::new(LinkType(1))));
    let outcome = engine::replay(&mut ctx, -1).unwrap();
    assert_eq!(outcome, ReplayOutcome::Completed);
}

#[test]
fn one_at_a_time_waits_for_external_gate_every_packet() {
    let mut options = Options::new();
    options.set_speed_mode(SpeedMode::OneAtATime).unwrap();
    options.add_cache_source().unwrap();
    let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let calls2 = calls.clone();
    options
        .set_manual_callback(Arc::new(move || {
            calls2.fetch_add(1, Ordering::Relaxed);
        }))
        .unwrap();
    let mut ctx = ReplayContext::new(options);
    for i in 0..5 {
        ctx.cache_mut(0).append(&sample_packet(i, 32));
    }
    ctx.cache_mut(0).seal();
    ctx.set_primary_for_test(Box::new(LoopbackSendPacket::new(LinkType(1))));

    let outcome = engine::replay(&mut ctx, -1).unwrap();
    assert_eq!(outcome, ReplayOutcome::Completed);
    assert_eq!(calls.load(Ordering::Relaxed), 5);
    assert_eq!(ctx.get_stats().pkts_sent, 5);
}

proptest! {
    /// Packets sent plus packets failed always equals packets attempted,
    /// regardless of where a simulated short write lands (§8 invariant:
    /// stats are exhaustive and mutually exclusive per packet).
    #[test]
    fn stats_partition_every_attempted_packet(
        count in 1usize..40,
        fail_at in 0usize..40,
    ) {
        let mut options = Options::new();
        options.set_speed_mode(SpeedMode::TopSpeed).unwrap();
        options.add_cache_source().unwrap();
        let mut ctx = ReplayContext::new(options);
        for i in 0..count {
            ctx.cache_mut(0).append(&sample_packet(i as u8, 16));
        }
        ctx.cache_mut(0).seal();
        let sp = if fail_at < count {
            LoopbackSendPacket::new(LinkType(1)).fail_at_index(fail_at)
        } else {
            LoopbackSendPacket::new(LinkType(1))
        };
        ctx.set_primary_for_test(Box::new(sp));

        engine::replay(&mut ctx, -1).unwrap();
        let stats = ctx.get_stats();
        prop_assert_eq!(stats.pkts_sent + stats.failed, count as u64);
    }

    /// `RoutingCache::route` never panics and always returns a valid
    /// egress for any index, in range or not.
    #[test]
    fn routing_cache_route_is_total(entries in prop::collection::vec(any::<bool>(), 0..64), probe in 0usize..128) {
        let mut cache = RoutingCache::new();
        for e in &entries {
            cache.push(if *e { Egress::Secondary } else { Egress::Primary });
        }
        let _ = cache.route(probe);
    }
}

#[test]
fn replay_with_explicit_idx_sends_only_that_source() {
    let mut options = Options::new();
    options.set_speed_mode(SpeedMode::TopSpeed).unwrap();
    options.add_cache_source().unwrap();
    options.add_cache_source().unwrap();
    let mut ctx = ReplayContext::new(options);
    for i in 0..3 {
        ctx.cache_mut(0).append(&sample_packet(i, 16));
    }
    ctx.cache_mut(0).seal();
    for i in 0..5 {
        ctx.cache_mut(1).append(&sample_packet(i, 16));
    }
    ctx.cache_mut(1).seal();
    ctx.set_primary_for_test(Box::new(LoopbackSendPacket::new(LinkType(1))));

    let outcome = engine::replay(&mut ctx, 1).unwrap();
    assert_eq!(outcome, ReplayOutcome::Completed);
    assert_eq!(ctx.get_stats().pkts_sent, 5);
}

#[test]
fn replay_with_out_of_range_idx_is_rejected() {
    let mut ctx = seeded_context(2, SpeedMode::TopSpeed);
    let err = engine::replay(&mut ctx, 3).unwrap_err();
    assert!(matches!(err, ReplayError::InvalidArgument(_)));
}

#[test]
fn set_tcpprep_cache_rejects_more_than_one_source() {
    let mut options = Options::new();
    options.add_cache_source().unwrap();
    options.add_cache_source().unwrap();
    let mut ctx = ReplayContext::new(options);

    let path = std::env::temp_dir().join("replay_engine_test_cache_multi_source.bin");
    let mut cache = RoutingCache::new();
    cache.push(Egress::Primary);
    let mut buf = Vec::new();
    cache.write_to(&mut buf).unwrap();
    std::fs::write(&path, &buf).unwrap();

    let err = ctx.set_tcpprep_cache(&path).unwrap_err();
    assert!(matches!(err, ReplayError::Configuration(_)));
    std::fs::remove_file(&path).ok();
}

#[test]
fn set_tcpprep_cache_loads_file_and_drives_routing() {
    let path = std::env::temp_dir().join("replay_engine_test_cache_single_source.bin");
    let mut cache = RoutingCache::new();
    for i in 0..4 {
        cache.push(if i % 2 == 0 {
            Egress::Primary
        } else {
            Egress::Secondary
        });
    }
    let mut buf = Vec::new();
    cache.write_to(&mut buf).unwrap();
    std::fs::write(&path, &buf).unwrap();

    let mut ctx = seeded_context(4, SpeedMode::TopSpeed);
    ctx.set_tcpprep_cache(&path).unwrap();
    ctx.set_secondary_for_test(Box::new(LoopbackSendPacket::new(LinkType(1))));
    let outcome = engine::replay(&mut ctx, -1).unwrap();
    assert_eq!(outcome, ReplayOutcome::Completed);
    assert_eq!(ctx.get_stats().pkts_sent, 4);
    std::fs::remove_file(&path).ok();
}
