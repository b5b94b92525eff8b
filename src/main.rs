//! Minimal CLI entry point. Argument parsing here is deliberately plain
//! (no `clap`) — a full command-line surface is out of scope; this just
//! wires a config file and an optional override or two into a
//! `ReplayContext` and runs it to completion.

use std::env;
use std::process::ExitCode;

use replay_engine::{replay, InterfaceSlot, ReplayConfig, ReplayContext};
use tracing::{error, info};

fn usage() -> ! {
    eprintln!("usage: replay --config <config.json> [--pcap <file>] [--intf1 <name>] [--intf2 <name>]");
    std::process::exit(2);
}

struct CliArgs {
    config_path: Option<String>,
    pcap: Option<String>,
    intf1: Option<String>,
    intf2: Option<String>,
}

fn parse_args() -> CliArgs {
    let mut args = CliArgs {
        config_path: None,
        pcap: None,
        intf1: None,
        intf2: None,
    };
    let mut it = env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config_path = Some(it.next().unwrap_or_else(|| usage())),
            "--pcap" => args.pcap = Some(it.next().unwrap_or_else(|| usage())),
            "--intf1" => args.intf1 = Some(it.next().unwrap_or_else(|| usage())),
            "--intf2" => args.intf2 = Some(it.next().unwrap_or_else(|| usage())),
            "-h" | "--help" => usage(),
            other => {
                eprintln!("unrecognized argument: {other}");
                usage();
            }
        }
    }
    args
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = parse_args();

    let config = match &args.config_path {
        Some(path) => match ReplayConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                error!("loading config {path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => ReplayConfig::default(),
    };

    let mut options = match config.into_options() {
        Ok(o) => o,
        Err(e) => {
            error!("building options: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(pcap) = &args.pcap {
        if let Err(e) = options.add_pcapfile(pcap) {
            error!("adding pcap source: {e}");
            return ExitCode::FAILURE;
        }
    }
    if options.source_count() == 0 {
        eprintln!("no sources configured: pass --pcap or set \"sources\" in the config file");
        return ExitCode::FAILURE;
    }

    let mut ctx = ReplayContext::new(options);
    if let Err(e) = ctx.init() {
        error!("initializing context: {e}");
        return ExitCode::FAILURE;
    }

    if let Some(name) = &args.intf1 {
        if let Err(e) = ctx.set_interface(InterfaceSlot::Primary, name) {
            error!("setting intf1 {name}: {e}");
            return ExitCode::FAILURE;
        }
    }
    if let Some(name) = &args.intf2 {
        if let Err(e) = ctx.set_interface(InterfaceSlot::Secondary, name) {
            error!("setting intf2 {name}: {e}");
            return ExitCode::FAILURE;
        }
    }

    info!("starting replay");
    let outcome = replay(&mut ctx, -1);
    ctx.close();

    match outcome {
        Ok(outcome) => {
            let stats = ctx.get_stats();
            info!(
                ?outcome,
                pkts_sent = stats.pkts_sent,
                bytes_sent = stats.bytes_sent,
                failed = stats.failed,
                "replay finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("replay failed: {e}");
            ExitCode::FAILURE
        }
    }
}
