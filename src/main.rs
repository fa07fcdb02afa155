mod config;
mod sim;
mod terrain;
mod watcher;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use crate::config::{StrataConfig, load_config_from_path};
use crate::sim::Simulator;

#[derive(Parser, Debug)]
#[command(name = "strata", about = "Headless page residency and clipmap streaming simulator")]
struct Args {
    /// TOML config file; built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of frames to simulate
    #[arg(long, default_value_t = 600)]
    frames: u32,
    /// Reload the config file whenever it changes
    #[arg(long)]
    watch: bool,
    /// Override the terrain seed
    #[arg(long)]
    seed: Option<i32>,
    /// Sleep this many milliseconds between frames
    #[arg(long, default_value_t = 0)]
    frame_ms: u64,
}

fn load(args: &Args) -> Result<StrataConfig, config::ConfigError> {
    let mut cfg = match &args.config {
        Some(path) => load_config_from_path(path)?,
        None => StrataConfig::default(),
    };
    if let Some(seed) = args.seed {
        cfg.terrain.seed = seed;
    }
    Ok(cfg)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = match load(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut sim = match Simulator::new(cfg) {
        Ok(sim) => sim,
        Err(e) => {
            log::error!("cannot start simulator: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let reload_rx = match (&args.config, args.watch) {
        (Some(path), true) => Some(watcher::spawn_config_watcher(path.clone())),
        (None, true) => {
            log::warn!("--watch needs --config; ignoring");
            None
        }
        _ => None,
    };

    for frame in 0..args.frames {
        if let Some(rx) = &reload_rx {
            // coalesce bursts of events into one reload
            if rx.try_iter().count() > 0 {
                match load(&args).and_then(|cfg| sim.reload(cfg)) {
                    Ok(()) => log::info!("config reloaded at frame {}", frame),
                    Err(e) => log::warn!("config reload failed, keeping previous: {}", e),
                }
            }
        }
        sim.step(frame);
        if args.frame_ms > 0 {
            std::thread::sleep(Duration::from_millis(args.frame_ms));
        }
    }
    sim.log_summary();
    ExitCode::SUCCESS
}
