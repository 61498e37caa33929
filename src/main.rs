//! Replay a recorded sensor log through the tracking engine and print the
//! resulting runs and session summary.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use flate2::read::GzDecoder;
use serde::Deserialize;

use snow_tracker_rs::attribution::SlopeMap;
use snow_tracker_rs::session::{SessionConfig, SessionTracker};
use snow_tracker_rs::types::{BaroSample, LocationSample, MotionSample};

#[derive(Parser, Debug)]
#[command(name = "snow_tracker", about = "Replay a ski session sensor log")]
struct Args {
    /// Path to a session_*.json[.gz] sensor log
    #[arg(long)]
    log: PathBuf,

    /// Slope polygon database (JSON array of zones)
    #[arg(long)]
    slopes: Option<PathBuf>,

    /// Treat the log as barometer-equipped
    #[arg(long, default_value_t = true)]
    baro: bool,

    /// Write the per-sample diagnostic trace here
    #[arg(long)]
    diagnostics: Option<PathBuf>,
}

/// One line of the recorded log: at most one reading per stream.
#[derive(Deserialize)]
struct Reading {
    timestamp: f64,
    location: Option<LocationSample>,
    motion: Option<MotionSample>,
    baro: Option<BaroSample>,
}

#[derive(Deserialize)]
struct LogFile {
    readings: Vec<Reading>,
}

fn load_log(path: &Path) -> anyhow::Result<LogFile> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let reader = BufReader::new(GzDecoder::new(file));
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let log = load_log(&args.log)?;
    anyhow::ensure!(!log.readings.is_empty(), "log contains no readings");

    let slopes = match &args.slopes {
        Some(path) => SlopeMap::load_json(path)
            .map_err(|e| anyhow::anyhow!("loading slope database: {}", e))?,
        None => SlopeMap::new(Vec::new()),
    };
    println!("loaded {} readings, {} slope zones", log.readings.len(), slopes.len());

    let mut config = SessionConfig::new(args.baro);
    config.diagnostics = args.diagnostics.is_some();
    let mut tracker = SessionTracker::new(config, slopes);

    let start_ts = log.readings[0].timestamp;
    tracker.start(start_ts).map_err(|e| anyhow::anyhow!("{}", e))?;

    let mut end_ts = start_ts;
    for r in &log.readings {
        end_ts = r.timestamp;
        if let Some(b) = r.baro.as_ref() {
            let _ = tracker.handle_baro(b);
        }
        if let Some(m) = r.motion.as_ref() {
            let _ = tracker.handle_motion(m);
        }
        if let Some(l) = r.location.as_ref() {
            let _ = tracker.handle_location(l);
        }
    }

    if let Some(path) = &args.diagnostics {
        tracker
            .diagnostics()
            .save(path)
            .map_err(|e| anyhow::anyhow!("writing diagnostics: {}", e))?;
        println!("diagnostics written to {}", path.display());
    }

    let summary = tracker.stop(end_ts).map_err(|e| anyhow::anyhow!("{}", e))?;

    println!();
    for run in &summary.runs {
        println!(
            "run {:>2}  {:<20} {:>6.0} s  {:>6.1} m drop  max {:>4.1} m/s  edge {:>4}  flow {:>4}",
            run.run_number,
            run.slope.as_deref().unwrap_or("-"),
            run.duration,
            run.vertical_drop,
            run.max_speed,
            run.edge_score,
            run.flow_score,
        );
    }
    println!();
    println!("session {}", summary.session_id);
    println!(
        "  {} runs, {:.0} m descended, {:.1} km travelled",
        summary.run_count,
        summary.total_vertical_drop_m,
        summary.total_distance_m / 1000.0
    );
    println!(
        "  best edge {} / best flow {}",
        summary.best_edge_score, summary.best_flow_score
    );
    Ok(())
}
