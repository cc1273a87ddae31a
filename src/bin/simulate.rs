//! Fermentation Batch Simulation
//!
//! Writes a synthetic multi-tank CSV built from a golden profile plus sensor
//! noise, with optional injected faults:
//! - `stuck`: CO2 freezes partway through exponential growth
//! - `pressure`: head pressure excursion above the relief range
//! - `oxygen`: dissolved oxygen ingress spike
//!
//! # Usage
//! ```bash
//! simulate --tanks 3 --hours 48 --fault stuck --out tanks.csv
//! fermentwatch analyze --csv tanks.csv
//! ```

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration, TimeZone, Utc};
use clap::{Parser, ValueEnum};
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use tracing::info;

use fermentwatch::ingest;
use fermentwatch::preprocessing::SchemaMapper;
use fermentwatch::profiles::{create_profile, GoldenProfile, ProfileSynthesis};
use fermentwatch::types::{channels, Frame, Reading};

// ============================================================================
// Sensor Constants
// ============================================================================

/// CO2 sensor noise (ppm, 1 sigma)
const CO2_NOISE: f64 = 15.0;
/// Temperature probe noise (C)
const TEMP_NOISE: f64 = 0.1;
/// Pressure transducer noise (kPa)
const PRESSURE_NOISE: f64 = 0.5;

/// Profile fraction where each fault starts
const STUCK_AT: f64 = 0.25;
const PRESSURE_AT: f64 = 0.5;
const OXYGEN_AT: f64 = 0.6;

/// Rows a pressure or oxygen fault lasts
const FAULT_ROWS: usize = 6;

const PRESSURE_EXCURSION_KPA: f64 = 185.0;
const OXYGEN_SPIKE_PCT: f64 = 6.0;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Fault {
    None,
    Stuck,
    Pressure,
    Oxygen,
}

#[derive(Parser, Debug)]
#[command(name = "simulate")]
#[command(about = "Synthetic fermentation batch generator for fermentwatch")]
#[command(version)]
struct Args {
    /// Number of tanks
    #[arg(short, long, default_value = "2", value_parser = clap::value_parser!(u32).range(1..=50))]
    tanks: u32,

    /// Batch duration in hours
    #[arg(short = 'H', long, default_value = "72")]
    hours: f64,

    /// Sample interval in minutes
    #[arg(short, long, default_value = "5")]
    interval: u32,

    #[arg(long, default_value = "ale")]
    strain: String,

    #[arg(long, default_value = "ipa")]
    style: String,

    /// Fault injected into the first tank
    #[arg(long, value_enum, default_value = "none")]
    fault: Fault,

    /// Write telemetry column names (pressure_bar, do_ppm, ...) instead of canonical ones
    #[arg(long)]
    external: bool,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Output CSV (stdout when omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

// ============================================================================
// Generation
// ============================================================================

fn tank_readings(
    tank: &str,
    profile: &GoldenProfile,
    args: &Args,
    fault: Fault,
    rng: &mut StdRng,
) -> Result<Vec<Reading>> {
    let co2_noise = Normal::new(0.0, CO2_NOISE)?;
    let temp_noise = Normal::new(0.0, TEMP_NOISE)?;
    let pressure_noise = Normal::new(0.0, PRESSURE_NOISE)?;
    let start = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .context("invalid start time")?;

    let n = profile.len();
    let at = |fraction: f64| (n as f64 * fraction) as usize;
    let mut stuck_value = None;

    let mut rows = Vec::with_capacity(n);
    for (i, s) in profile.samples.iter().enumerate() {
        let mut co2 = (s.co2_ppm + co2_noise.sample(rng)).max(0.0);
        let mut pressure = s.pressure_kpa + pressure_noise.sample(rng);
        let mut o2 = s.o2_pct;

        match fault {
            Fault::Stuck if i >= at(STUCK_AT) => co2 = *stuck_value.get_or_insert(co2),
            Fault::Pressure if (at(PRESSURE_AT)..at(PRESSURE_AT) + FAULT_ROWS).contains(&i) => {
                pressure = PRESSURE_EXCURSION_KPA;
            }
            Fault::Oxygen if (at(OXYGEN_AT)..at(OXYGEN_AT) + FAULT_ROWS).contains(&i) => {
                o2 += OXYGEN_SPIKE_PCT;
            }
            _ => {}
        }

        let ts = start + Duration::minutes(s.time_minutes as i64);
        rows.push(
            Reading::new(ts)
                .with_group(tank)
                .with_metadata(&args.strain, &args.style)
                .with_channel(channels::CO2, co2)
                .with_channel(channels::OXYGEN, o2.max(0.0))
                .with_channel(channels::TEMPERATURE, s.process_temp_c + temp_noise.sample(rng))
                .with_channel(channels::PRESSURE, pressure),
        );
    }
    Ok(rows)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let seed = args.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);

    let synthesis = ProfileSynthesis {
        duration_hours: args.hours,
        interval_minutes: args.interval,
        seed,
        ..ProfileSynthesis::default()
    };

    let mut readings = Vec::new();
    for t in 0..args.tanks {
        let tank = format!("T{:02}", t + 1);
        // each tank gets its own oxygen noise draw
        let profile = create_profile(
            &args.strain,
            &args.style,
            &ProfileSynthesis { seed: synthesis.seed.wrapping_add(u64::from(t)), ..synthesis.clone() },
        )?;
        let fault = if t == 0 { args.fault } else { Fault::None };
        readings.extend(tank_readings(&tank, &profile, &args, fault, &mut rng)?);
    }

    let mut frame: Frame = readings.into_iter().collect();
    if args.external {
        frame = SchemaMapper::new().to_external(&frame);
    }

    match &args.out {
        Some(path) => ingest::write_csv_file(&frame, path)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => ingest::write_csv(&frame, io::stdout().lock()).context("Failed to write CSV")?,
    }

    info!(
        tanks = args.tanks,
        rows = frame.len(),
        fault = ?args.fault,
        seed,
        "Simulation complete"
    );
    Ok(())
}
