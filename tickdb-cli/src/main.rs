//! TickDB CLI
//!
//! Command-line tools for creating, loading and inspecting TickDB databases.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tickdb_core::config;
use tickdb_core::store::RedbStore;
use tickdb_core::{Engine, EngineConfig, Point, SeriesId, SeriesInfo, TimeRange, Timestamp};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// TickDB command-line database tools.
#[derive(Parser)]
#[command(name = "tickdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(global = true, short, long, default_value = config::DEFAULT_DATA_DIR)]
    path: PathBuf,

    /// Points per segment
    #[arg(global = true, short, long, default_value_t = config::DEFAULT_SEGMENT_CAPACITY)]
    capacity: usize,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty database, dropping any existing data
    Create,

    /// Write synthetic series
    Generate {
        /// Number of series
        #[arg(long, default_value_t = 1)]
        series: u64,

        /// Points per series
        #[arg(long, default_value_t = 10_000)]
        points: u64,

        /// First timestamp in ticks
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        start: i64,

        /// Distance between points in ticks
        #[arg(long, default_value_t = Timestamp::TICKS_PER_SECOND)]
        step: i64,

        /// Insert in random order
        #[arg(long)]
        shuffle: bool,

        /// Seed for the shuffled order
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },

    /// Insert `timestamp,value[,flags]` lines from stdin
    Insert {
        /// Series id (UUID)
        series: SeriesId,

        /// Name to record for the series
        #[arg(long)]
        name: Option<String>,
    },

    /// Print the points of a series
    Scan {
        /// Series id (UUID)
        series: SeriesId,

        /// First timestamp (inclusive)
        #[arg(long, allow_hyphen_values = true)]
        from: Option<i64>,

        /// Last timestamp (exclusive)
        #[arg(long, allow_hyphen_values = true)]
        to: Option<i64>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show the segment layout of stored series
    Inspect {
        /// Only this series
        series: Option<SeriesId>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Check the layout of every stored series
    Verify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let config = EngineConfig {
        data_dir: cli.path.clone(),
        create: matches!(cli.command, Commands::Create),
        segment_capacity: cli.capacity,
        ..Default::default()
    };
    let engine = Engine::open(config)
        .with_context(|| format!("Failed to open database at {:?}", cli.path))?;

    match cli.command {
        Commands::Create => {
            info!("Database ready at {:?}", cli.path);
        }
        Commands::Generate {
            series,
            points,
            start,
            step,
            shuffle,
            seed,
        } => generate(&engine, series, points, start, step, shuffle, seed)?,
        Commands::Insert { series, name } => insert(&engine, series, name)?,
        Commands::Scan {
            series,
            from,
            to,
            format,
        } => {
            let range = TimeRange::new(
                from.unwrap_or(i64::MIN),
                to.unwrap_or(i64::MAX),
            );
            scan(&engine, series, range, format)?;
        }
        Commands::Inspect { series, format } => inspect(&engine, series, format)?,
        Commands::Verify => verify(&engine)?,
    }

    Ok(())
}

fn generate(
    engine: &Engine<RedbStore>,
    series: u64,
    points: u64,
    start: i64,
    step: i64,
    shuffle: bool,
    seed: u64,
) -> anyhow::Result<()> {
    if step <= 0 {
        bail!("--step must be positive");
    }
    let mut rng = StdRng::seed_from_u64(seed);

    for n in 1..=series {
        let id = SeriesId::from_u128(u128::from(n));
        let mut timestamps: Vec<i64> = (0..points as i64)
            .map(|i| start.saturating_add(i.saturating_mul(step)))
            .collect();
        if shuffle {
            timestamps.shuffle(&mut rng);
        }

        let txn = engine.begin_transaction()?;
        txn.put_series_info(id, &SeriesInfo::new(format!("series-{}", n)))?;
        let written = txn.insert_points(
            id,
            timestamps
                .iter()
                .map(|&ts| Point::new(ts, (ts as f64).sin())),
        )?;
        txn.commit()?;

        info!("Generated {} points for series {}", written, id);
    }
    Ok(())
}

fn insert(engine: &Engine<RedbStore>, id: SeriesId, name: Option<String>) -> anyhow::Result<()> {
    let txn = engine.begin_transaction()?;
    if let Some(name) = name {
        txn.put_series_info(id, &SeriesInfo::new(name))?;
    }

    let mut cursor = txn.open_series(id)?;
    let mut count = 0usize;
    for (number, line) in io::stdin().lock().lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let point =
            parse_point(line).with_context(|| format!("Invalid point on line {}", number + 1))?;
        cursor.insert(point)?;
        count += 1;
    }
    drop(cursor);
    txn.commit()?;

    println!("Inserted {} points into {}", count, id);
    Ok(())
}

fn parse_point(line: &str) -> anyhow::Result<Point> {
    let mut fields = line.split(',').map(str::trim);
    let (Some(ts), Some(value)) = (fields.next(), fields.next()) else {
        bail!("expected timestamp,value[,flags]");
    };
    let flags = match fields.next() {
        Some(flags) => flags.parse()?,
        None => 0,
    };
    if fields.next().is_some() {
        bail!("too many fields");
    }
    Ok(Point::with_flags(ts.parse::<i64>()?, flags, value.parse()?))
}

fn scan(
    engine: &Engine<RedbStore>,
    id: SeriesId,
    range: TimeRange,
    format: Format,
) -> anyhow::Result<()> {
    let txn = engine.begin_read()?;
    let mut cursor = txn.open_series(id)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let mut count = 0usize;
    for point in cursor.scan(range) {
        let point = point?;
        match format {
            Format::Text => writeln!(
                out,
                "{}\t{}\t{}",
                point.timestamp, point.value, point.flags
            )?,
            Format::Json => writeln!(out, "{}", serde_json::to_string(&point)?)?,
        }
        count += 1;
    }
    if count == 0 {
        warn!("No points of series {} in range", id);
    }
    Ok(())
}

fn inspect(
    engine: &Engine<RedbStore>,
    series: Option<SeriesId>,
    format: Format,
) -> anyhow::Result<()> {
    let txn = engine.begin_read()?;
    let ids = match series {
        Some(id) => vec![id],
        None => txn.stored_series()?,
    };

    if format == Format::Text {
        println!("Segment capacity: {}", engine.segment_capacity());
        println!("Series: {}", ids.len());
    }

    for id in ids {
        let name = txn.series_info(id)?.map(|info| info.name);
        let segments = txn.segments(id)?;
        match format {
            Format::Text => {
                println!();
                println!("{} {}", id, name.as_deref().unwrap_or("-"));
                for segment in &segments {
                    println!(
                        "  {:>20}  {:>6} points  {} .. {}",
                        segment.key, segment.len, segment.first, segment.last
                    );
                }
            }
            Format::Json => {
                let entry = serde_json::json!({
                    "series": id,
                    "name": name,
                    "segments": segments,
                });
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
    }
    Ok(())
}

fn verify(engine: &Engine<RedbStore>) -> anyhow::Result<()> {
    let txn = engine.begin_read()?;
    let mut failed = 0usize;
    let mut total = 0usize;

    let ids = txn.stored_series()?;
    for &id in &ids {
        match txn.verify_series(id) {
            Ok(points) => total += points,
            Err(e) => {
                println!("FAIL {}: {}", id, e);
                failed += 1;
            }
        }
    }

    println!("Checked {} series, {} points", ids.len(), total);
    if failed > 0 {
        bail!("{} series failed verification", failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        let point = parse_point("42, 1.5").unwrap();
        assert_eq!(point, Point::new(42, 1.5));

        let point = parse_point("-7,0,3").unwrap();
        assert_eq!(point.flags, 3);

        assert!(parse_point("42").is_err());
        assert!(parse_point("x,1").is_err());
        assert!(parse_point("1,2,3,4").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "tickdb", "--path", "/tmp/db", "scan", "00000000-0000-0000-0000-000000000001",
            "--from", "10", "--format", "json",
        ])
        .unwrap();
        assert_eq!(cli.capacity, config::DEFAULT_SEGMENT_CAPACITY);
        match cli.command {
            Commands::Scan { from, to, format, .. } => {
                assert_eq!(from, Some(10));
                assert_eq!(to, None);
                assert_eq!(format, Format::Json);
            }
            _ => panic!("expected scan"),
        }
    }
}
