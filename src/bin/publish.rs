//! mooring-publish: forward a device's local packet log downstream
//!
//! Records go out as `u32 length + exported packet` frames. In sticky mode
//! only packets past the device's checkpoint are forwarded and the checkpoint
//! is advanced afterwards.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncWrite;

use mooring::checkpoint::CheckpointStore;
use mooring::forwarder::{Forwarder, WriterPublisher};
use mooring::parser::{MetadataIndex, ParserRegistry};
use mooring::store::{FileLog, PacketLog};
use mooring::time::parse_time;
use mooring::{MooringConfig, MooringError};

/// Forward a local packet log
#[derive(Parser, Debug)]
#[command(name = "mooring-publish")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Device (source) ID whose log to publish
    device_id: i64,

    /// Only forward packets past the device's checkpoint
    #[arg(short, long)]
    sticky: bool,

    /// Encode and count only; nothing is published and no checkpoint is written
    #[arg(short, long)]
    test: bool,

    /// Print each packet (test mode only)
    #[arg(short, long, requires = "test")]
    print: bool,

    /// Source type used to pick a payload parser for printing, overriding the configuration
    #[arg(long, requires = "print")]
    source_type: Option<String>,

    /// Earliest capture time (now, m/d/yyyy, m/d/yyyyTh:m or m/d/yyyyTh:m:s)
    #[arg(long, value_parser = parse_time)]
    start: Option<i64>,

    /// Latest capture time
    #[arg(long, value_parser = parse_time)]
    stop: Option<i64>,

    /// Write records to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log directory, overriding the configuration
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Configuration file
    #[arg(long, env = "MOORING_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

type Output = Box<dyn AsyncWrite + Send + Unpin>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = mooring::logging::init(cli.verbose) {
        eprintln!("mooring-publish: {}", e);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("mooring-publish: {:#}", e);
            if let Some(e) = e.downcast_ref::<MooringError>() {
                for suggestion in e.recovery_suggestions() {
                    eprintln!("  - {}", suggestion);
                }
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = MooringConfig::load(cli.config.as_deref())?;
    let start = cli.start.unwrap_or(i64::MIN);
    let stop = cli.stop.unwrap_or(i64::MAX);
    if start > stop {
        eprintln!("mooring-publish: --start is after --stop");
        return Ok(ExitCode::from(2));
    }

    let log_dir = cli.log_dir.unwrap_or(config.log_directory.clone());
    let path = FileLog::path_for(&log_dir, cli.device_id);
    if !path.exists() {
        eprintln!("mooring-publish: no log for device {} at {}", cli.device_id, path.display());
        return Ok(ExitCode::FAILURE);
    }
    let log = FileLog::open_path(&path)?;

    let output: Output = match (&cli.output, cli.test) {
        (Some(path), false) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("cannot create {}", path.display()))?,
        ),
        _ => Box::new(tokio::io::stdout()),
    };
    let publisher = WriterPublisher::new(output);
    let mut forwarder = if cli.sticky {
        let store = CheckpointStore::from_config(&config.checkpoint);
        Forwarder::sticky(cli.device_id, publisher, store)
    } else {
        Forwarder::non_sticky(cli.device_id, publisher)
    };
    if cli.test {
        forwarder = forwarder.dry_run();
    }

    if cli.print {
        let parsers = ParserRegistry::from_config(&config.parsers);
        let source_type = cli.source_type.as_deref().or(config.source_type(cli.device_id));
        let mut metadata = MetadataIndex::new();
        for packet in log.packets_between(start, stop)? {
            metadata.observe(&packet);
            println!("{}", parsers.describe(source_type, &packet, &metadata));
        }
    }

    forwarder.forward_log(&log, start, stop).await?;
    let stats = forwarder.finish().await?;

    if cli.test {
        eprintln!(
            "{} packets would be published ({} already forwarded)",
            stats.tested, stats.already_seen
        );
    } else {
        eprintln!(
            "published {} packets ({} already forwarded)",
            stats.forwarded, stats.already_seen
        );
    }
    if let Some(checkpoint) = stats.checkpoint {
        eprintln!("checkpoint for device {} is now {}", cli.device_id, checkpoint);
    }
    if stats.failed > 0 {
        eprintln!("{} packets could not be exported", stats.failed);
    }
    Ok(ExitCode::SUCCESS)
}
