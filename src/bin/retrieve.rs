//! mooring-retrieve: pull a device's packets from a node into the local log
//!
//! ```text
//! mooring-retrieve buoy-7.local:7100 1553 --between 3/5/2024 now --types data --skip 9
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use mooring::checkpoint::CheckpointStore;
use mooring::client::PacketRequest;
use mooring::filter::TypeSelection;
use mooring::forwarder::{Forwarder, WriterPublisher};
use mooring::retrieval::{LogSink, RetrievalCursor, SelectingSink};
use mooring::store::{FileLog, PacketLog};
use mooring::time::{format_millis, now_millis, parse_time};
use mooring::types::TypeMask;
use mooring::{Mooring, MooringConfig, MooringError};

/// Retrieve a device's packets from a node
#[derive(Parser, Debug)]
#[command(name = "mooring-retrieve")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Node address (host:port)
    node: String,

    /// Device (source) ID
    device_id: i64,

    /// Time window; times are now, m/d/yyyy, m/d/yyyyTh:m or m/d/yyyyTh:m:s (UTC)
    #[arg(long, num_args = 2, value_names = ["START", "END"], value_parser = parse_time)]
    between: Option<Vec<i64>>,

    /// Packet types: metadata, data, message, summary or all
    #[arg(long, default_value = "all", value_parser = TypeMask::parse_list)]
    types: TypeMask,

    /// Keep every n-th packet of the selected types before saving; 0 keeps all, -1 none
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    skip: i32,

    /// Per-request timeout on the node, in seconds
    #[arg(long)]
    timeout: Option<i32>,

    /// Byte budget per round trip
    #[arg(long)]
    maxbytes: Option<i32>,

    /// Let the node apply the device's default type filters
    #[arg(long, conflicts_with = "types")]
    default: bool,

    /// Do not save to the local log
    #[arg(long)]
    nosave: bool,

    /// Include stale packets
    #[arg(long)]
    stale: bool,

    /// Also forward new packets to stdout as exported records
    #[arg(long)]
    publish: bool,

    /// Forward every packet instead of only those past the checkpoint
    #[arg(long, requires = "publish")]
    non_sticky: bool,

    /// Configuration file
    #[arg(long, env = "MOORING_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = mooring::logging::init(cli.verbose) {
        eprintln!("mooring-retrieve: {}", e);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("mooring-retrieve: {:#}", e);
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
    let device = cli.device_id;

    let log = if cli.nosave {
        None
    } else {
        let mut log = FileLog::open(&config.log_directory, device)?;
        let report = log.check_and_repair()?;
        if !report.is_clean() {
            warn!(
                "{}: dropped {} torn bytes and {} undecodable records",
                log.path().display(),
                report.truncated_bytes,
                report.undecodable
            );
        }
        Some(log)
    };

    let (start, end) = match cli.between.as_deref() {
        Some([start, end]) => (*start, *end),
        _ => {
            let start = log.as_ref().and_then(|l| l.max_timestamp()).map_or(0, |t| t + 1);
            (start, now_millis())
        }
    };
    if start > end {
        eprintln!(
            "mooring-retrieve: start {} is after end {}",
            format_millis(start),
            format_millis(end)
        );
        return Ok(ExitCode::from(2));
    }

    let mut request = PacketRequest::new(device, start, end)
        .with_max_bytes(cli.maxbytes.unwrap_or(config.retrieval.max_bytes))
        .with_timeout_millis(
            cli.timeout.map_or(config.retrieval.timeout_millis, |s| s.saturating_mul(1000)),
        )
        .with_stale(cli.stale);
    request = request.with_types(if cli.default { TypeMask::EMPTY } else { cli.types });
    let selection_types = if cli.default { TypeMask::ALL } else { cli.types };
    let selection = TypeSelection::new(selection_types, cli.skip)?;

    let forwarder = cli.publish.then(|| {
        let publisher = WriterPublisher::new(tokio::io::stdout());
        if cli.non_sticky {
            Forwarder::non_sticky(device, publisher)
        } else {
            Forwarder::sticky(device, publisher, CheckpointStore::from_config(&config.checkpoint))
        }
    });

    let mut node = Mooring::connect(&cli.node, &config)
        .await
        .with_context(|| format!("cannot reach node {}", cli.node))?;
    info!(
        "Retrieving device {} from {} between {} and {}",
        device,
        cli.node,
        format_millis(start),
        format_millis(end)
    );

    let mut sink = SelectingSink::new(selection, (log.map(LogSink::new), forwarder));
    let mut cursor = RetrievalCursor::new(request);
    let result = tokio::select! {
        result = cursor.run(&mut node, &mut sink) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let (log_sink, forwarder) = sink.into_inner();
    if let Some(forwarder) = forwarder {
        let stats = forwarder.finish().await?;
        eprintln!(
            "published {} packets ({} already forwarded)",
            stats.forwarded, stats.already_seen
        );
    }
    if let Some(log_sink) = log_sink {
        info!("{} now holds {} packets", log_sink.log().path().display(), log_sink.log().len());
    }

    match result {
        None => {
            eprintln!("interrupted; next start {}", format_millis(cursor.position()));
            Ok(ExitCode::FAILURE)
        }
        Some(Ok(summary)) => {
            eprintln!(
                "retrieved {} packets in {} round trips; next start {}",
                summary.packets,
                summary.rounds,
                format_millis(summary.cursor)
            );
            Ok(ExitCode::SUCCESS)
        }
        Some(Err(e)) if e.is_nothing_to_do() => {
            eprintln!("nothing to retrieve: {}", e);
            Ok(ExitCode::SUCCESS)
        }
        Some(Err(e)) => Err(e.into()),
    }
}
