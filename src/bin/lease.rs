//! mooring-lease: establish, renew or terminate a communications lease
//!
//! Transport failures are retried until the lease request gets an answer or
//! the user presses Ctrl-C. A refusal is final.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use mooring::lease::{client_note, LeaseManager, LeaseOutcome, LeaseRequest};
use mooring::transport::Transport;
use mooring::types::{Channel, LeaseId};
use mooring::{Mooring, MooringConfig, MooringError};

/// Manage a node communications lease
#[derive(Parser, Debug)]
#[command(name = "mooring-lease")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Node address (host:port)
    node: String,

    #[command(subcommand)]
    command: LeaseCommand,

    /// Lease the auxiliary link instead of the primary one
    #[arg(long, global = true)]
    aux: bool,

    /// Configuration file
    #[arg(long, global = true, env = "MOORING_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum LeaseCommand {
    /// Request a new lease
    Establish {
        /// Lease duration in seconds
        secs: u64,
    },
    /// Extend an existing lease from now
    Renew {
        id: i32,
        /// New duration in seconds
        secs: u64,
    },
    /// Release a lease
    Terminate { id: i32 },
}

impl LeaseCommand {
    fn request(&self, note: String) -> LeaseRequest {
        match *self {
            LeaseCommand::Establish { secs } => {
                LeaseRequest::Establish { duration: Duration::from_secs(secs), client_note: note }
            }
            LeaseCommand::Renew { id, secs } => {
                LeaseRequest::Renew { id: LeaseId(id), duration: Duration::from_secs(secs) }
            }
            LeaseCommand::Terminate { id } => LeaseRequest::Terminate { id: LeaseId(id) },
        }
    }
}

fn local_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn local_host() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = mooring::logging::init(cli.verbose) {
        eprintln!("mooring-lease: {}", e);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match run(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(MooringError::Cancelled) => {
            eprintln!("mooring-lease: interrupted");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("mooring-lease: {}", e);
            for suggestion in e.recovery_suggestions() {
                eprintln!("  - {}", suggestion);
            }
            ExitCode::FAILURE
        }
    }
}

/// Connect, retrying transport failures until cancelled.
async fn connect(
    addr: &str,
    config: &MooringConfig,
    cancel: &CancellationToken,
) -> mooring::Result<Transport> {
    let retry_interval = config.lease.retry_interval();
    loop {
        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MooringError::Cancelled),
            attempt = Mooring::connect(addr, config) => attempt,
        };
        match attempt {
            Ok(transport) => return Ok(transport),
            Err(e) if e.is_retryable() => {
                warn!("Cannot reach {}: {}; retrying in {:?}", addr, e, retry_interval);
                eprintln!("waiting for {} ...", addr);
            }
            Err(e) => return Err(e),
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MooringError::Cancelled),
            _ = tokio::time::sleep(retry_interval) => {}
        }
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> mooring::Result<()> {
    let config = MooringConfig::load(cli.config.as_deref())?;
    let channel = if cli.aux { Channel::Auxiliary } else { Channel::Primary };
    let request = cli.command.request(client_note(&local_user(), &local_host()));

    let mut node = connect(&cli.node, &config, &cancel).await?;
    let mut leases = LeaseManager::new();
    let outcome = leases
        .execute_with_retry(&mut node, &request, channel, config.lease.retry_interval(), &cancel)
        .await?;

    match outcome {
        LeaseOutcome::Granted(lease) => {
            println!("{}", lease.id);
            eprintln!("{} lease {} granted for {}s", channel, lease.id, lease.duration.as_secs());
        }
        LeaseOutcome::Renewed(lease) => {
            eprintln!("{} lease {} renewed for {}s", channel, lease.id, lease.duration.as_secs());
        }
        LeaseOutcome::Terminated(id) => {
            eprintln!("{} lease {} terminated", channel, id);
        }
    }
    Ok(())
}
