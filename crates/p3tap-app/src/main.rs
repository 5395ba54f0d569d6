//! p3tap command-line driver.
//!
//! # Usage
//!
//! ```bash
//! # Offline: extract frames from a capture
//! p3tap --pcap session.pcap --out session [--pretty] [--store-full] [--gzip]
//!
//! # Live: man-in-the-middle proxy with session recording
//! p3tap --listen-port 5190 --dest-host ads.aol.example --dest-port 5190
//! ```

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use p3tap_app::{AppError, Orchestrator};
use p3tap_core::{
    session::SessionManager,
    sink::{FileSink, FullFrameStore, SummaryWriter},
};
use p3tap_pcap::{DEFAULT_SERVER_PORT, ExtractOptions, extract_pcap};
use p3tap_proxy::ProxyConfig;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// AOL/P3 protocol analyzer
#[derive(Parser, Debug)]
#[command(name = "p3tap")]
#[command(about = "Recover, classify, and journal AOL/P3 frames")]
#[command(version)]
struct Args {
    /// Capture file to extract offline
    #[arg(long)]
    pcap: Option<PathBuf>,

    /// Output base path; writes <base>.summary.jsonl and optionally
    /// <base>.frames.json
    #[arg(long)]
    out: Option<PathBuf>,

    /// Pretty-print summary JSON
    #[arg(long)]
    pretty: bool,

    /// Also write the content-addressed full-frame store
    #[arg(long)]
    store_full: bool,

    /// GZIP-compress the output files
    #[arg(long)]
    gzip: bool,

    /// Server port to filter captures on
    #[arg(long, default_value_t = DEFAULT_SERVER_PORT)]
    port: u16,

    /// Local port for the live proxy
    #[arg(long)]
    listen_port: Option<u16>,

    /// Upstream host for the live proxy
    #[arg(long)]
    dest_host: Option<String>,

    /// Upstream port for the live proxy
    #[arg(long)]
    dest_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if args.pcap.is_some() {
        run_extract(&args)?;
    } else if args.listen_port.is_some() {
        run_live(&args).await?;
    } else {
        return Err(Box::new(AppError::Usage(
            "nothing to do: pass --pcap <file> --out <base> or --listen-port <port>".to_string(),
        )) as Box<dyn std::error::Error>);
    }

    Ok(())
}

fn run_extract(args: &Args) -> Result<(), AppError> {
    let Some(pcap) = args.pcap.as_deref() else {
        return Err(AppError::Usage("--pcap is required".to_string()));
    };
    let Some(base) = args.out.as_deref() else {
        return Err(AppError::Usage("--out <base> is required with --pcap".to_string()));
    };

    let summary_path = with_suffix(base, if args.gzip { ".summary.jsonl.gz" } else { ".summary.jsonl" });
    let mut sink = FileSink::create(&summary_path, args.gzip, args.pretty)?;

    let mut store = if args.store_full {
        let frames_path =
            with_suffix(base, if args.gzip { ".frames.json.gz" } else { ".frames.json" });
        Some(FullFrameStore::create(frames_path, args.gzip))
    } else {
        None
    };

    let options = ExtractOptions { server_port: args.port };
    let stats = extract_pcap(pcap, &options, &mut sink, store.as_mut())?;

    sink.close()?;
    if let Some(store) = store.as_mut() {
        store.close()?;
    }

    tracing::info!(
        frames = stats.frames,
        duplicates = stats.duplicate_frames,
        out = %summary_path.display(),
        "extraction complete"
    );
    Ok(())
}

async fn run_live(args: &Args) -> Result<(), AppError> {
    let Some(listen_port) = args.listen_port else {
        return Err(AppError::Usage("--listen-port is required".to_string()));
    };
    let (Some(dest_host), Some(dest_port)) = (args.dest_host.clone(), args.dest_port) else {
        return Err(AppError::Usage(
            "--dest-host and --dest-port are required with --listen-port".to_string(),
        ));
    };

    let sessions = Arc::new(SessionManager::new("p3tap")?);
    let orchestrator = Orchestrator::new(sessions);

    let addr = orchestrator
        .start_proxy(ProxyConfig { listen_port, dest_host, dest_port })
        .await?;
    tracing::info!(listen = %addr, "live capture running; Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    orchestrator.stop_proxy().await;

    Ok(())
}

/// `base` + literal suffix, preserving any extension `base` already has.
fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(base.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}
