//! Geo-IP bulk loader

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use geoip_common::logging::{init_logging, LogConfig, LogLevel};
use geoip_ingest::config::{self, IngestConfig};
use geoip_ingest::pipeline::{CancelReason, CancelSignal, Pipeline, PipelineSummary};
use geoip_ingest::progress::spawn_spinner;
use geoip_ingest::sink::{DocumentSink, ElasticsearchSink, MemorySink};
use geoip_ingest::source::RecordSource;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "geoip-ingest")]
#[command(author, version, about = "Bulk-load geo-IP ranges into a search index")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a delimited geo-IP file into the index
    Load(LoadArgs),

    /// Show the indexed ranges containing an address
    Lookup(LookupArgs),
}

#[derive(Args, Debug)]
struct ClusterArgs {
    /// Search cluster URL
    #[arg(long, env = "GEOIP_URL", default_value = config::DEFAULT_URL)]
    url: String,

    /// Target index
    #[arg(long, env = "GEOIP_INDEX", default_value = config::DEFAULT_INDEX)]
    index: String,

    /// Per-request timeout in seconds
    #[arg(long, env = "GEOIP_TIMEOUT_SECS", default_value_t = config::DEFAULT_REQUEST_TIMEOUT_SECS)]
    timeout_secs: u64,
}

#[derive(Args, Debug)]
struct LoadArgs {
    #[command(flatten)]
    cluster: ClusterArgs,

    /// Mapping type sent with every bulk action (legacy clusters only)
    #[arg(long = "type", env = "GEOIP_TYPE")]
    doc_type: Option<String>,

    /// Input file
    #[arg(short, long, env = "GEOIP_FILENAME")]
    filename: Option<PathBuf>,

    /// Documents per bulk request
    #[arg(short, long, env = "GEOIP_BATCH_SIZE", default_value_t = config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Field delimiter
    #[arg(long, env = "GEOIP_DELIMITER", default_value_t = config::DEFAULT_DELIMITER)]
    delimiter: char,

    /// Comment line marker
    #[arg(long, env = "GEOIP_COMMENT", default_value_t = config::DEFAULT_COMMENT)]
    comment: char,

    /// Capacity of the handoff channels between stages
    #[arg(long, env = "GEOIP_CHANNEL_CAPACITY", default_value_t = config::DEFAULT_CHANNEL_CAPACITY)]
    channel_capacity: usize,

    /// Seconds between progress lines, 0 to disable
    #[arg(long, env = "GEOIP_PROGRESS_SECS", default_value_t = config::DEFAULT_PROGRESS_INTERVAL_SECS)]
    progress_secs: u64,

    /// Cancel the load after this many seconds
    #[arg(long, env = "GEOIP_DEADLINE_SECS")]
    deadline_secs: Option<u64>,

    /// Parse and transform without writing to the cluster
    #[arg(long)]
    dry_run: bool,

    /// Disable the terminal spinner
    #[arg(long)]
    no_spinner: bool,
}

#[derive(Args, Debug)]
struct LookupArgs {
    #[command(flatten)]
    cluster: ClusterArgs,

    /// IP address to look up
    #[arg(long)]
    ip: String,

    /// Delimiter for printed ranges
    #[arg(long, default_value_t = config::DEFAULT_DELIMITER)]
    delimiter: char,
}

impl LoadArgs {
    fn to_config(&self) -> IngestConfig {
        IngestConfig {
            url: self.cluster.url.clone(),
            index: self.cluster.index.clone(),
            doc_type: self.doc_type.clone(),
            filename: self.filename.clone(),
            batch_size: self.batch_size,
            delimiter: self.delimiter,
            comment: self.comment,
            channel_capacity: self.channel_capacity,
            request_timeout_secs: self.cluster.timeout_secs,
            progress_interval_secs: self.progress_secs,
            deadline_secs: self.deadline_secs,
            dry_run: self.dry_run,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("geoip-ingest")
        .build()
        .merge_env()?;

    // Dropped on return, flushing any buffered file output
    let _log_guard = init_logging(&log_config)?;

    let outcome = match cli.command {
        Command::Load(args) => load(args).await.map(|summary| {
            info!(
                documents = summary.documents,
                batches = summary.batches,
                elapsed = ?summary.elapsed,
                "Load complete"
            );
        }),
        Command::Lookup(args) => lookup(args).await,
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            error!(kind = %e.kind(), "{}", e);
            Ok(ExitCode::FAILURE)
        },
    }
}

async fn load(args: LoadArgs) -> geoip_ingest::Result<PipelineSummary> {
    let config = args.to_config();
    config.validate()?;

    let sink: Arc<dyn DocumentSink> = if config.dry_run {
        info!("Dry run, documents will not be written");
        Arc::new(MemorySink::counting())
    } else {
        let sink = ElasticsearchSink::from_config(&config)?;
        sink.ping().await?;
        Arc::new(sink)
    };

    let source = RecordSource::open(config.input_path()?, config.delimiter, config.comment).await?;
    let pipeline = Pipeline::from_config(sink, &config);

    let cancel = pipeline.cancel_signal();
    tokio::spawn(cancel_on_shutdown(cancel));

    let stop_spinner = CancellationToken::new();
    let spinner = (!args.no_spinner).then(|| spawn_spinner(pipeline.throughput(), stop_spinner.clone()));

    let outcome = pipeline.run(source).await;

    stop_spinner.cancel();
    if let Some(spinner) = spinner {
        let _ = spinner.await;
    }

    outcome
}

async fn lookup(args: LookupArgs) -> geoip_ingest::Result<()> {
    let sink = ElasticsearchSink::new(
        args.cluster.url,
        args.cluster.index,
        None,
        std::time::Duration::from_secs(args.cluster.timeout_secs),
    )?;

    let documents = sink.lookup_ip(&args.ip).await?;
    if documents.is_empty() {
        warn!(ip = %args.ip, "No range contains this address");
    }

    for doc in &documents {
        println!("{}{}{}", doc.id, args.delimiter, doc.to_line(args.delimiter));
    }
    Ok(())
}

/// Cancel the run on Ctrl+C or SIGTERM
async fn cancel_on_shutdown(cancel: CancelSignal) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling load");
        },
        _ = terminate => {
            info!("Received terminate signal, cancelling load");
        },
        _ = cancel.cancelled() => return,
    }

    cancel.cancel(CancelReason::External);
}
