//! CLI entry point for bus_eta.
//!
//! Provides subcommands for a one-off arrival search over feed files or URLs,
//! for inspecting what a feed document yields after validation, and for a
//! long-running watch that keeps the feeds fresh and re-queries for a rider.

use anyhow::{Result, bail};
use bus_eta::{
    config::{AppConfig, EngineConfig},
    feed::{FeedKind, IngestStats},
    fetch::{BasicClient, HttpClient, load_bytes},
    geo::GeoPoint,
    output::{append_rows, append_stats, format_outcome, print_json, print_pretty},
    refresh::{apply_bytes, spawn_refresh_loops},
    search::{DirectionFilter, LineFilter, RiderQuery, SearchOutcome, search},
    session::SessionRegistry,
    store::FeedStore,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "bus_eta")]
#[command(about = "Estimate bus arrival times from live transit feeds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum FeedArg {
    Vehicles,
    Stops,
    Schedules,
}

impl From<FeedArg> for FeedKind {
    fn from(arg: FeedArg) -> Self {
        match arg {
            FeedArg::Vehicles => FeedKind::Vehicles,
            FeedArg::Stops => FeedKind::Stops,
            FeedArg::Schedules => FeedKind::Schedules,
        }
    }
}

#[derive(clap::Args)]
struct RiderArgs {
    /// Rider latitude (WGS84)
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    /// Rider longitude (WGS84)
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    /// Line code to look for, or "all"
    #[arg(long, default_value = "all")]
    line: LineFilter,

    /// outbound, inbound or both
    #[arg(long, default_value = "both")]
    direction: DirectionFilter,
}

impl RiderArgs {
    fn query(&self) -> RiderQuery {
        RiderQuery {
            location: GeoPoint::new(self.lat, self.lon),
            direction: self.direction,
            line: self.line.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one arrival search over feeds loaded from files or URLs
    Search {
        /// Vehicle positions feed
        #[arg(long, value_name = "FILE_OR_URL")]
        vehicles: String,

        /// Stops feed
        #[arg(long, value_name = "FILE_OR_URL")]
        stops: Option<String>,

        /// Schedules feed
        #[arg(long, value_name = "FILE_OR_URL")]
        schedules: Option<String>,

        #[command(flatten)]
        rider: RiderArgs,

        /// Evaluate as of this instant (RFC 3339) instead of now
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Engine settings JSON; defaults apply to anything not given
        #[arg(short, long)]
        config: Option<String>,

        /// Print the outcome as JSON
        #[arg(long, default_value_t = false)]
        json: bool,

        /// CSV file to append result rows to
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Decode one feed document and report what survived validation
    Inspect {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        #[arg(short, long, value_enum, default_value_t = FeedArg::Vehicles)]
        kind: FeedArg,

        /// Engine settings JSON
        #[arg(short, long)]
        config: Option<String>,

        /// CSV file to append ingest statistics to
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Keep the feeds refreshed and re-run a rider search periodically
    Watch {
        /// Application config JSON (feeds, refresh intervals, engine)
        #[arg(short, long, env = "BUS_ETA_CONFIG")]
        config: String,

        #[arg(long, default_value = "cli")]
        rider_id: String,

        #[command(flatten)]
        rider: RiderArgs,

        /// Seconds between re-queries
        #[arg(short = 'e', long, default_value_t = 60)]
        every: u64,

        /// CSV file to append result rows to
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/bus_eta.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("bus_eta.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            vehicles,
            stops,
            schedules,
            rider,
            at,
            config,
            json,
            output,
        } => {
            let config = load_engine_config(config.as_deref())?;
            let now = at.unwrap_or_else(Utc::now);
            let client = BasicClient::new(Duration::from_secs(20))?;
            let store = FeedStore::new();

            let sources = [
                (FeedKind::Vehicles, Some(vehicles)),
                (FeedKind::Stops, stops),
                (FeedKind::Schedules, schedules),
            ];
            for (kind, source) in sources {
                let Some(source) = source else {
                    continue;
                };
                let bytes = load_bytes(&client, &source).await?;
                let stats = apply_bytes(kind, &bytes, now, &store, &config).await?;
                info!(
                    feed = %kind,
                    received = stats.received,
                    accepted = stats.accepted,
                    reasons = ?stats.reasons,
                    "Feed loaded"
                );
            }

            let outcome = search(&store.view().await, &rider.query(), now, &config);
            if json {
                print_json(&outcome)?;
            } else {
                print_pretty(&outcome);
            }

            if let (Some(path), SearchOutcome::Found(report)) = (output, &outcome) {
                let written = append_rows(&path, report)?;
                info!(path = %path, written, "Rows appended");
            }
        }
        Commands::Inspect {
            source,
            kind,
            config,
            output,
        } => {
            let config = load_engine_config(config.as_deref())?;
            let client = BasicClient::new(Duration::from_secs(20))?;
            inspect(&client, &source, kind.into(), &config, output.as_deref()).await?;
        }
        Commands::Watch {
            config,
            rider_id,
            rider,
            every,
            output,
        } => {
            watch(&config, &rider_id, rider.query(), every, output).await?;
        }
    }

    Ok(())
}

fn load_engine_config(path: Option<&str>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

/// Loads, decodes and validates one feed, logging per-reason rejections.
#[tracing::instrument(skip(client, config, output), fields(feed = %kind))]
async fn inspect(
    client: &dyn HttpClient,
    source: &str,
    kind: FeedKind,
    config: &EngineConfig,
    output: Option<&str>,
) -> Result<()> {
    let store = FeedStore::new();
    let result = match load_bytes(client, source).await {
        Ok(bytes) => apply_bytes(kind, &bytes, Utc::now(), &store, config)
            .await
            .map_err(|e| ("parse_error", e)),
        Err(e) => Err(("fetch_error", e)),
    };

    let stats = match result {
        Ok(stats) => stats,
        Err((error_type, e)) => {
            error!(error = %e, error_type, "Feed could not be loaded");
            if let Some(path) = output {
                append_stats(path, &IngestStats::from_error(kind, error_type, &e.to_string()))?;
            }
            return Err(e);
        }
    };

    info!(
        received = stats.received,
        accepted = stats.accepted,
        rejected = stats.rejected,
        acceptance_pct = stats.acceptance_pct(),
        "Feed inspected"
    );
    for (reason, count) in &stats.reasons {
        info!(reason, count, "Rejected");
    }
    if stats.received > 0 && stats.accepted == 0 {
        warn!("No record survived validation");
    }

    if let Some(path) = output {
        append_stats(path, &stats)?;
    }
    Ok(())
}

#[tracing::instrument(skip(query, output))]
async fn watch(
    config_path: &str,
    rider_id: &str,
    query: RiderQuery,
    every: u64,
    output: Option<String>,
) -> Result<()> {
    if every == 0 {
        bail!("--every must be at least 1 second");
    }
    let app = AppConfig::load(config_path)?;
    let store = Arc::new(FeedStore::new());
    let loops = spawn_refresh_loops(&app, store.clone())?;

    let mut sessions = SessionRegistry::new(store, Arc::new(app.engine.clone()));
    sessions.start_search(rider_id, query, Duration::from_secs(every), move |outcome| {
        println!("{}\n", format_outcome(&outcome));
        if let (Some(path), SearchOutcome::Found(report)) = (&output, &outcome) {
            if let Err(e) = append_rows(path, report) {
                error!(path = %path, error = %e, "Failed to append rows");
            }
        }
    });

    info!("Watching. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    sessions.stop(rider_id);
    for handle in loops {
        handle.abort();
    }
    info!("Stopped");
    Ok(())
}
