//! plant-sentinel - streaming anomaly detection for plant telemetry
//!
//! Subscribes to `<line>/<machine>/<sensor>` on the plant MQTT broker,
//! classifies every reading against a rolling per-key baseline and writes the
//! results to InfluxDB.
//!
//! # Usage
//!
//! ```bash
//! # Air valve stroke timing, three-sigma policy
//! plant-sentinel --mode valve
//!
//! # Vibration with the z-score policy, readings piped from the simulator
//! simulation --stdout --sensor vibration | plant-sentinel --mode vibration --stdin --dry-run
//! ```
//!
//! # Environment Variables
//!
//! - `SENTINEL_MODE`: sensor family (`valve`, `vibration`, `temp-humid`)
//! - `SENTINEL_CONFIG`: path to a TOML config file (default: `./sentinel.toml` if present)
//! - `LINE_NAME`, `MACHINE_NAME`, `SENSOR_NAME`, `MQTT_*`, `INFLUX_*`, `MODEL_WINDOW_SIZE`,
//!   `ANOMALY_LIST_SIZE`, `THRESH_STD_LIMIT`, `Z_SCORE_THRESHOLD`: config overrides
//! - `RUST_LOG`: logging level (default: info)
//! - `LOG_FORMAT=json`: structured JSON logs

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use plant_sentinel::acquisition::MqttSource;
use plant_sentinel::api::{create_app, ApiState};
use plant_sentinel::config::SentinelConfig;
use plant_sentinel::pipeline::{
    AppState, Mode, ProcessingLoop, ReadingSource, SharedState, StdinSource,
};
use plant_sentinel::sink::{InfluxWriter, PointSink, StdoutSink};

/// How long shutdown waits for the writer to flush and tasks to finish.
const SHUTDOWN_GRACE_SECS: u64 = 10;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "plant-sentinel")]
#[command(about = "Streaming anomaly detection for plant MQTT telemetry")]
#[command(version)]
struct CliArgs {
    /// Sensor family monitored by this deployment
    #[arg(short, long, value_enum, env = "SENTINEL_MODE")]
    mode: Mode,

    /// Path to a TOML config file (overrides SENTINEL_CONFIG)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Read JSON payloads from stdin, one per line, instead of MQTT
    #[arg(long)]
    stdin: bool,

    /// Print line protocol to stdout instead of writing to InfluxDB
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON (also enabled by LOG_FORMAT=json)
    #[arg(long)]
    log_json: bool,

    /// Override the status server address (default: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,
}

/// Identifies which supervised task completed, for logging.
#[derive(Debug, Clone, Copy)]
enum TaskName {
    ProcessingLoop,
    InfluxWriter,
    HttpServer,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::ProcessingLoop => write!(f, "ProcessingLoop"),
            TaskName::InfluxWriter => write!(f, "InfluxWriter"),
            TaskName::HttpServer => write!(f, "HttpServer"),
        }
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries line protocol on --dry-run
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn log_format_is_json() -> bool {
    std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

// ============================================================================
// Task Spawning
// ============================================================================

/// Build the sink; with InfluxDB the writer task joins the set.
fn spawn_sink(
    task_set: &mut JoinSet<Result<TaskName>>,
    config: &SentinelConfig,
    dry_run: bool,
    cancel_token: CancellationToken,
) -> Result<Arc<dyn PointSink>> {
    if dry_run {
        info!("Sink: stdout (dry run)");
        return Ok(Arc::new(StdoutSink));
    }

    let influx = &config.influx;
    if influx.token.is_empty() {
        warn!("INFLUX_TOKEN is empty, writes will likely be rejected");
    }
    let (sink, writer) = InfluxWriter::new(
        &influx.url(),
        &influx.org,
        &influx.bucket,
        &influx.token,
        influx.write_options(),
    )
    .context("Failed to build InfluxDB writer")?;
    info!(url = %writer.write_url(), "Sink: InfluxDB");

    task_set.spawn(async move {
        writer.run(cancel_token).await;
        Ok(TaskName::InfluxWriter)
    });
    Ok(Arc::new(sink))
}

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Spawn the processing loop; the rest of the process shuts down when it ends.
fn spawn_processing_loop<S: ReadingSource>(
    task_set: &mut JoinSet<Result<TaskName>>,
    mut source: S,
    state: SharedState,
    sink: Arc<dyn PointSink>,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        let stats = ProcessingLoop::new(state, sink, cancel_token.clone())
            .run(&mut source)
            .await;
        info!("[ProcessingLoop] Finished: {}", stats);
        cancel_token.cancel();
        Ok(TaskName::ProcessingLoop)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring...");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Wait for cancelled tasks to wind down, aborting stragglers.
async fn drain_tasks(task_set: &mut JoinSet<Result<TaskName>>) {
    let drain = async {
        while let Some(result) = task_set.join_next().await {
            match result {
                Ok(Ok(task_name)) => info!("Shutdown: task {} stopped", task_name),
                Ok(Err(e)) => warn!("Shutdown: task ended with error: {}", e),
                Err(e) => warn!("Shutdown: task panicked: {}", e),
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), drain)
        .await
        .is_err()
    {
        warn!("Shutdown: grace period elapsed, aborting remaining tasks");
        task_set.abort_all();
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json || log_format_is_json());

    let mut config =
        SentinelConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    let topic = config.site.topic();

    info!("plant-sentinel v{}", env!("CARGO_PKG_VERSION"));
    info!(
        mode = %args.mode,
        topic = %topic,
        window = config.detector.model_window_size,
        anomaly_list = config.detector.anomaly_list_size,
        "Starting"
    );

    let handler = args
        .mode
        .handler(&config.detector)
        .context("Failed to build telemetry handler")?;
    let state = SharedState::new(AppState::new(handler));

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    let sink = spawn_sink(&mut task_set, &config, args.dry_run, cancel_token.clone())?;

    if config.server.enabled {
        let listener = tokio::net::TcpListener::bind(&config.server.addr)
            .await
            .with_context(|| format!("Failed to bind to {}", config.server.addr))?;
        info!("Status API listening on http://{}", config.server.addr);
        let app = create_app(ApiState {
            app_state: state.clone(),
            site: config.site.clone(),
        });
        spawn_http_server(&mut task_set, listener, app, cancel_token.clone());
    }

    if args.stdin {
        info!("Input: stdin (JSON payloads, one per line)");
        let source = StdinSource::new(topic);
        spawn_processing_loop(&mut task_set, source, state, sink, cancel_token.clone());
    } else {
        let client_id = config
            .mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| format!("plant-sentinel-{}", config.site.sensor_name));
        info!(
            broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
            client_id = %client_id,
            "Input: MQTT"
        );
        let source = MqttSource::new(&config.mqtt, topic, &client_id)
            .context("Failed to create MQTT client")?;
        spawn_processing_loop(&mut task_set, source, state, sink, cancel_token.clone());
    }

    let outcome = run_supervisor(&mut task_set, cancel_token).await;
    drain_tasks(&mut task_set).await;
    info!("plant-sentinel stopped");
    outcome
}
