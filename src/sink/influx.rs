//! Batching InfluxDB v2 writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Point, PointSink};

/// Attempts per batch after the first one fails.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// HTTP request timeout for a single write.
const WRITE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("InfluxDB returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

impl SinkError {
    /// Whether a later attempt may succeed.
    fn is_retryable(&self) -> bool {
        match self {
            SinkError::Http(_) => true,
            SinkError::Status { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

/// Batching behaviour of the writer.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub jitter_interval: Duration,
    pub retry_interval: Duration,
    pub max_retries: u32,
    pub channel_capacity: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_millis(1000),
            jitter_interval: Duration::from_millis(0),
            retry_interval: Duration::from_millis(1000),
            max_retries: DEFAULT_MAX_RETRIES,
            channel_capacity: 10_000,
        }
    }
}

/// Producer half: cheap to clone, never blocks.
#[derive(Debug, Clone)]
pub struct InfluxSink {
    tx: mpsc::Sender<Point>,
    dropped: Arc<AtomicU64>,
}

impl InfluxSink {
    /// Points discarded because the writer was saturated or gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl PointSink for InfluxSink {
    fn emit(&self, point: Point) {
        match self.tx.try_send(point) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped_total = n, "InfluxDB write queue full, point dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                error!(dropped_total = n, "InfluxDB writer stopped, point dropped");
            }
        }
    }
}

/// Consumer half: owns the HTTP client and the pending batch.
pub struct InfluxWriter {
    http: reqwest::Client,
    write_url: String,
    token: String,
    options: WriteOptions,
    rx: mpsc::Receiver<Point>,
    buffer: Vec<String>,
    batches_written: u64,
    batches_dropped: u64,
}

impl InfluxWriter {
    /// Build the writer and its sink.
    ///
    /// `base_url` is e.g. `http://influx:8086`; points are written to `bucket`
    /// in `org` with millisecond precision.
    pub fn new(
        base_url: &str,
        org: &str,
        bucket: &str,
        token: &str,
        options: WriteOptions,
    ) -> Result<(InfluxSink, Self), SinkError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(WRITE_TIMEOUT_SECS))
            .build()?;

        let write_url = reqwest::Url::parse_with_params(
            &format!("{}/api/v2/write", base_url.trim_end_matches('/')),
            &[("org", org), ("bucket", bucket), ("precision", "ms")],
        )
        .map(String::from)
        .unwrap_or_else(|_| {
            format!(
                "{}/api/v2/write?org={org}&bucket={bucket}&precision=ms",
                base_url.trim_end_matches('/')
            )
        });

        let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
        let sink = InfluxSink {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        let writer = Self {
            http,
            write_url,
            token: token.to_string(),
            buffer: Vec::with_capacity(options.batch_size),
            options,
            rx,
            batches_written: 0,
            batches_dropped: 0,
        };
        Ok((sink, writer))
    }

    pub fn write_url(&self) -> &str {
        &self.write_url
    }

    fn next_flush_delay(&self) -> Duration {
        let jitter_ms = u64::try_from(self.options.jitter_interval.as_millis()).unwrap_or(0);
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        self.options.flush_interval + jitter
    }

    /// Drain the channel until cancelled or every sink is dropped.
    ///
    /// The pending batch is flushed before returning.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        info!(url = %self.write_url, batch_size = self.options.batch_size, "[InfluxWriter] Task starting");

        let flush_timer = tokio::time::sleep(self.next_flush_delay());
        tokio::pin!(flush_timer);

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!("[InfluxWriter] Received shutdown signal");
                    break;
                }
                maybe_point = self.rx.recv() => {
                    match maybe_point {
                        Some(point) => {
                            if let Some(line) = point.to_line_protocol() {
                                self.buffer.push(line);
                            }
                            if self.buffer.len() >= self.options.batch_size {
                                self.flush().await;
                            }
                        }
                        None => {
                            info!("[InfluxWriter] All producers closed");
                            break;
                        }
                    }
                }
                () = &mut flush_timer => {
                    self.flush().await;
                    flush_timer.as_mut().reset(tokio::time::Instant::now() + self.next_flush_delay());
                }
            }
        }

        // whatever is still queued goes out with the final batch
        while let Ok(point) = self.rx.try_recv() {
            if let Some(line) = point.to_line_protocol() {
                self.buffer.push(line);
            }
        }
        self.flush().await;
        info!(
            batches_written = self.batches_written,
            batches_dropped = self.batches_dropped,
            "[InfluxWriter] Stopped"
        );
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let body = self.buffer.join("\n");
        let lines = self.buffer.len();
        self.buffer.clear();

        let mut attempt = 0;
        loop {
            match self.post(&body).await {
                Ok(()) => {
                    self.batches_written += 1;
                    debug!(lines, "Batch written to InfluxDB");
                    return;
                }
                Err(e) if e.is_retryable() && attempt < self.options.max_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.options.max_retries,
                        error = %e,
                        "InfluxDB write failed, retrying"
                    );
                    tokio::time::sleep(self.options.retry_interval).await;
                }
                Err(e) => {
                    self.batches_dropped += 1;
                    error!(lines, error = %e, "Send data to InfluxDB failed, batch dropped");
                    return;
                }
            }
        }
    }

    async fn post(&self, body: &str) -> Result<(), SinkError> {
        let resp = self
            .http
            .post(&self.write_url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body.to_string())
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(SinkError::Status { status, body })
        }
    }
}
