//! Reading source abstraction for telemetry ingestion.
//!
//! Provides a unified trait for receiving raw payloads from different
//! sources: the MQTT broker, stdin (JSON, one per line) and in-memory replay.
//! Decoding happens in the processing loop so every source reports malformed
//! payloads the same way.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MQTT client error: {0}")]
    Mqtt(String),

    #[error("Invalid MQTT QoS level: {0}")]
    InvalidQos(u8),
}

/// Events produced by a reading source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// One raw payload and the topic it arrived on.
    Message { topic: String, payload: Vec<u8> },
    /// No more data (EOF for stdin/replay).
    Eof,
}

/// Trait abstracting where readings come from.
///
/// Implementations handle reconnection and pacing internally. The processing
/// loop calls [`next_event`](ReadingSource::next_event) in a `select!` with
/// cancellation.
#[async_trait]
pub trait ReadingSource: Send + 'static {
    /// Wait for the next payload.
    ///
    /// Returns `Err` only for unrecoverable errors.
    async fn next_event(&mut self) -> Result<SourceEvent, SourceError>;

    /// Human-readable name for logging (e.g. "MQTT", "stdin").
    fn source_name(&self) -> &str;
}

// ============================================================================
// Replay Source
// ============================================================================

/// Replays pre-loaded payloads with an optional inter-message delay.
pub struct ReplaySource {
    messages: VecDeque<(String, Vec<u8>)>,
    delay: Duration,
    yielded_first: bool,
}

impl ReplaySource {
    pub fn new(messages: Vec<(String, Vec<u8>)>) -> Self {
        Self {
            messages: messages.into(),
            delay: Duration::ZERO,
            yielded_first: false,
        }
    }

    /// Every payload on one topic.
    pub fn on_topic<I, P>(topic: &str, payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        Self::new(
            payloads
                .into_iter()
                .map(|p| (topic.to_string(), p.into()))
                .collect(),
        )
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn remaining(&self) -> usize {
        self.messages.len()
    }
}

#[async_trait]
impl ReadingSource for ReplaySource {
    async fn next_event(&mut self) -> Result<SourceEvent, SourceError> {
        // no delay before the first message
        if self.yielded_first && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.messages.pop_front() {
            Some((topic, payload)) => {
                self.yielded_first = true;
                Ok(SourceEvent::Message { topic, payload })
            }
            None => Ok(SourceEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}

// ============================================================================
// Stdin Source (JSON readings, one per line)
// ============================================================================

/// Reads one JSON payload per line from stdin, or any buffered reader.
///
/// Used with the simulator: `simulation --stdout vibration | plant-sentinel --stdin`.
/// Every line is attributed to the configured topic. Lines are passed on as
/// raw bytes, so invalid UTF-8 fails that reading's decode and nothing else.
pub struct StdinSource<R = BufReader<Stdin>> {
    reader: R,
    line_buffer: Vec<u8>,
    topic: String,
}

impl StdinSource {
    pub fn new(topic: impl Into<String>) -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()), topic)
    }
}

impl<R> StdinSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn from_reader(reader: R, topic: impl Into<String>) -> Self {
        Self {
            reader,
            line_buffer: Vec::with_capacity(512),
            topic: topic.into(),
        }
    }
}

fn trim_line(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

#[async_trait]
impl<R> ReadingSource for StdinSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn next_event(&mut self) -> Result<SourceEvent, SourceError> {
        loop {
            self.line_buffer.clear();
            let bytes = self.reader.read_until(b'\n', &mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(SourceEvent::Eof);
            }
            let line = trim_line(&self.line_buffer);
            if line.is_empty() {
                continue;
            }
            return Ok(SourceEvent::Message {
                topic: self.topic.clone(),
                payload: line.to_vec(),
            });
        }
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}
