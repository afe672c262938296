use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

use crate::protocol::canonical::CanonicalUsage;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_tracing(log_level: &str, json: bool) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let tracing_level = map_log_level(&level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(tracing_level))
        .unwrap_or_else(|_| EnvFilter::new("INFO"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn map_log_level(level: &str) -> &str {
    match level {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    }
}

/// Per-stream latency instrumentation.
///
/// Logs time-to-first-chunk when the first upstream chunk arrives and the
/// total duration when the stream completes. A stream dropped before
/// completion (client disconnect) is logged at debug level.
#[derive(Debug)]
pub struct StreamTimer {
    label: &'static str,
    started: Instant,
    first_chunk: Option<Duration>,
    completed: bool,
}

impl StreamTimer {
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        Self::started_at(label, Instant::now())
    }

    /// Timer whose clock started earlier, e.g. before the upstream request was sent.
    #[must_use]
    pub fn started_at(label: &'static str, started: Instant) -> Self {
        Self {
            label,
            started,
            first_chunk: None,
            completed: false,
        }
    }

    pub fn mark_chunk(&mut self) {
        if self.first_chunk.is_some() {
            return;
        }
        let elapsed = self.started.elapsed();
        self.first_chunk = Some(elapsed);
        tracing::info!(
            stream = self.label,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "time to first chunk"
        );
    }

    pub fn complete(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        tracing::info!(
            stream = self.label,
            total_ms = self.started.elapsed().as_secs_f64() * 1000.0,
            "total stream time"
        );
    }

    #[must_use]
    pub fn first_chunk(&self) -> Option<Duration> {
        self.first_chunk
    }
}

impl Drop for StreamTimer {
    fn drop(&mut self) {
        if !self.completed {
            tracing::debug!(
                stream = self.label,
                elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0,
                "stream dropped before completion"
            );
        }
    }
}

/// Log upstream-reported usage for a finished stream.
pub fn log_usage(label: &str, model: &str, usage: &CanonicalUsage) {
    tracing::info!(
        stream = label,
        model = model,
        input_tokens = usage.input_tokens.unwrap_or(0),
        output_tokens = usage.output_tokens.unwrap_or(0),
        total_tokens = usage.total_tokens.unwrap_or(0),
        "upstream usage"
    );
}
