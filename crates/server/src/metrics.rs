//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the scriptrelay server:
//! - HTTP request metrics (latency, counts, auth failures)
//! - WebSocket connection and message metrics
//! - Job metrics (enqueued, finished by outcome, run time)
//! - Queue depth (collected dynamically)

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use regex_lite::Regex;
use scriptrelay_core::{JobState, JobStatus};

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "scriptrelay_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("scriptrelay_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "scriptrelay_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

/// Authentication failures.
pub static AUTH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "scriptrelay_auth_failures_total",
            "Total authentication failures",
        ),
        &["reason"],
    )
    .unwrap()
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active WebSocket connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "scriptrelay_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .unwrap()
});

/// Total WebSocket connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "scriptrelay_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .unwrap()
});

/// WebSocket frames sent by type.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("scriptrelay_ws_messages_sent_total", "WebSocket messages sent"),
        &["type"],
    )
    .unwrap()
});

// =============================================================================
// Job Metrics
// =============================================================================

/// Jobs accepted by a queue.
pub static JOBS_ENQUEUED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("scriptrelay_jobs_enqueued_total", "Jobs accepted by a queue"),
        &["queue"],
    )
    .unwrap()
});

/// Jobs that left a queue, by outcome.
pub static JOBS_FINISHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("scriptrelay_jobs_finished_total", "Jobs finished by outcome"),
        &["queue", "outcome"],
    )
    .unwrap()
});

/// Job run time in seconds.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("scriptrelay_job_duration_seconds", "Job run time in seconds")
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["queue"],
    )
    .unwrap()
});

/// Jobs waiting for a worker (collected dynamically).
pub static QUEUE_JOBS_QUEUED: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("scriptrelay_queue_jobs_queued", "Jobs waiting for a worker"),
        &["queue"],
    )
    .unwrap()
});

/// Jobs currently running (collected dynamically).
pub static QUEUE_JOBS_ACTIVE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("scriptrelay_queue_jobs_active", "Jobs currently running"),
        &["queue"],
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(AUTH_FAILURES_TOTAL.clone()))
        .unwrap();

    // WebSocket
    registry
        .register(Box::new(WS_CONNECTIONS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_CONNECTIONS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_MESSAGES_SENT.clone()))
        .unwrap();

    // Jobs
    registry
        .register(Box::new(JOBS_ENQUEUED_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(JOBS_FINISHED_TOTAL.clone()))
        .unwrap();
    registry.register(Box::new(JOB_DURATION.clone())).unwrap();
    registry
        .register(Box::new(QUEUE_JOBS_QUEUED.clone()))
        .unwrap();
    registry
        .register(Box::new(QUEUE_JOBS_ACTIVE.clone()))
        .unwrap();
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Refresh queue gauges from the current queue statistics.
pub fn collect_dynamic_metrics(state: &AppState) {
    for stats in state.queue().stats() {
        QUEUE_JOBS_QUEUED
            .with_label_values(&[&stats.name])
            .set(stats.queued as i64);
        QUEUE_JOBS_ACTIVE
            .with_label_values(&[&stats.name])
            .set(stats.active as i64);
    }
}

/// Record a job leaving its queue. Installed as the queue's finish callback.
pub fn record_job_finished(status: &JobStatus) {
    let outcome = match status.state {
        JobState::Finished => "finished",
        JobState::Failed => "failed",
        JobState::TimedOut => "timed_out",
        JobState::Queued | JobState::Running => return,
    };
    JOBS_FINISHED_TOTAL
        .with_label_values(&[&status.queue, outcome])
        .inc();
    if let Some(secs) = status.run_secs() {
        JOB_DURATION.with_label_values(&[&status.queue]).observe(secs);
    }
}

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});
static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    if path.starts_with("/media/") {
        return "/media/{file}".to_string();
    }
    let result = UUID_RE.replace_all(path, "{id}");
    let result = NUMERIC_RE.replace_all(&result, "/{id}$1");
    result.to_string()
}
