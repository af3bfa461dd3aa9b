// Prometheus metrics for the game backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Sessions held in memory.
    pub static ref ACTIVE_SESSIONS: IntGauge =
        IntGauge::new("two_truths_active_sessions", "Sessions held in memory").unwrap();

    /// Round countdown tasks currently running.
    pub static ref ACTIVE_ROUND_TIMERS: IntGauge =
        IntGauge::new("two_truths_active_round_timers", "Round countdown tasks running").unwrap();

    /// Live WebSocket connections.
    pub static ref CONNECTED_WEBSOCKETS: IntGauge =
        IntGauge::new("two_truths_connected_websockets", "Live WebSocket connections").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    pub static ref SESSIONS_CREATED_TOTAL: IntCounter = IntCounter::new(
        "two_truths_sessions_created_total",
        "Total sessions created",
    )
    .unwrap();

    pub static ref ROUNDS_STARTED_TOTAL: IntCounter = IntCounter::new(
        "two_truths_rounds_started_total",
        "Rounds whose countdown was started",
    )
    .unwrap();

    /// Rounds revealed, by what closed voting (timer, manual).
    pub static ref REVEALS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("two_truths_reveals_total", "Rounds revealed"),
        &["trigger"],
    )
    .unwrap();

    /// Reveal attempts that lost the race and were ignored.
    pub static ref REVEALS_SUPPRESSED_TOTAL: IntCounter = IntCounter::new(
        "two_truths_reveals_suppressed_total",
        "Duplicate reveal attempts ignored",
    )
    .unwrap();

    pub static ref VOTES_SUBMITTED_TOTAL: IntCounter = IntCounter::new(
        "two_truths_votes_submitted_total",
        "Votes recorded, including changed votes",
    )
    .unwrap();

    /// Times the sample pool stood in for the lie relay.
    pub static ref LIE_FALLBACKS_TOTAL: IntCounter = IntCounter::new(
        "two_truths_lie_fallbacks_total",
        "Lie books drawn from the fallback pool",
    )
    .unwrap();

    pub static ref GAMES_COMPLETED_TOTAL: IntCounter = IntCounter::new(
        "two_truths_games_completed_total",
        "Games with every round revealed",
    )
    .unwrap();

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("two_truths_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    pub static ref WEBSOCKET_MESSAGES_SENT_TOTAL: IntCounter = IntCounter::new(
        "two_truths_websocket_messages_sent_total",
        "Total WebSocket messages sent",
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "two_truths_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["endpoint"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Safe to call more than once.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_SESSIONS.clone()),
        Box::new(ACTIVE_ROUND_TIMERS.clone()),
        Box::new(CONNECTED_WEBSOCKETS.clone()),
        Box::new(SESSIONS_CREATED_TOTAL.clone()),
        Box::new(ROUNDS_STARTED_TOTAL.clone()),
        Box::new(REVEALS_TOTAL.clone()),
        Box::new(REVEALS_SUPPRESSED_TOTAL.clone()),
        Box::new(VOTES_SUBMITTED_TOTAL.clone()),
        Box::new(LIE_FALLBACKS_TOTAL.clone()),
        Box::new(GAMES_COMPLETED_TOTAL.clone()),
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(WEBSOCKET_MESSAGES_SENT_TOTAL.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            tracing::debug!("Metric not registered: {e}");
        }
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Normalize a URL path for metric labels: session UUIDs and numeric ids
/// become `:id` so label cardinality stays bounded.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.parse::<i64>().is_ok() || uuid::Uuid::parse_str(segment).is_ok() {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
