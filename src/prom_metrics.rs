//! # Prometheus Metrics
//!
//! Settlement metrics in the Prometheus text exposition format, served at
//! `GET /metrics`.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `praktis_escrow_released_total` | Counter | | Escrows released by any path |
//! | `praktis_auto_released_total` | Counter | | Releases forced by the sweep |
//! | `praktis_sweep_failures_total` | Counter | | Per-milestone sweep errors |
//! | `praktis_sweep_duration_seconds` | Histogram | | Wall time of one sweep pass |
//! | `praktis_webhook_rejected_total` | Counter | `reason` | Gateway notifications refused |
//! | `praktis_withdrawals_requested_total` | Counter | | Withdrawals created |
//! | `praktis_messaging_failures_total` | Counter | | System messages that could not be posted |
//! | `praktis_http_request_duration_seconds` | Histogram | `method`, `path` | HTTP latency |

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct ReasonLabel {
    pub reason: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct HttpLabel {
    pub method: String,
    pub path: String,
}

fn http_histogram() -> Histogram {
    Histogram::new(exponential_buckets(0.005, 2.0, 12))
}

/// All fields are atomic and safe to update from any task.
pub struct Metrics {
    pub registry: Registry,
    pub escrow_released: Counter,
    pub auto_released: Counter,
    pub sweep_failures: Counter,
    pub sweep_duration: Histogram,
    pub webhook_rejected: Family<ReasonLabel, Counter>,
    pub withdrawals_requested: Counter,
    pub messaging_failures: Counter,
    pub http_request_duration: Family<HttpLabel, Histogram, fn() -> Histogram>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let escrow_released = Counter::default();
        registry.register(
            "praktis_escrow_released",
            "Escrow transactions released to analysts",
            escrow_released.clone(),
        );

        let auto_released = Counter::default();
        registry.register(
            "praktis_auto_released",
            "Milestones approved by the auto-release sweep",
            auto_released.clone(),
        );

        let sweep_failures = Counter::default();
        registry.register(
            "praktis_sweep_failures",
            "Milestones the auto-release sweep failed to settle",
            sweep_failures.clone(),
        );

        let sweep_duration = Histogram::new(exponential_buckets(0.01, 2.0, 12));
        registry.register(
            "praktis_sweep_duration_seconds",
            "Duration of one auto-release sweep",
            sweep_duration.clone(),
        );

        let webhook_rejected = Family::<ReasonLabel, Counter>::default();
        registry.register(
            "praktis_webhook_rejected",
            "Gateway notifications rejected by reason",
            webhook_rejected.clone(),
        );

        let withdrawals_requested = Counter::default();
        registry.register(
            "praktis_withdrawals_requested",
            "Withdrawal requests created",
            withdrawals_requested.clone(),
        );

        let messaging_failures = Counter::default();
        registry.register(
            "praktis_messaging_failures",
            "System messages that failed to post",
            messaging_failures.clone(),
        );

        let http_request_duration =
            Family::<HttpLabel, Histogram, fn() -> Histogram>::new_with_constructor(http_histogram);
        registry.register(
            "praktis_http_request_duration_seconds",
            "HTTP request latency",
            http_request_duration.clone(),
        );

        Self {
            registry,
            escrow_released,
            auto_released,
            sweep_failures,
            sweep_duration,
            webhook_rejected,
            withdrawals_requested,
            messaging_failures,
            http_request_duration,
        }
    }

    pub fn webhook_rejected(&self, reason: &str) {
        self.webhook_rejected
            .get_or_create(&ReasonLabel {
                reason: reason.to_string(),
            })
            .inc();
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        if let Err(e) = encode(&mut buf, &self.registry) {
            tracing::error!(error = %e, "failed to encode metrics");
        }
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
