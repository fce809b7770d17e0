//! Prometheus metrics for hr-service.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!("hr_db_query_duration_seconds", "Database query duration"),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Webhook events by provider and outcome.
pub static WEBHOOK_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "hr_webhook_events_total",
            "Webhook events received by provider and outcome"
        ),
        &["provider", "outcome"]
    )
    .expect("Failed to register WEBHOOK_EVENTS_TOTAL")
});

/// Subscription state transitions by target status and trigger.
pub static SUBSCRIPTION_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "hr_subscription_transitions_total",
            "Subscription state transitions by target status and trigger"
        ),
        &["to_status", "trigger"]
    )
    .expect("Failed to register SUBSCRIPTION_TRANSITIONS_TOTAL")
});

/// Rows moved by the scheduled sweeps.
pub static SWEEP_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "hr_sweep_transitions_total",
            "Subscriptions transitioned by cleanup sweeps"
        ),
        &["sweep"]
    )
    .expect("Failed to register SWEEP_TRANSITIONS_TOTAL")
});

/// Deduction calculations by contract type.
pub static DEDUCTION_CALCULATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "hr_deduction_calculations_total",
            "Payroll deduction calculations by contract type"
        ),
        &["contract_type"]
    )
    .expect("Failed to register DEDUCTION_CALCULATIONS_TOTAL")
});

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&WEBHOOK_EVENTS_TOTAL);
    Lazy::force(&SUBSCRIPTION_TRANSITIONS_TOTAL);
    Lazy::force(&SWEEP_TRANSITIONS_TOTAL);
    Lazy::force(&DEDUCTION_CALCULATIONS_TOTAL);
}

/// Render the default registry in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
