use crate::error::ApiError;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::time::Duration;

/// OpenTelemetry instruments for the prediction endpoint.
///
/// Instruments are no-ops until a meter provider is registered, so they are
/// always safe to record into.
#[derive(Clone)]
pub struct PredictMetrics {
    duration: Histogram<f64>,
    requests: Counter<u64>,
    rejected: Counter<u64>,
    detections: Counter<u64>,
}

impl PredictMetrics {
    pub fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0, 5.0, 10.0,
        ];

        let duration = meter
            .f64_histogram("predict_duration_seconds")
            .with_description("Time to serve a prediction (decode + infer + format)")
            .with_unit("s")
            .with_boundaries(latency_buckets.to_vec())
            .build();
        let requests = meter
            .u64_counter("predict_requests_total")
            .with_description("Total prediction requests served successfully")
            .build();
        let rejected = meter
            .u64_counter("predict_rejected_total")
            .with_description("Total prediction requests that failed, by reason")
            .build();
        let detections = meter
            .u64_counter("predict_detections_total")
            .with_description("Total detections returned")
            .build();

        Self {
            duration,
            requests,
            rejected,
            detections,
        }
    }

    pub fn record_success(&self, detections: usize, elapsed: Duration) {
        self.duration.record(elapsed.as_secs_f64(), &[]);
        self.requests.add(1, &[]);
        self.detections.add(detections as u64, &[]);
    }

    pub fn record_failure(&self, error: &ApiError) {
        self.rejected
            .add(1, &[KeyValue::new("reason", error.reason())]);
    }
}
