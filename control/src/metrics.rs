//! Controller metrics

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Controller metrics registry
    pub static ref CONTROL_METRICS_REGISTRY: Registry = Registry::new();

    /// Watch events consumed by the reconciler
    static ref SYNC_EVENTS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "portti_sync_events_total",
            "Total number of watch events consumed",
        );
        let counter = IntCounterVec::new(opts, &["kind"]).unwrap_or_else(|e| {
            eprintln!("WARN: Failed to create portti_sync_events_total counter: {}", e);
            IntCounterVec::new(Opts::new("dummy", "dummy"), &["kind"]).unwrap()
        });
        if let Err(e) = CONTROL_METRICS_REGISTRY.register(Box::new(counter.clone())) {
            eprintln!("WARN: Failed to register portti_sync_events_total counter: {}", e);
            eprintln!("WARN: Metrics collection will be degraded but the controller will continue");
        }
        counter
    };

    /// Configuration generations by result
    static ref GENERATIONS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "portti_generations_total",
            "Total number of configuration generations",
        );
        let counter = IntCounterVec::new(opts, &["result"]).unwrap_or_else(|e| {
            eprintln!("WARN: Failed to create portti_generations_total counter: {}", e);
            IntCounterVec::new(Opts::new("dummy", "dummy"), &["result"]).unwrap()
        });
        if let Err(e) = CONTROL_METRICS_REGISTRY.register(Box::new(counter.clone())) {
            eprintln!("WARN: Failed to register portti_generations_total counter: {}", e);
            eprintln!("WARN: Metrics collection will be degraded but the controller will continue");
        }
        counter
    };

    /// Generation duration (build + check + publish)
    static ref GENERATION_DURATION: Histogram = {
        let opts = HistogramOpts::new(
            "portti_generation_duration_seconds",
            "Configuration generation duration in seconds",
        );
        let histogram = Histogram::with_opts(opts).unwrap_or_else(|e| {
            eprintln!("WARN: Failed to create portti_generation_duration histogram: {}", e);
            Histogram::with_opts(HistogramOpts::new("dummy", "dummy")).unwrap()
        });
        if let Err(e) = CONTROL_METRICS_REGISTRY.register(Box::new(histogram.clone())) {
            eprintln!("WARN: Failed to register portti_generation_duration histogram: {}", e);
            eprintln!("WARN: Metrics collection will be degraded but the controller will continue");
        }
        histogram
    };
}

/// Record one consumed watch event
pub fn record_sync_event(kind: &str) {
    SYNC_EVENTS_TOTAL.with_label_values(&[kind]).inc();
}

/// Record one configuration generation
pub fn record_generation(result: &str, duration_secs: f64) {
    GENERATIONS_TOTAL.with_label_values(&[result]).inc();
    GENERATION_DURATION.observe(duration_secs);
}

/// Gather controller metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = CONTROL_METRICS_REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert to UTF-8: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recorded_and_gathered() {
        record_sync_event("Pod");
        record_generation("success", 0.042);

        let metrics = gather_metrics().expect("should gather metrics");
        assert!(metrics.contains("portti_sync_events_total"));
        assert!(metrics.contains("portti_generations_total"));
        assert!(metrics.contains("portti_generation_duration_seconds"));
    }
}
