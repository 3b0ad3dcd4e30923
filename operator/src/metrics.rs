use crate::Result;
use prometheus::{
    histogram_opts, opts, Encoder, HistogramTimer, HistogramVec, IntCounter, IntCounterVec, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub handled: IntCounterVec,
    pub requeues: IntCounterVec,
    pub duration: HistogramVec,
    pub cleanup_runs: IntCounter,
    pub cleanup_stopped: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let handled = IntCounterVec::new(
            opts!("observer_handled_total", "handled notifications by outcome"),
            &["observer", "result"],
        )?;
        let requeues = IntCounterVec::new(
            opts!("observer_requeues_total", "notifications requeued after a failure"),
            &["observer"],
        )?;
        let duration = HistogramVec::new(
            histogram_opts!(
                "observer_handle_duration_seconds",
                "handling duration",
                vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1., 5., 15.]
            ),
            &["observer"],
        )?;
        let cleanup_runs = IntCounter::new("cleanup_runs_total", "cleanup passes")?;
        let cleanup_stopped = IntCounter::new(
            "cleanup_instances_stopped_total",
            "deployment instances marked stopped by the cleanup",
        )?;
        registry.register(Box::new(handled.clone()))?;
        registry.register(Box::new(requeues.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(cleanup_runs.clone()))?;
        registry.register(Box::new(cleanup_stopped.clone()))?;
        Ok(Self {
            registry,
            handled,
            requeues,
            duration,
            cleanup_runs,
            cleanup_stopped,
        })
    }

    /// Observes the handling duration when the returned timer is dropped
    #[must_use]
    pub fn measure(&self, observer: &str) -> HistogramTimer {
        self.duration.with_label_values(&[observer]).start_timer()
    }

    pub fn handled(&self, observer: &str, result: &str) {
        self.handled.with_label_values(&[observer, result]).inc();
    }

    pub fn requeued(&self, observer: &str) {
        self.requeues.with_label_values(&[observer]).inc();
    }

    pub fn cleanup_run(&self) {
        self.cleanup_runs.inc();
    }

    pub fn instances_stopped(&self, count: u64) {
        self.cleanup_stopped.inc_by(count);
    }

    /// Text exposition of every registered metric
    pub fn gather(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
