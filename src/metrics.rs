use kube::ResourceExt;
use prometheus::{
    histogram_opts, opts, Histogram, HistogramTimer, IntCounter, IntCounterVec, Registry,
};

use crate::resources::elafros::ElaService;
use crate::Error;

/// Prometheus series for ElaService syncs
#[derive(Clone)]
pub struct Metrics {
    pub syncs: IntCounter,
    pub sync_failures: IntCounterVec,
    pub sync_duration: Histogram,
}

impl Metrics {
    /// Creates the series and registers them with `registry`
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let syncs = IntCounter::with_opts(opts!(
            "elaservice_controller_syncs_total",
            "ElaService keys taken off the work queue and synced"
        ))?;
        let sync_failures = IntCounterVec::new(
            opts!(
                "elaservice_controller_sync_errors_total",
                "ElaService syncs that failed and were requeued with backoff"
            ),
            &["namespace", "elaservice", "error"],
        )?;
        let sync_duration = Histogram::with_opts(
            histogram_opts!(
                "elaservice_controller_sync_duration_seconds",
                "Time spent converging the Service, Ingress and RouteRule of one ElaService"
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1., 5., 30.]),
        )?;

        registry.register(Box::new(syncs.clone()))?;
        registry.register(Box::new(sync_failures.clone()))?;
        registry.register(Box::new(sync_duration.clone()))?;

        Ok(Self {
            syncs,
            sync_failures,
            sync_duration,
        })
    }

    /// Counts a sync; its duration is observed when the returned timer drops
    pub fn sync_started(&self) -> HistogramTimer {
        self.syncs.inc();
        self.sync_duration.start_timer()
    }

    pub fn sync_failed(&self, es: &ElaService, err: &Error) {
        self.sync_failures
            .with_label_values(&[
                es.namespace().unwrap_or_default().as_str(),
                es.name_any().as_str(),
                err.metric_label(),
            ])
            .inc()
    }
}
