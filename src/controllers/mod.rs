use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::queue::Backoff;

pub mod elaservice;

pub const DEFAULT_DOMAIN_SUFFIX: &str = "demo-domain.com";
pub const DEFAULT_WORKERS: usize = 2;

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
        }
    }
}

/// State shared between the controller and the web server
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the sync handler
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    pub registry: prometheus::Registry,
    /// Number of concurrent workers
    pub workers: usize,
    /// Domain suffix for ElaServices that don't set one
    pub domain_suffix: String,
    /// Per-key retry backoff
    pub backoff: Backoff,
    /// Address the web server listens on
    pub bind_address: SocketAddr,
}

impl Default for State {
    fn default() -> Self {
        Self::new(
            DEFAULT_WORKERS,
            DEFAULT_DOMAIN_SUFFIX.into(),
            Backoff::default(),
            SocketAddr::from(([0, 0, 0, 0], 8080)),
        )
    }
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new(
        workers: usize,
        domain_suffix: String,
        backoff: Backoff,
        bind_address: SocketAddr,
    ) -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            registry: prometheus::Registry::default(),
            workers,
            domain_suffix,
            backoff,
            bind_address,
        }
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}
