use thiserror::Error;
use tracing::*;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Invalid resource key: {0:?}")]
    InvalidKey(String),

    #[error("ElaService {0} has no uid and cannot own resources")]
    MissingUid(String),

    #[error("Traffic target {index} of ElaService {name} names neither a revision nor a revisionTemplate")]
    InvalidTrafficTarget { name: String, index: usize },

    #[error("RevisionTemplate {0} has no latest Revision yet")]
    RevisionTemplateNotReady(String),

    #[error("Revision {0} has no Service yet")]
    RevisionNotReady(String),

    #[error("The ElaService cache failed to sync")]
    CacheSyncFailed,

    #[error("Failed to register metrics: {0}")]
    MetricsError(#[from] prometheus::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "KubeError",
            Error::InvalidKey(_) => "InvalidKey",
            Error::MissingUid(_) => "MissingUid",
            Error::InvalidTrafficTarget { .. } => "InvalidTrafficTarget",
            Error::RevisionTemplateNotReady(_) => "RevisionTemplateNotReady",
            Error::RevisionNotReady(_) => "RevisionNotReady",
            Error::CacheSyncFailed => "CacheSyncFailed",
            Error::MetricsError(_) => "MetricsError",
        }
    }
}

/// API access used by the sync handler
pub mod client;

pub mod controllers;

pub use controllers::State;

/// Kubernetes Events for ElaServices
pub mod events;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use metrics::Metrics;

/// Deduplicating, rate limited work queue
pub mod queue;

/// CRDs
pub mod resources;

pub mod watch;

pub mod workers;

/// Initialize the controller and shared state (given the crd is installed)
pub async fn run(state: State) -> Result<()> {
    let client = kube::Client::try_default().await?;
    let metrics = Metrics::new(&state.registry)?;

    info!(
        workers = state.workers,
        domain_suffix = %state.domain_suffix,
        "Initializing controller"
    );
    controllers::elaservice::run(client, metrics, state).await
}
