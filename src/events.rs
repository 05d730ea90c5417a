use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use tracing::*;

use crate::resources::elafros::ElaService;

pub const CONTROLLER_AGENT_NAME: &str = "elaservice-controller";

/// Reason for the event fired when an ElaService is synced
pub const SUCCESS_SYNCED: &str = "Synced";
/// Reason for the event fired when an ElaService fails to sync
pub const FAILED_SYNC: &str = "FailedSync";
/// Message for the event fired when an ElaService is synced
pub const MESSAGE_RESOURCE_SYNCED: &str = "ElaService synced successfully";

/// Records human readable events against an ElaService.
///
/// Recording is best effort: implementations log failures instead of returning them.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, es: &ElaService, type_: EventType, reason: &str, message: String);
}

/// [`EventRecorder`] that publishes Kubernetes Events
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: Client) -> Self {
        let reporter: Reporter = CONTROLLER_AGENT_NAME.into();
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, es: &ElaService, type_: EventType, reason: &str, message: String) {
        debug!(reason, "Recording event for ElaService {}: {message}", es.name_any());
        let result = self
            .recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note: Some(message),
                    action: "Sync".into(),
                    secondary: None,
                },
                &es.object_ref(&()),
            )
            .await;

        if let Err(err) = result {
            warn!(
                "Failed to record {reason} event for ElaService {}: {err}",
                es.name_any()
            );
        }
    }
}
