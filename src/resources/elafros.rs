use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ElaService routes traffic for a logical service across one or more Revisions.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "ElaService",
    group = "elafros.dev",
    version = "v1alpha1",
    namespaced,
    printcolumn = r#"{"name":"Domain", "type":"string", "jsonPath":".status.domain"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "ElaServiceStatus", shortname = "es")]
#[serde(rename_all = "camelCase")]
pub struct ElaServiceSpec {
    /// DNS suffix under which the service is exposed, as `<name>.<domainSuffix>`.
    /// Defaults to the suffix the controller was started with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_suffix: Option<String>,

    /// How traffic is split across revisions
    #[serde(default)]
    pub rollout: RolloutSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct RolloutSpec {
    /// Ordered list of weighted traffic targets. Percentages are expected to add up to 100.
    #[serde(default)]
    pub traffic: Vec<TrafficTarget>,
}

/// A weighted reference to either a Revision or a RevisionTemplate.
/// Exactly one of `revision` or `revisionTemplate` should be set.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficTarget {
    /// Name of a specific Revision to route to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Name of a RevisionTemplate; traffic goes to its latest Revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_template: Option<String>,

    /// Share of traffic for this target
    #[schemars(range(min = 0, max = 100))]
    pub percent: i32,
}

/// The resolved form of a [`TrafficTarget`] reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRef<'a> {
    Revision(&'a str),
    RevisionTemplate(&'a str),
}

impl TrafficTarget {
    /// The reference this target points at. A template takes precedence over a revision
    /// if both are set; `None` if neither is.
    pub fn target_ref(&self) -> Option<TargetRef<'_>> {
        match (self.revision_template.as_deref(), self.revision.as_deref()) {
            (Some(template), _) if !template.is_empty() => {
                Some(TargetRef::RevisionTemplate(template))
            }
            (_, Some(revision)) if !revision.is_empty() => Some(TargetRef::Revision(revision)),
            _ => None,
        }
    }
}

/// Status of the ElaService
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElaServiceStatus {
    /// Represents the latest available observations of the ElaService's current state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<ElaServiceCondition>>,

    /// The host under which the service is reachable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// The generation of the spec last acted on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Conditions for the ElaService status
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElaServiceCondition {
    /// Last time the condition transitioned from one status to another
    pub last_transition_time: Option<Time>,

    /// Human-readable message indicating details about last transition
    pub message: Option<String>,

    /// Reason for the condition's last transition
    pub reason: Option<String>,

    /// Status is the status of the condition (True, False, Unknown)
    pub status: String,

    /// Type of condition (Ready)
    pub r#type: String,
}

/// RevisionTemplate is a mutable pointer to the most recently created Revision.
/// Only its status is read here.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "RevisionTemplate",
    group = "elafros.dev",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "RevisionTemplateStatus")]
pub struct RevisionTemplateSpec {
    /// Passed through as-is
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct RevisionTemplateStatus {
    /// Name of the latest Revision stamped out from this template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
}

/// Revision is an immutable snapshot of code and configuration
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(kind = "Revision", group = "elafros.dev", version = "v1alpha1", namespaced)]
#[kube(status = "RevisionStatus")]
pub struct RevisionSpec {
    /// Passed through as-is
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RevisionStatus {
    /// Name of the Service backing this revision, set once it is ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}
