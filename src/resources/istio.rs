use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Istio RouteRule, splitting traffic for a destination across weighted backends
/// API: config.istio.io/v1alpha2
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "config.istio.io",
    version = "v1alpha2",
    kind = "RouteRule",
    namespaced
)]
pub struct RouteRuleSpec {
    /// The service whose traffic is being routed
    pub destination: IstioService,

    /// Weighted backends, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<DestinationWeight>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct IstioService {
    /// Short name or fully qualified name of the service
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct DestinationWeight {
    /// Backend service receiving this share of traffic
    pub destination: IstioService,

    /// Percentage of traffic sent to the destination
    pub weight: i32,
}
