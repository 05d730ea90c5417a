use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;

use crate::resources::elafros::ElaService;

pub mod ingress;
pub mod placeholder;
pub mod routes;

pub const ELASERVICE_LABEL: &str = "elafros.dev/elaservice";
pub const APP_MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

pub fn placeholder_service_name(es: &ElaService) -> String {
    format!("{}-service", es.name_any())
}

pub fn ingress_name(es: &ElaService) -> String {
    format!("{}-ingress", es.name_any())
}

pub fn route_rule_name(es: &ElaService) -> String {
    format!("{}-istio", es.name_any())
}

/// The host an ElaService is exposed under
pub fn domain(es: &ElaService, default_suffix: &str) -> String {
    let suffix = es
        .spec
        .domain_suffix
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(default_suffix);
    format!("{}.{suffix}", es.name_any())
}

pub fn resource_labels(instance: &str) -> Option<BTreeMap<String, String>> {
    Some(BTreeMap::from([
        (ELASERVICE_LABEL.into(), instance.into()),
        (APP_MANAGED_BY_LABEL.into(), crate::client::FIELD_MANAGER.into()),
    ]))
}

pub fn object_meta(oref: &OwnerReference, name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some(namespace.into()),
        labels: resource_labels(&oref.name),
        owner_references: Some(vec![oref.clone()]),
        ..Default::default()
    }
}
