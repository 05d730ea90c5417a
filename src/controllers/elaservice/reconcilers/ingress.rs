use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::*;

use crate::client::{is_already_exists, ResourceClient};
use crate::resources::elafros::ElaService;
use crate::Result;

use super::{ingress_name, object_meta, placeholder_service_name};

pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// An Ingress sending everything for the ElaService's domain to its placeholder Service,
/// where the route rule takes over
pub fn elaservice_ingress(
    es: &ElaService,
    namespace: &str,
    oref: &OwnerReference,
    domain: &str,
) -> Ingress {
    let mut metadata = object_meta(oref, &ingress_name(es), namespace);
    metadata.annotations = Some(BTreeMap::from([(
        INGRESS_CLASS_ANNOTATION.to_string(),
        "istio".to_string(),
    )]));

    Ingress {
        metadata,
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(domain.into()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".into()),
                        path_type: "Prefix".into(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: placeholder_service_name(es),
                                port: Some(ServiceBackendPort {
                                    number: Some(80),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Creates the Ingress if it does not exist yet. An existing Ingress is not updated.
pub async fn reconcile_ingress(
    client: &dyn ResourceClient,
    es: &ElaService,
    namespace: &str,
    oref: &OwnerReference,
    domain: &str,
) -> Result<()> {
    let name = ingress_name(es);

    if client.get_ingress(namespace, &name).await?.is_some() {
        debug!("Ingress {name} in namespace {namespace} already exists");
        return Ok(());
    }

    let ingress = elaservice_ingress(es, namespace, oref, domain);
    match client.create_ingress(namespace, &ingress).await {
        Ok(_) => {
            info!("Created Ingress {name} in namespace {namespace}");
            Ok(())
        }
        Err(err) if is_already_exists(&err) => Ok(()),
        Err(err) => {
            warn!("Failed to create Ingress {name} in namespace {namespace}: {err}");
            Err(err.into())
        }
    }
}
