use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::*;

use crate::client::{is_already_exists, ResourceClient};
use crate::resources::elafros::ElaService;
use crate::Result;

use super::{object_meta, placeholder_service_name};

/// The placeholder Service selects nothing. It gives the ingress and the route rule
/// a destination to refer to before any Revision is routable.
pub fn placeholder_service(es: &ElaService, namespace: &str, oref: &OwnerReference) -> Service {
    Service {
        metadata: object_meta(oref, &placeholder_service_name(es), namespace),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("http".into()),
                port: 80,
                protocol: Some("TCP".into()),
                target_port: Some(IntOrString::Int(80)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Creates the placeholder Service; an existing one is left alone
pub async fn reconcile_placeholder_service(
    client: &dyn ResourceClient,
    es: &ElaService,
    namespace: &str,
    oref: &OwnerReference,
) -> Result<()> {
    let service = placeholder_service(es, namespace, oref);
    let name = placeholder_service_name(es);

    match client.create_service(namespace, &service).await {
        Ok(_) => {
            info!("Created Service {name} in namespace {namespace}");
            Ok(())
        }
        Err(err) if is_already_exists(&err) => {
            debug!("Service {name} in namespace {namespace} already exists");
            Ok(())
        }
        Err(err) => {
            warn!("Failed to create Service {name} in namespace {namespace}: {err}");
            Err(err.into())
        }
    }
}
