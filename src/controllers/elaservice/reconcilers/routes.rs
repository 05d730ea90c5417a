use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use tracing::*;

use crate::client::ResourceClient;
use crate::resources::elafros::{ElaService, TargetRef, TrafficTarget};
use crate::resources::istio::{DestinationWeight, IstioService, RouteRule, RouteRuleSpec};
use crate::{Error, Result};

use super::{object_meta, placeholder_service_name, route_rule_name};

/// A single backend to route to: the Service of one Revision and its share of traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRoute {
    pub service: String,
    pub weight: i32,
}

/// Resolves every traffic target of the ElaService. A single unresolvable target fails
/// the whole set, as routing to a subset would send traffic to the wrong place.
pub async fn resolve_routes(
    client: &dyn ResourceClient,
    es: &ElaService,
    namespace: &str,
) -> Result<Vec<RevisionRoute>> {
    debug!("Figuring out routes for ElaService {}", es.name_any());

    let mut routes = Vec::with_capacity(es.spec.rollout.traffic.len());
    for (index, target) in es.spec.rollout.traffic.iter().enumerate() {
        let route = route_for_traffic_target(client, es, index, target, namespace)
            .await
            .inspect_err(|err| warn!("Failed to get a route for target {target:?}: {err}"))?;
        routes.push(route);
    }
    Ok(routes)
}

async fn route_for_traffic_target(
    client: &dyn ResourceClient,
    es: &ElaService,
    index: usize,
    target: &TrafficTarget,
    namespace: &str,
) -> Result<RevisionRoute> {
    let revision_name = match target.target_ref() {
        Some(TargetRef::RevisionTemplate(template)) => {
            let rt = client.get_revision_template(namespace, template).await?;
            rt.status
                .and_then(|s| s.latest)
                .filter(|latest| !latest.is_empty())
                .ok_or_else(|| Error::RevisionTemplateNotReady(template.to_string()))?
        }
        Some(TargetRef::Revision(revision)) => revision.to_string(),
        None => {
            return Err(Error::InvalidTrafficTarget {
                name: es.name_any(),
                index,
            })
        }
    };

    let revision = client.get_revision(namespace, &revision_name).await?;
    let service_name = revision
        .status
        .and_then(|s| s.service_name)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::RevisionNotReady(revision_name.clone()))?;

    Ok(RevisionRoute {
        service: format!("{service_name}.{namespace}"),
        weight: target.percent,
    })
}

pub fn route_rule_spec(es: &ElaService, routes: &[RevisionRoute]) -> RouteRuleSpec {
    RouteRuleSpec {
        destination: IstioService {
            name: placeholder_service_name(es),
        },
        route: routes
            .iter()
            .map(|route| DestinationWeight {
                destination: IstioService {
                    name: route.service.clone(),
                },
                weight: route.weight,
            })
            .collect(),
    }
}

/// Creates the RouteRule, or overwrites the spec of the existing one with the current routes.
///
/// Returns the resolved routes. If there are none, the RouteRule is left untouched.
pub async fn reconcile_route_rules(
    client: &dyn ResourceClient,
    es: &ElaService,
    namespace: &str,
    oref: &OwnerReference,
) -> Result<Vec<RevisionRoute>> {
    let routes = resolve_routes(client, es, namespace).await?;
    if routes.is_empty() {
        info!("No routes were found for ElaService {}", es.name_any());
        return Ok(routes);
    }
    for route in &routes {
        debug!("Adding a route to {} Weight: {}", route.service, route.weight);
    }

    let name = route_rule_name(es);
    let spec = route_rule_spec(es, &routes);

    match client.get_route_rule(namespace, &name).await? {
        None => {
            let route_rule = RouteRule {
                metadata: object_meta(oref, &name, namespace),
                spec,
            };
            client.create_route_rule(namespace, &route_rule).await?;
            info!("Created RouteRule {name} in namespace {namespace}");
        }
        Some(existing) if existing.spec == spec => {
            debug!("RouteRule {name} in namespace {namespace} is up to date");
        }
        Some(mut existing) => {
            // full replace: any edits made to the spec outside of this controller are lost
            existing.spec = spec;
            client.replace_route_rule(namespace, &existing).await?;
            info!("Updated RouteRule {name} in namespace {namespace}");
        }
    }

    Ok(routes)
}
