//! Access to the API objects the controller reads and writes.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Client, Resource};
use serde_json::json;

use crate::resources::elafros::{ElaService, ElaServiceStatus, Revision, RevisionTemplate};
use crate::resources::istio::RouteRule;

pub const FIELD_MANAGER: &str = "elaservice-controller";

/// The API operations the ElaService controller needs, one group per resource kind.
///
/// Getters for dependent objects return `Ok(None)` when the object does not exist; any
/// other failure is returned as-is so the caller can decide whether it is fatal.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Reads an ElaService from the local cache
    async fn get_elaservice(
        &self,
        namespace: &str,
        name: &str,
    ) -> kube::Result<Option<Arc<ElaService>>>;

    async fn patch_elaservice_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ElaServiceStatus,
    ) -> kube::Result<()>;

    async fn get_revision_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> kube::Result<RevisionTemplate>;

    async fn get_revision(&self, namespace: &str, name: &str) -> kube::Result<Revision>;

    async fn create_service(&self, namespace: &str, service: &Service) -> kube::Result<Service>;

    async fn get_ingress(&self, namespace: &str, name: &str) -> kube::Result<Option<Ingress>>;

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> kube::Result<Ingress>;

    async fn get_route_rule(&self, namespace: &str, name: &str)
        -> kube::Result<Option<RouteRule>>;

    async fn create_route_rule(
        &self,
        namespace: &str,
        route_rule: &RouteRule,
    ) -> kube::Result<RouteRule>;

    /// Replaces the whole object; `route_rule` must carry the resourceVersion it was read at
    async fn replace_route_rule(
        &self,
        namespace: &str,
        route_rule: &RouteRule,
    ) -> kube::Result<RouteRule>;
}

/// True if the API server answered 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(kube::error::ErrorResponse { code: 404, .. }))
}

/// True if a create failed because the object is already there
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists")
}

/// [`ResourceClient`] backed by the API server, reading ElaServices through a reflector store
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
    elaservices: Store<ElaService>,
}

impl KubeResourceClient {
    pub fn new(client: Client, elaservices: Store<ElaService>) -> Self {
        Self {
            client,
            elaservices,
        }
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get_elaservice(
        &self,
        namespace: &str,
        name: &str,
    ) -> kube::Result<Option<Arc<ElaService>>> {
        Ok(self
            .elaservices
            .get(&ObjectRef::new(name).within(namespace)))
    }

    async fn patch_elaservice_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ElaServiceStatus,
    ) -> kube::Result<()> {
        let api: Api<ElaService> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({
            "apiVersion": ElaService::api_version(&()),
            "kind": ElaService::kind(&()),
            "status": status,
        });
        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(patch),
        )
        .await?;
        Ok(())
    }

    async fn get_revision_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> kube::Result<RevisionTemplate> {
        Api::<RevisionTemplate>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
    }

    async fn get_revision(&self, namespace: &str, name: &str) -> kube::Result<Revision> {
        Api::<Revision>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> kube::Result<Service> {
        Api::<Service>::namespaced(self.client.clone(), namespace)
            .create(&PostParams::default(), service)
            .await
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> kube::Result<Option<Ingress>> {
        Api::<Ingress>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
    }

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> kube::Result<Ingress> {
        Api::<Ingress>::namespaced(self.client.clone(), namespace)
            .create(&PostParams::default(), ingress)
            .await
    }

    async fn get_route_rule(
        &self,
        namespace: &str,
        name: &str,
    ) -> kube::Result<Option<RouteRule>> {
        Api::<RouteRule>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
    }

    async fn create_route_rule(
        &self,
        namespace: &str,
        route_rule: &RouteRule,
    ) -> kube::Result<RouteRule> {
        Api::<RouteRule>::namespaced(self.client.clone(), namespace)
            .create(&PostParams::default(), route_rule)
            .await
    }

    async fn replace_route_rule(
        &self,
        namespace: &str,
        route_rule: &RouteRule,
    ) -> kube::Result<RouteRule> {
        let name = route_rule.meta().name.clone().unwrap_or_default();
        Api::<RouteRule>::namespaced(self.client.clone(), namespace)
            .replace(&name, &PostParams::default(), route_rule)
            .await
    }
}
