use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures::Stream;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::runtime::events::EventType;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Resource, ResourceExt};
use tokio::sync::RwLock;
use tracing::*;

use crate::client::{KubeResourceClient, ResourceClient};
use crate::controllers::{Diagnostics, State};
use crate::events::{
    EventRecorder, KubeEventRecorder, FAILED_SYNC, MESSAGE_RESOURCE_SYNCED, SUCCESS_SYNCED,
};
use crate::metrics::Metrics;
use crate::queue::{split_meta_namespace_key, WorkQueue};
use crate::resources::elafros::{ElaService, ElaServiceCondition, ElaServiceStatus};
use crate::{telemetry, watch, workers, Error, Result};

use super::reconcilers;
use super::reconcilers::routes::RevisionRoute;

// Context for our sync handler
pub struct Context {
    /// API access
    pub client: Arc<dyn ResourceClient>,
    /// Event recorder
    pub recorder: Arc<dyn EventRecorder>,
    /// Domain suffix for ElaServices that don't set their own
    pub domain_suffix: String,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
}

impl Context {
    pub fn new(
        client: Arc<dyn ResourceClient>,
        recorder: Arc<dyn EventRecorder>,
        metrics: Metrics,
        state: &State,
    ) -> Arc<Context> {
        Arc::new(Context {
            client,
            recorder,
            domain_suffix: state.domain_suffix.clone(),
            diagnostics: state.diagnostics.clone(),
            metrics,
        })
    }
}

/// Converges the dependent objects of the ElaService identified by `key` (`namespace/name`)
/// toward its spec.
///
/// Keys that can never be valid, and ElaServices that no longer exist, are not errors.
/// Any other failure is returned so that the key is retried with backoff.
#[instrument(skip(ctx), fields(trace_id))]
pub async fn sync_handler(key: &str, ctx: Arc<Context>) -> Result<()> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }

    let (namespace, name) = match split_meta_namespace_key(key) {
        Ok(parts) => parts,
        Err(err) => {
            error!("Dropping key: {err}");
            return Ok(());
        }
    };

    let Some(es) = ctx.client.get_elaservice(namespace, name).await? else {
        info!("ElaService '{key}' in work queue no longer exists");
        return Ok(());
    };

    let _timer = ctx.metrics.sync_started();
    ctx.diagnostics.write().await.last_event = Utc::now();

    info!("Reconciling ElaService {name} in namespace {namespace}");
    let domain = reconcilers::domain(&es, &ctx.domain_suffix);

    let result = match reconcile(&es, namespace, &domain, &ctx).await {
        Ok(routes) => update_status(&es, namespace, &domain, &ctx, Ok(routes.as_slice())).await,
        Err(err) => {
            if let Err(status_err) =
                update_status(&es, namespace, &domain, &ctx, Err(&err)).await
            {
                warn!("Failed to update status of ElaService {name}: {status_err}");
            }
            Err(err)
        }
    };

    match result {
        Ok(()) => {
            ctx.recorder
                .record(
                    &es,
                    EventType::Normal,
                    SUCCESS_SYNCED,
                    MESSAGE_RESOURCE_SYNCED.into(),
                )
                .await;
            Ok(())
        }
        Err(err) => {
            warn!("Sync of ElaService {name} in namespace {namespace} failed: {err}");
            ctx.metrics.sync_failed(&es, &err);
            ctx.recorder
                .record(&es, EventType::Warning, FAILED_SYNC, err.to_string())
                .await;
            Err(err)
        }
    }
}

/// Applies the three dependent objects in order, stopping at the first failure.
/// Nothing already applied is rolled back; the next attempt picks up where this one stopped.
async fn reconcile(
    es: &ElaService,
    namespace: &str,
    domain: &str,
    ctx: &Context,
) -> Result<Vec<RevisionRoute>> {
    let oref = es
        .controller_owner_ref(&())
        .ok_or_else(|| Error::MissingUid(es.name_any()))?;
    let client = ctx.client.as_ref();

    debug!("Creating/Updating placeholder k8s services");
    reconcilers::placeholder::reconcile_placeholder_service(client, es, namespace, &oref).await?;

    debug!("Creating or updating ingress rule");
    reconcilers::ingress::reconcile_ingress(client, es, namespace, &oref, domain).await?;

    debug!("Creating istio route rules");
    reconcilers::routes::reconcile_route_rules(client, es, namespace, &oref).await
}

fn ready_condition(
    existing: Option<&ElaServiceStatus>,
    result: Result<&[RevisionRoute], &Error>,
) -> ElaServiceCondition {
    let (status, reason, message) = match result {
        Ok(routes) if routes.is_empty() => (
            "True",
            SUCCESS_SYNCED,
            "ElaService synced, no traffic targets to route to".to_string(),
        ),
        Ok(_) => ("True", SUCCESS_SYNCED, MESSAGE_RESOURCE_SYNCED.to_string()),
        Err(err) => ("False", FAILED_SYNC, err.to_string()),
    };

    let existing_ready = existing
        .and_then(|s| s.conditions.as_ref())
        .and_then(|c| c.iter().find(|cond| cond.r#type == "Ready"));

    let last_transition_time = match existing_ready {
        Some(ready) if ready.status == status => ready
            .last_transition_time
            .clone()
            .unwrap_or_else(|| Time(Utc::now())),
        _ => Time(Utc::now()),
    };

    ElaServiceCondition {
        last_transition_time: Some(last_transition_time),
        message: Some(message),
        reason: Some(reason.into()),
        status: status.into(),
        r#type: "Ready".into(),
    }
}

async fn update_status(
    es: &ElaService,
    namespace: &str,
    domain: &str,
    ctx: &Context,
    result: Result<&[RevisionRoute], &Error>,
) -> Result<()> {
    let new_status = ElaServiceStatus {
        conditions: Some(vec![ready_condition(es.status.as_ref(), result)]),
        domain: Some(domain.into()),
        observed_generation: es.metadata.generation,
    };

    if es.status.as_ref() == Some(&new_status) {
        return Ok(());
    }

    let name = es.name_any();
    debug!("Updating status of ElaService {name} in namespace {namespace}");
    ctx.client
        .patch_elaservice_status(namespace, &name, &new_status)
        .await?;
    Ok(())
}

/// Drives ElaService keys from a watch through a work queue to a pool of workers
pub struct ElaServiceController {
    ctx: Arc<Context>,
    queue: WorkQueue<String>,
}

impl ElaServiceController {
    pub fn new(ctx: Arc<Context>, queue: WorkQueue<String>) -> Self {
        Self { ctx, queue }
    }

    /// Runs until `stop` completes.
    ///
    /// `notifier` yields every created or updated ElaService; `cache_synced` resolves once
    /// the cache behind [`ResourceClient::get_elaservice`] holds a full listing, or to false
    /// if it never will. On stop, the watch is dropped, the queue is shut down and the
    /// workers finish what is left in the queue before this returns.
    pub async fn run<S, E, R, F>(
        self,
        notifier: S,
        cache_synced: R,
        workers: usize,
        stop: F,
    ) -> Result<()>
    where
        S: Stream<Item = Result<ElaService, E>> + Send + 'static,
        E: Display + Send + 'static,
        R: Future<Output = bool>,
        F: Future<Output = ()>,
    {
        info!("Starting ElaService controller");
        let watch = tokio::spawn(watch::enqueue_all(notifier, self.queue.clone()));
        tokio::pin!(stop);

        info!("Waiting for informer caches to sync");
        let synced = tokio::select! {
            synced = cache_synced => synced,
            _ = &mut stop => {
                watch.abort();
                self.queue.shut_down();
                return Ok(());
            }
        };
        if !synced {
            watch.abort();
            self.queue.shut_down();
            return Err(Error::CacheSyncFailed);
        }

        info!("Starting {workers} workers");
        let ctx = self.ctx.clone();
        let pool = tokio::spawn(workers::run(
            self.queue.clone(),
            workers,
            move |key: String| sync_handler_owned(key, ctx.clone()),
        ));

        info!("Started workers");
        stop.await;
        info!("Shutting down workers");

        watch.abort();
        self.queue.shut_down();
        if let Err(err) = pool.await {
            error!("Worker pool failed: {err}");
        }
        Ok(())
    }
}

async fn sync_handler_owned(key: String, ctx: Arc<Context>) -> Result<()> {
    sync_handler(&key, ctx).await
}

/// Run the ElaService controller against the cluster until a termination signal arrives
pub async fn run(client: Client, metrics: Metrics, state: State) -> Result<()> {
    let elaservices: Api<ElaService> = Api::all(client.clone());

    if let Err(e) = elaservices.list(&ListParams::default().limit(1)).await {
        error!("ElaService is not queryable; {e:?}. Is the CRD installed?");
        return Err(e.into());
    }

    let (store, writer) = reflector::store();
    let notifier = reflector(writer, watcher(elaservices, watcher::Config::default()))
        .applied_objects()
        .default_backoff()
        .predicate_filter(generation_predicate);

    let ctx = Context::new(
        Arc::new(KubeResourceClient::new(client.clone(), store.clone())),
        Arc::new(KubeEventRecorder::new(client)),
        metrics,
        &state,
    );
    let queue = WorkQueue::new(state.backoff);

    ElaServiceController::new(ctx, queue)
        .run(
            notifier,
            async move { store.wait_until_ready().await.is_ok() },
            state.workers,
            shutdown_signal(),
        )
        .await
}

/// Generation-based predicate to filter out status-only changes
/// Only triggers reconciliation when metadata.generation changes (spec changes)
fn generation_predicate<K: Resource>(obj: &K) -> Option<u64> {
    obj.meta().generation.map(|g| g as u64)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {err}");
            futures::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                futures::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::time::Duration;

    use futures::{stream, StreamExt};

    use super::*;
    use crate::client::mock::MockClient;
    use crate::events::mock::MockRecorder;
    use crate::queue::Backoff;
    use crate::resources::elafros::{ElaServiceSpec, RolloutSpec, TrafficTarget};

    struct Fixture {
        client: Arc<MockClient>,
        recorder: Arc<MockRecorder>,
        ctx: Arc<Context>,
    }

    fn fixture() -> Fixture {
        let client = Arc::new(MockClient::default());
        let recorder = Arc::new(MockRecorder::default());
        let state = State::default();
        let ctx = Context::new(
            client.clone(),
            recorder.clone(),
            Metrics::new(&prometheus::Registry::new()).unwrap(),
            &state,
        );
        Fixture {
            client,
            recorder,
            ctx,
        }
    }

    fn elaservice(traffic: Vec<(&str, i32)>) -> ElaService {
        let mut es = ElaService::new(
            "svc-a",
            ElaServiceSpec {
                rollout: RolloutSpec {
                    traffic: traffic
                        .into_iter()
                        .map(|(revision, percent)| TrafficTarget {
                            revision: Some(revision.into()),
                            revision_template: None,
                            percent,
                        })
                        .collect(),
                },
                ..Default::default()
            },
        );
        es.metadata.namespace = Some("default".into());
        es.metadata.uid = Some("uid-1".into());
        es.metadata.generation = Some(1);
        es
    }

    #[tokio::test]
    async fn syncs_split_traffic() {
        let f = fixture();
        f.client.add_revision("default", "rev-1", Some("rev-1-svc"));
        f.client.add_revision("default", "rev-2", Some("rev-2-svc"));
        f.client
            .add_elaservice(elaservice(vec![("rev-1", 90), ("rev-2", 10)]));

        sync_handler("default/svc-a", f.ctx.clone()).await.unwrap();

        let rule = f.client.route_rule("default", "svc-a-istio").unwrap();
        let routes: Vec<_> = rule
            .spec
            .route
            .iter()
            .map(|r| (r.destination.name.as_str(), r.weight))
            .collect();
        assert_eq!(
            routes,
            vec![("rev-1-svc.default", 90), ("rev-2-svc.default", 10)]
        );

        f.client.with(|s| {
            assert!(s
                .services
                .contains_key(&("default".to_string(), "svc-a-service".to_string())));
            assert!(s
                .ingresses
                .contains_key(&("default".to_string(), "svc-a-ingress".to_string())));
            let status = s.statuses.last().unwrap();
            assert_eq!(status.domain.as_deref(), Some("svc-a.demo-domain.com"));
            assert_eq!(status.observed_generation, Some(1));
            assert_eq!(status.conditions.as_ref().unwrap()[0].status, "True");
        });

        let events = f.recorder.events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].warning);
        assert_eq!(events[0].reason, SUCCESS_SYNCED);
        assert_eq!(events[0].message, MESSAGE_RESOURCE_SYNCED);
    }

    #[tokio::test]
    async fn resync_of_converged_resource_writes_nothing() {
        let f = fixture();
        f.client.add_revision("default", "rev-1", Some("rev-1-svc"));
        f.client.add_elaservice(elaservice(vec![("rev-1", 100)]));

        sync_handler("default/svc-a", f.ctx.clone()).await.unwrap();
        let writes = f.client.writes();
        let statuses = f.client.state.lock().unwrap().statuses.len();
        assert_eq!(writes, 3);

        sync_handler("default/svc-a", f.ctx.clone()).await.unwrap();
        sync_handler("default/svc-a", f.ctx.clone()).await.unwrap();
        assert_eq!(f.client.writes(), writes);
        assert_eq!(f.client.state.lock().unwrap().statuses.len(), statuses);
    }

    #[tokio::test]
    async fn deleted_resource_is_success() {
        let f = fixture();
        sync_handler("default/gone", f.ctx.clone()).await.unwrap();
        assert_eq!(f.client.writes(), 0);
        assert!(f.recorder.events().is_empty());
    }

    #[tokio::test]
    async fn malformed_key_is_dropped() {
        let f = fixture();
        sync_handler("not-a-key", f.ctx.clone()).await.unwrap();
        sync_handler("a/b/c", f.ctx.clone()).await.unwrap();
        assert!(f.recorder.events().is_empty());
    }

    #[tokio::test]
    async fn unresolvable_route_fails_sync_but_keeps_earlier_steps() {
        let f = fixture();
        f.client.add_elaservice(elaservice(vec![("missing", 100)]));

        let err = sync_handler("default/svc-a", f.ctx.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KubeError(_)));

        // the placeholder and the ingress stay in place
        assert_eq!(f.client.writes(), 2);
        assert!(f.client.route_rule("default", "svc-a-istio").is_none());

        let events = f.recorder.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].warning);
        assert_eq!(events[0].reason, FAILED_SYNC);

        f.client.with(|s| {
            let ready = &s.statuses.last().unwrap().conditions.as_ref().unwrap()[0];
            assert_eq!(ready.status, "False");
            assert_eq!(ready.reason.as_deref(), Some(FAILED_SYNC));
        });
    }

    #[tokio::test]
    async fn placeholder_failure_aborts_later_steps() {
        let f = fixture();
        f.client.add_revision("default", "rev-1", Some("rev-1-svc"));
        f.client.add_elaservice(elaservice(vec![("rev-1", 100)]));
        f.client.fail("create_service", 503, "ServiceUnavailable");

        assert!(sync_handler("default/svc-a", f.ctx.clone()).await.is_err());
        assert_eq!(f.client.writes(), 0);
    }

    #[tokio::test]
    async fn recovers_once_revision_becomes_ready() {
        let f = fixture();
        f.client.add_revision("default", "rev-1", None);
        f.client.add_elaservice(elaservice(vec![("rev-1", 100)]));

        assert!(matches!(
            sync_handler("default/svc-a", f.ctx.clone()).await,
            Err(Error::RevisionNotReady(_))
        ));

        f.client.add_revision("default", "rev-1", Some("rev-1-svc"));
        sync_handler("default/svc-a", f.ctx.clone()).await.unwrap();

        assert!(f.client.route_rule("default", "svc-a-istio").is_some());
        f.client.with(|s| {
            let ready = &s.statuses.last().unwrap().conditions.as_ref().unwrap()[0];
            assert_eq!(ready.status, "True");
        });
    }

    #[tokio::test]
    async fn failed_status_write_is_reported_as_failed_sync() {
        let f = fixture();
        f.client.add_revision("default", "rev-1", Some("rev-1-svc"));
        f.client.add_elaservice(elaservice(vec![("rev-1", 100)]));
        f.client
            .fail("patch_elaservice_status", 503, "ServiceUnavailable");

        let err = sync_handler("default/svc-a", f.ctx.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KubeError(_)));

        let events = f.recorder.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].warning);
        assert_eq!(events[0].reason, FAILED_SYNC);
        assert_eq!(
            f.ctx
                .metrics
                .sync_failures
                .with_label_values(&["default", "svc-a", "KubeError"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn missing_revision_template_fails_sync() {
        let f = fixture();
        f.client.add_revision("default", "rev-1", Some("rev-1-svc"));
        let mut es = elaservice(vec![("rev-1", 50)]);
        es.spec.rollout.traffic.push(TrafficTarget {
            revision: None,
            revision_template: Some("missing-template".into()),
            percent: 50,
        });
        f.client.add_elaservice(es);

        assert!(sync_handler("default/svc-a", f.ctx.clone()).await.is_err());
        assert!(f.client.route_rule("default", "svc-a-istio").is_none());

        let events = f.recorder.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].warning);
        assert_eq!(events[0].reason, FAILED_SYNC);
    }

    #[test]
    fn transition_time_kept_while_status_unchanged() {
        let earlier = Time(Utc::now() - chrono::Duration::hours(1));
        let existing = ElaServiceStatus {
            conditions: Some(vec![ElaServiceCondition {
                last_transition_time: Some(earlier.clone()),
                status: "True".into(),
                r#type: "Ready".into(),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let same = ready_condition(Some(&existing), Ok(&[][..]));
        assert_eq!(same.last_transition_time, Some(earlier.clone()));

        let err = Error::RevisionNotReady("rev-1".into());
        let flipped = ready_condition(Some(&existing), Err(&err));
        assert_eq!(flipped.status, "False");
        assert_ne!(flipped.last_transition_time, Some(earlier));
    }

    #[tokio::test]
    async fn run_processes_watched_resources_until_stopped() {
        let f = fixture();
        f.client.add_revision("default", "rev-1", Some("rev-1-svc"));
        let es = elaservice(vec![("rev-1", 100)]);
        f.client.add_elaservice(es.clone());

        let notifier = stream::iter(vec![Ok::<_, Infallible>(es)]).chain(stream::pending());
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let controller =
            ElaServiceController::new(f.ctx.clone(), WorkQueue::new(Backoff::default()));

        let handle = tokio::spawn(controller.run(notifier, async { true }, 2, async move {
            let _ = stop_rx.await;
        }));

        let mut waited = 0;
        while f.client.route_rule("default", "svc-a-istio").is_none() && waited < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        assert!(f.client.route_rule("default", "svc-a-istio").is_some());

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn run_fails_if_cache_never_syncs() {
        let f = fixture();
        let controller =
            ElaServiceController::new(f.ctx.clone(), WorkQueue::new(Backoff::default()));

        let result = controller
            .run(
                stream::pending::<Result<ElaService, Infallible>>(),
                async { false },
                1,
                futures::future::pending(),
            )
            .await;
        assert!(matches!(result, Err(Error::CacheSyncFailed)));
    }
}
