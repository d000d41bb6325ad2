use crate::model::ResumeProfile;
use crate::namespaces::{converge_namespace, SweepReport};
use crate::pause_logic::Outcome;
use crate::pods::{converge_pod, PodReport};
use crate::policy::PauseConfig;
use crate::store::{KubeStore, ObjectStore};

use controller_core::{telemetry, Error, Metrics, Result};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        reflector::ObjectRef,
        watcher::Config,
    },
};
use serde::Serialize;
use std::sync::Arc;
use tokio::{
    sync::{RwLock, Semaphore},
    time::Duration,
};
use tracing::*;

/// Resync period of namespace sweeps
const NAMESPACE_RESYNC: Duration = Duration::from_secs(300);

// Context for our reconcilers
#[derive(Clone)]
pub struct Context {
    /// Object store the pause logic works against
    pub store: Arc<dyn ObjectStore>,
    /// Markers and reserved values
    pub config: Arc<PauseConfig>,
    /// Namespaces to act in, empty for all
    pub namespaces: Arc<Vec<String>>,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
    /// Bounds the reconciliations of this controller running at once
    pub workers: Arc<Semaphore>,
}

impl Context {
    fn in_scope(&self, namespace: &str) -> bool {
        self.namespaces.is_empty() || self.namespaces.iter().any(|ns| ns == namespace)
    }

    fn record_sweep(&self, report: &SweepReport) {
        let Some(action) = report.action else { return };
        for (_, outcome) in report.outcomes.iter().filter(|(_, o)| *o != Outcome::Unchanged) {
            self.metrics.transition(action.as_str(), outcome.as_str());
        }
        for _ in &report.failed {
            self.metrics.transition(action.as_str(), "failed");
        }
    }

    fn record_pod(&self, report: &PodReport) {
        if let (Some(action), Some(outcome)) = (report.action, report.outcome) {
            if outcome != Outcome::Unchanged {
                self.metrics.transition(action.as_str(), outcome.as_str());
            }
        }
        if report.overridden {
            self.metrics.transition("resume", "overridden");
        }
    }
}

#[instrument(skip(ns, ctx), fields(trace_id))]
async fn reconcile_namespace(ns: Arc<Namespace>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));
    let name = ns.name_any();
    if !ctx.in_scope(&name) {
        return Ok(Action::await_change());
    }

    let _permit = ctx.workers.acquire().await.map_err(|_| Error::WorkersClosed)?;
    let _timer = ctx.metrics.count_and_measure("namespaces");
    ctx.diagnostics.write().await.last_event = Utc::now();

    info!("Reconciling namespace \"{}\"", name);
    let report = converge_namespace(ctx.store.as_ref(), &ctx.config, &name).await?;
    ctx.record_sweep(&report);
    ctx.diagnostics.write().await.record_sweep(&name, &report);

    Ok(Action::requeue(NAMESPACE_RESYNC))
}

#[instrument(skip(pod, ctx), fields(trace_id))]
async fn reconcile_pod(pod: Arc<Pod>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));
    let namespace = pod
        .namespace()
        .ok_or_else(|| Error::InvalidParameters(format!("pod {} has no namespace", pod.name_any())))?;
    if !ctx.in_scope(&namespace) {
        return Ok(Action::await_change());
    }

    let _permit = ctx.workers.acquire().await.map_err(|_| Error::WorkersClosed)?;
    let _timer = ctx.metrics.count_and_measure("pods");
    ctx.diagnostics.write().await.last_event = Utc::now();

    debug!("Reconciling pod \"{}\" in {}", pod.name_any(), namespace);
    let report = converge_pod(ctx.store.as_ref(), &ctx.config, &namespace, &pod.name_any()).await?;
    ctx.record_pod(&report);

    Ok(Action::await_change())
}

fn error_policy<K: ResourceExt>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(&*obj, error);
    Action::requeue(Duration::from_secs(30))
}

/// Outcome of the latest sweep of a namespace
#[derive(Clone, Debug, Serialize)]
pub struct SweepSummary {
    pub namespace: String,
    pub action: Option<&'static str>,
    pub changed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub at: DateTime<Utc>,
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Debug, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    pub last_sweep: Option<SweepSummary>,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            last_sweep: None,
        }
    }
}
impl Diagnostics {
    fn record_sweep(&mut self, namespace: &str, report: &SweepReport) {
        self.last_sweep = Some(SweepSummary {
            namespace: namespace.to_string(),
            action: report.action.map(|action| action.as_str()),
            changed: report.changed(),
            skipped: report.skipped.len(),
            failed: report.failed.len(),
            at: Utc::now(),
        });
    }
}

/// State shared between the controllers and the web server
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the reconcilers
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
    /// Metrics registered in `registry`, shared by every controller
    metrics: Metrics,
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new() -> Result<Self> {
        let registry = prometheus::Registry::new();
        let metrics = Metrics::default().register(&registry)?;
        Ok(Self {
            diagnostics: Arc::default(),
            registry,
            metrics,
        })
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State; every context gets its own worker pool
    pub fn to_context(
        &self,
        store: Arc<dyn ObjectStore>,
        config: Arc<PauseConfig>,
        namespaces: Arc<Vec<String>>,
        concurrency: usize,
    ) -> Arc<Context> {
        Arc::new(Context {
            store,
            config,
            namespaces,
            diagnostics: self.diagnostics.clone(),
            metrics: self.metrics.clone(),
            workers: Arc::new(Semaphore::new(concurrency.max(1))),
        })
    }
}

/// Settings for [`run`]
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub config: PauseConfig,
    /// Namespaces to act in, empty for all
    pub namespaces: Vec<String>,
    /// Reconciliations running at once, per controller
    pub concurrency: usize,
}

/// Run the namespace and pod controllers until a shutdown signal arrives (given the crd is installed)
pub async fn run(state: State, client: Client, settings: ControllerSettings) -> Result<()> {
    let profiles = Api::<ResumeProfile>::all(client.clone());
    if let Err(e) = profiles.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        return Err(Error::KubeError(e));
    }

    let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(client.clone()));
    let config = Arc::new(settings.config);
    let namespaces = Arc::new(settings.namespaces);
    let namespace_ctx = state.to_context(
        store.clone(),
        config.clone(),
        namespaces.clone(),
        settings.concurrency,
    );
    let pod_ctx = state.to_context(store, config, namespaces.clone(), settings.concurrency);

    info!(
        "Starting controllers for {}",
        if namespaces.is_empty() {
            "all namespaces".to_string()
        } else {
            namespaces.join(", ")
        }
    );

    let namespace_controller = Controller::new(Api::<Namespace>::all(client.clone()), Config::default().any_semantic())
        .watches(profiles, Config::default(), |profile| {
            profile.namespace().map(|ns| ObjectRef::<Namespace>::new(&ns))
        })
        .shutdown_on_signal()
        .run(reconcile_namespace, error_policy::<Namespace>, namespace_ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()));

    let pod_apis: Vec<Api<Pod>> = if namespaces.is_empty() {
        vec![Api::all(client.clone())]
    } else {
        namespaces
            .iter()
            .map(|ns| Api::namespaced(client.clone(), ns))
            .collect()
    };
    let pod_controllers = futures::future::join_all(pod_apis.into_iter().map(|pods| {
        Controller::new(pods, Config::default().any_semantic())
            .shutdown_on_signal()
            .run(reconcile_pod, error_policy::<Pod>, pod_ctx.clone())
            .filter_map(|x| async move { std::result::Result::ok(x) })
            .for_each(|_| futures::future::ready(()))
    }));

    futures::join!(namespace_controller, pod_controllers);
    Ok(())
}
