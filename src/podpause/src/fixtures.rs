//! Helper methods only available for tests
use crate::controller::{Context, State};
use crate::model::{PodSelector, ResumeProfile, ResumeProfileSpec};
use crate::policy::PauseConfig;
use crate::store::{ObjectStore, PodEvent};
use controller_core::{Error, Result};

use async_trait::async_trait;
use futures::{
    channel::mpsc::{unbounded, UnboundedSender},
    stream::BoxStream,
    StreamExt,
};
use http::{Request, Response};
use hyper::{body::to_bytes, Body};
use k8s_openapi::api::core::v1::{Namespace, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{api::ObjectMeta, error::ErrorResponse, Client, ResourceExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// A scheduled, running pod without owner
pub fn pod(namespace: &str, name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            uid: Some(format!("{namespace}-{name}-0")),
            resource_version: Some("1".into()),
            labels: Some(labels(&[("app", name)])),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            scheduler_name: Some("default-scheduler".into()),
            node_name: Some("node-1".into()),
            ..PodSpec::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".into()),
            ..PodStatus::default()
        }),
    }
}

/// `pod` as sent for creation: not bound to a node, no server-side fields
pub fn unscheduled(mut pod: Pod) -> Pod {
    pod.metadata.uid = None;
    pod.metadata.resource_version = None;
    if let Some(spec) = pod.spec.as_mut() {
        spec.node_name = None;
    }
    pod.status = None;
    pod
}

pub fn with_labels(mut pod: Pod, pairs: &[(&str, &str)]) -> Pod {
    pod.labels_mut().extend(labels(pairs));
    pod
}

pub fn with_annotations(mut pod: Pod, pairs: &[(&str, &str)]) -> Pod {
    pod.annotations_mut().extend(labels(pairs));
    pod
}

pub fn with_scheduler(mut pod: Pod, scheduler: &str) -> Pod {
    if let Some(spec) = pod.spec.as_mut() {
        spec.scheduler_name = Some(scheduler.into());
    }
    pod
}

pub fn owned(mut pod: Pod) -> Pod {
    pod.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "apps/v1".into(),
        kind: "ReplicaSet".into(),
        name: format!("{}-rs", pod.name_any()),
        uid: "rs-uid".into(),
        controller: Some(true),
        ..OwnerReference::default()
    }]);
    pod
}

pub fn namespace(name: &str, annotations: &[(&str, &str)]) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.into()),
            annotations: Some(labels(annotations)),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

pub fn profile(namespace: &str, name: &str, selectors: Vec<PodSelector>) -> ResumeProfile {
    let mut profile = ResumeProfile::new(name, ResumeProfileSpec {
        pod_selector: selectors,
    });
    profile.metadata.namespace = Some(namespace.into());
    profile
}

pub fn match_labels(pairs: &[(&str, &str)]) -> PodSelector {
    PodSelector {
        match_labels: Some(labels(pairs)),
        match_expressions: None,
    }
}

pub fn api_error(code: u16, reason: &str) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: format!("fake store: {reason}"),
        reason: reason.into(),
        code,
    }))
}

/// Store mutations in the order the fake store applied them
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Create(String),
    Delete(String),
    /// The deleted pod actually left the store
    Removed(String),
    PatchStatus(String),
}

#[derive(Default)]
struct Inner {
    namespaces: BTreeMap<String, Namespace>,
    profiles: BTreeMap<(String, String), ResumeProfile>,
    pods: BTreeMap<(String, String), Pod>,
    watchers: Vec<UnboundedSender<Result<PodEvent>>>,
    log: Vec<Op>,
    failures: HashSet<(String, String)>,
    grace_periods: Vec<Option<u32>>,
    deletion_delay: Option<Duration>,
    termination_delay: Option<Duration>,
    silent_deletes: bool,
    stuck_deletes: bool,
    closed_watches: bool,
    version: u64,
}

impl Inner {
    fn check(&self, op: &str, name: &str) -> Result<()> {
        if self.failures.contains(&(op.to_string(), name.to_string())) {
            return Err(api_error(500, "InternalError"));
        }
        Ok(())
    }

    fn broadcast(&mut self, event: PodEvent) {
        self.watchers
            .retain(|watcher| watcher.unbounded_send(Ok(event.clone())).is_ok());
    }

    fn remove(&mut self, key: &(String, String)) {
        if let Some(pod) = self.pods.remove(key) {
            self.log.push(Op::Removed(key.1.clone()));
            if !self.silent_deletes {
                self.broadcast(PodEvent::Deleted(pod));
            }
        }
    }
}

fn key_of(pod: &Pod) -> (String, String) {
    (pod.namespace().unwrap_or_default(), pod.name_any())
}

/// In-memory [`ObjectStore`] with watch streams, delayed deletion and failure injection.
#[derive(Clone, Default)]
pub struct FakeStore {
    inner: Arc<Mutex<Inner>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("fake store lock")
    }

    pub fn with_namespace(self, ns: Namespace) -> Self {
        self.lock().namespaces.insert(ns.name_any(), ns);
        self
    }

    pub fn with_profile(self, profile: ResumeProfile) -> Self {
        let key = (profile.namespace().unwrap_or_default(), profile.name_any());
        self.lock().profiles.insert(key, profile);
        self
    }

    pub fn with_pod(self, pod: Pod) -> Self {
        self.lock().pods.insert(key_of(&pod), pod);
        self
    }

    /// Deleted pods linger for `delay` before they leave the store
    pub fn with_deletion_delay(self, delay: Duration) -> Self {
        self.lock().deletion_delay = Some(delay);
        self
    }

    /// Pods deleted with a non-zero grace period terminate for `delay` before they leave the store
    pub fn with_graceful_termination(self, delay: Duration) -> Self {
        self.lock().termination_delay = Some(delay);
        self
    }

    /// Deletions are accepted but pods never leave the store
    pub fn with_stuck_deletes(self) -> Self {
        self.lock().stuck_deletes = true;
        self
    }

    /// Deletions never reach watchers
    pub fn with_silent_deletes(self) -> Self {
        self.lock().silent_deletes = true;
        self
    }

    /// Watch streams end right away
    pub fn with_closed_watches(self) -> Self {
        self.lock().closed_watches = true;
        self
    }

    /// Make `op` (e.g. "delete", "create", "get_namespace") fail for the object called `name`
    pub fn failing(self, op: &str, name: &str) -> Self {
        self.lock().failures.insert((op.to_string(), name.to_string()));
        self
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.lock().pods.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.lock().pods.values().cloned().collect()
    }

    pub fn log(&self) -> Vec<Op> {
        self.lock().log.clone()
    }

    pub fn mutations(&self) -> usize {
        self.lock().log.len()
    }

    /// Grace period of every accepted delete
    pub fn grace_periods(&self) -> Vec<Option<u32>> {
        self.lock().grace_periods.clone()
    }

    /// Watch streams whose receiver is still alive
    pub fn open_watches(&self) -> usize {
        let mut inner = self.lock();
        inner.watchers.retain(|watcher| !watcher.is_closed());
        inner.watchers.len()
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let inner = self.lock();
        inner.check("get_namespace", name)?;
        Ok(inner.namespaces.get(name).cloned())
    }

    async fn get_profile(&self, namespace: &str, name: &str) -> Result<Option<ResumeProfile>> {
        let inner = self.lock();
        inner.check("get_profile", name)?;
        Ok(inner.profiles.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let inner = self.lock();
        inner.check("get_pod", name)?;
        Ok(inner.pods.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let inner = self.lock();
        inner.check("list_pods", namespace)?;
        Ok(inner
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<()> {
        let mut inner = self.lock();
        let key = key_of(pod);
        inner.check("create", &key.1)?;
        if inner.pods.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }
        assert!(pod.resource_version().is_none(), "created pods carry no resource version");
        inner.version += 1;
        let mut created = pod.clone();
        created.metadata.resource_version = Some(format!("{}", 100 + inner.version));
        created.metadata.uid = Some(format!("{}-{}-{}", key.0, key.1, inner.version));
        inner.log.push(Op::Create(key.1.clone()));
        inner.pods.insert(key, created.clone());
        inner.broadcast(PodEvent::Added(created));
        Ok(())
    }

    async fn delete_pod(&self, pod: &Pod, grace_period_seconds: Option<u32>) -> Result<()> {
        let key = key_of(pod);
        let delay = {
            let mut inner = self.lock();
            inner.check("delete", &key.1)?;
            if !inner.pods.contains_key(&key) {
                return Err(api_error(404, "NotFound"));
            }
            inner.log.push(Op::Delete(key.1.clone()));
            inner.grace_periods.push(grace_period_seconds);
            if inner.stuck_deletes {
                return Ok(());
            }
            let termination = inner.termination_delay.filter(|_| grace_period_seconds != Some(0));
            match termination.or(inner.deletion_delay) {
                Some(delay) => delay,
                None => {
                    inner.remove(&key);
                    return Ok(());
                }
            }
        };
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut inner) = inner.lock() {
                inner.remove(&key);
            }
        });
        Ok(())
    }

    async fn patch_pod_status(&self, pod: &Pod, _merge_base: &Pod) -> Result<()> {
        let mut inner = self.lock();
        let key = key_of(pod);
        inner.check("patch_status", &key.1)?;
        inner.version += 1;
        let version = format!("{}", 100 + inner.version);
        let Some(stored) = inner.pods.get_mut(&key) else {
            return Err(api_error(404, "NotFound"));
        };
        stored.status = pod.status.clone();
        stored.metadata.resource_version = Some(version);
        let modified = stored.clone();
        inner.log.push(Op::PatchStatus(key.1));
        inner.broadcast(PodEvent::Modified(modified));
        Ok(())
    }

    async fn watch_pods(&self, _namespace: &str, since: &Pod) -> Result<BoxStream<'static, Result<PodEvent>>> {
        let mut inner = self.lock();
        inner.check("watch", &since.name_any())?;
        if inner.closed_watches {
            return Ok(futures::stream::empty().boxed());
        }
        let (sender, receiver) = unbounded();
        inner.watchers.push(sender);
        Ok(receiver.boxed())
    }
}

impl Context {
    /// Context over an in-memory store; `namespaces` is the allow-list
    pub fn test(store: FakeStore, namespaces: &[&str]) -> Arc<Self> {
        let state = State::new().expect("metrics register on a fresh registry");
        state.to_context(
            Arc::new(store),
            Arc::new(PauseConfig::default()),
            Arc::new(namespaces.iter().map(|ns| ns.to_string()).collect()),
            2,
        )
    }
}

type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

/// Verifies the requests a `kube::Client` sends against scripted scenarios
pub struct ApiServerVerifier(ApiServerHandle);

/// Scenarios we test for in ApiServerVerifier
pub enum Scenario {
    /// GET on the pod answered with 404
    PodNotFound(String, String),
    /// JSON patch on the status subresource of the pod, answered with the pod
    StatusPatch(Pod),
    /// DELETE of the pod with the expected grace period, answered with the pod
    DeletePod(Pod, Option<u32>),
    /// The client must not talk to the api server at all
    RadioSilence,
}

pub async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario succeeded")
}

impl ApiServerVerifier {
    pub fn new() -> (Client, Self) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");
        (client, ApiServerVerifier(handle))
    }

    /// Tests only get to run specific scenarios that has matching handlers
    ///
    /// NB: If the controller is making more calls than we are handling in the scenario,
    /// you then typically see a `KubeError(Service(Closed(())))` from the reconciler.
    pub fn run(self, scenario: Scenario) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            match scenario {
                Scenario::PodNotFound(namespace, name) => self.handle_pod_not_found(&namespace, &name).await,
                Scenario::StatusPatch(pod) => self.handle_status_patch(pod).await,
                Scenario::DeletePod(pod, grace) => self.handle_delete_pod(pod, grace).await,
                Scenario::RadioSilence => Ok(self),
            }
            .expect("scenario completed without errors");
        })
    }

    async fn handle_pod_not_found(mut self, namespace: &str, name: &str) -> Result<Self> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        assert_eq!(request.uri().path(), format!("/api/v1/namespaces/{namespace}/pods/{name}"));
        let status = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": format!("pods \"{name}\" not found"),
            "reason": "NotFound",
            "details": { "name": name, "kind": "pods" },
            "code": 404
        });
        let body = serde_json::to_vec(&status)?;
        send.send_response(
            Response::builder()
                .status(404)
                .body(Body::from(body))
                .expect("valid response"),
        );
        Ok(self)
    }

    async fn handle_delete_pod(mut self, pod: Pod, grace: Option<u32>) -> Result<Self> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::DELETE);
        assert_eq!(
            request.uri().path(),
            format!(
                "/api/v1/namespaces/{}/pods/{}",
                pod.namespace().unwrap_or_default(),
                pod.name_any()
            )
        );
        let req_body = to_bytes(request.into_body()).await.expect("delete body");
        let options: serde_json::Value = serde_json::from_slice(&req_body).expect("delete options are json");
        assert_eq!(options["gracePeriodSeconds"].as_u64(), grace.map(u64::from));
        assert_eq!(options["preconditions"]["uid"].as_str(), pod.uid().as_deref());
        let response = serde_json::to_vec(&pod)?;
        send.send_response(Response::builder().body(Body::from(response)).expect("valid response"));
        Ok(self)
    }

    async fn handle_status_patch(mut self, pod: Pod) -> Result<Self> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::PATCH);
        assert_eq!(
            request.uri().path(),
            format!(
                "/api/v1/namespaces/{}/pods/{}/status",
                pod.namespace().unwrap_or_default(),
                pod.name_any()
            )
        );
        assert_eq!(
            request.headers().get("Content-Type").map(|value| value.as_bytes()),
            Some("application/json-patch+json".as_bytes())
        );
        let req_body = to_bytes(request.into_body()).await.expect("patch body");
        let operations: serde_json::Value = serde_json::from_slice(&req_body).expect("patch is json");
        let operations = operations.as_array().expect("json patch is a list");
        assert!(!operations.is_empty());
        let response = serde_json::to_vec(&pod)?;
        send.send_response(Response::builder().body(Body::from(response)).expect("valid response"));
        Ok(self)
    }
}
