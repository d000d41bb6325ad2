//! Object store seam between the pause logic and the Kubernetes API.

use crate::model::ResumeProfile;
use controller_core::{Error, Result};

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, Preconditions, WatchEvent, WatchParams},
    client::Client,
    ResourceExt,
};
use serde_json::json;
use tracing::debug;

/// Change notification for a watched pod.
#[derive(Clone, Debug)]
pub enum PodEvent {
    Added(Pod),
    Modified(Pod),
    Deleted(Pod),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    async fn get_profile(&self, namespace: &str, name: &str) -> Result<Option<ResumeProfile>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>>;

    async fn create_pod(&self, pod: &Pod) -> Result<()>;

    /// Delete `pod` if it still has its uid; `None` keeps the pod's own grace period.
    async fn delete_pod(&self, pod: &Pod, grace_period_seconds: Option<u32>) -> Result<()>;

    /// Patch the status subresource of `pod` with its difference to `merge_base`.
    async fn patch_pod_status(&self, pod: &Pod, merge_base: &Pod) -> Result<()>;

    /// Watch the pod named like `since`, starting at the resource version of `since`.
    async fn watch_pods(&self, namespace: &str, since: &Pod) -> Result<BoxStream<'static, Result<PodEvent>>>;
}

/// JSON patch turning the status of `merge_base` into the status of `pod`.
pub fn status_patch(pod: &Pod, merge_base: &Pod) -> Result<json_patch::Patch> {
    let base = json!({ "status": serde_json::to_value(&merge_base.status)? });
    let desired = json!({ "status": serde_json::to_value(&pod.status)? });
    Ok(json_patch::diff(&base, &desired))
}

/// [`ObjectStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn pod_namespace(pod: &Pod) -> Result<String> {
    pod.namespace()
        .ok_or_else(|| Error::InvalidParameters(format!("pod {} has no namespace", pod.name_any())))
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        namespaces.get_opt(name).await.map_err(Error::KubeError)
    }

    async fn get_profile(&self, namespace: &str, name: &str) -> Result<Option<ResumeProfile>> {
        let profiles: Api<ResumeProfile> = Api::namespaced(self.client.clone(), namespace);
        profiles.get_opt(name).await.map_err(Error::KubeError)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        self.pods(namespace).get_opt(name).await.map_err(Error::KubeError)
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default())
            .await
            .map_err(Error::KubeError)?;
        Ok(pods.items)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<()> {
        let namespace = pod_namespace(pod)?;
        self.pods(&namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(Error::KubeError)?;
        Ok(())
    }

    async fn delete_pod(&self, pod: &Pod, grace_period_seconds: Option<u32>) -> Result<()> {
        let namespace = pod_namespace(pod)?;
        let dp = DeleteParams {
            grace_period_seconds,
            preconditions: pod.uid().map(|uid| Preconditions {
                uid: Some(uid),
                resource_version: None,
            }),
            ..DeleteParams::default()
        };
        self.pods(&namespace)
            .delete(&pod.name_any(), &dp)
            .await
            .map_err(Error::KubeError)?;
        Ok(())
    }

    async fn patch_pod_status(&self, pod: &Pod, merge_base: &Pod) -> Result<()> {
        let namespace = pod_namespace(pod)?;
        let patch = status_patch(pod, merge_base)?;
        if patch.0.is_empty() {
            debug!("Status of pod {}/{} is unchanged", namespace, pod.name_any());
            return Ok(());
        }
        self.pods(&namespace)
            .patch_status(&pod.name_any(), &PatchParams::default(), &Patch::Json::<()>(patch))
            .await
            .map_err(Error::KubeError)?;
        Ok(())
    }

    async fn watch_pods(&self, namespace: &str, since: &Pod) -> Result<BoxStream<'static, Result<PodEvent>>> {
        let wp = WatchParams::default().fields(&format!("metadata.name={}", since.name_any()));
        let version = since.resource_version().unwrap_or_else(|| "0".to_string());
        let events = self
            .pods(namespace)
            .watch(&wp, &version)
            .await
            .map_err(Error::KubeError)?;
        let events = events
            .map_err(Error::KubeError)
            .try_filter_map(|event| async move {
                match event {
                    WatchEvent::Added(pod) => Ok(Some(PodEvent::Added(pod))),
                    WatchEvent::Modified(pod) => Ok(Some(PodEvent::Modified(pod))),
                    WatchEvent::Deleted(pod) => Ok(Some(PodEvent::Deleted(pod))),
                    WatchEvent::Bookmark(_) => Ok(None),
                    WatchEvent::Error(err) => Err(Error::KubeError(kube::Error::Api(err))),
                }
            });
        Ok(events.boxed())
    }
}
