//! Mutating admission for pods.
//!
//! Newly created pods get the paused scheduler when their namespace is paused,
//! or when the namespace's `ResumeProfile` does not select them. Updates are never
//! patched: the scheduler of an existing pod is left to the reconcilers.

use crate::policy::{scheduler_name, PauseConfig};
use crate::profile::CompiledProfile;
use crate::store::ObjectStore;
use controller_core::{Error, Result};

use k8s_openapi::api::core::v1::Pod;
use kube::{
    core::{
        admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
        DynamicObject,
    },
    ResourceExt,
};
use tracing::{debug, error, info, warn};

/// Whether the policy of `namespace` keeps `pod` paused: the namespace is paused,
/// or its `ResumeProfile` does not select the pod.
///
/// Does at most one namespace and one profile lookup; a failed or empty lookup is an error.
pub async fn namespace_pauses(
    store: &dyn ObjectStore,
    config: &PauseConfig,
    namespace: &str,
    pod: &Pod,
) -> Result<bool> {
    let ns = store
        .get_namespace(namespace)
        .await?
        .ok_or_else(|| Error::NamespaceNotFound(namespace.to_string()))?;

    if config.namespace_suspended(&ns) {
        return Ok(true);
    }
    let Some(profile_name) = config.namespace_profile(&ns) else {
        return Ok(false);
    };
    let profile = store
        .get_profile(namespace, profile_name)
        .await?
        .ok_or_else(|| Error::ProfileNotFound {
            namespace: namespace.to_string(),
            name: profile_name.to_string(),
        })?;
    Ok(!CompiledProfile::compile(&profile).matches(pod.labels()))
}

/// Pause decision for a pod about to be created in `namespace`.
///
/// Returns the paused copy of `pod`, or `None` when it is admitted unchanged.
/// Pods already bound to a node keep their scheduler, which can no longer change.
pub async fn intercept(
    store: &dyn ObjectStore,
    config: &PauseConfig,
    namespace: &str,
    pod: &Pod,
) -> Result<Option<Pod>> {
    if config.has_paused_scheduler(pod) || is_bound(pod) {
        return Ok(None);
    }
    if !namespace_pauses(store, config, namespace, pod).await? {
        return Ok(None);
    }

    let previous = scheduler_name(pod).unwrap_or_default().to_string();
    let mut paused = pod.clone();
    paused
        .annotations_mut()
        .insert(config.markers.previous_scheduler.clone(), previous);
    paused.spec.get_or_insert_with(Default::default).scheduler_name = Some(config.scheduler_name.clone());
    Ok(Some(paused))
}

fn is_bound(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .is_some_and(|node| !node.is_empty())
}

/// Answer one admission request. Never fails: lookup errors become denials.
pub async fn mutate(store: &dyn ObjectStore, config: &PauseConfig, request: &AdmissionRequest<Pod>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);
    if request.operation != Operation::Create {
        debug!(uid = %request.uid, operation = ?request.operation, "Allowing pod unchanged");
        return response;
    }
    let Some(pod) = &request.object else {
        debug!(uid = %request.uid, "No pod in admission request, allowing unchanged");
        return response;
    };
    let Some(namespace) = request.namespace.clone().or_else(|| pod.namespace()) else {
        warn!(uid = %request.uid, "Admission request without namespace");
        return response.deny("pod has no namespace");
    };

    let paused = match intercept(store, config, &namespace, pod).await {
        Ok(Some(paused)) => paused,
        Ok(None) => return response,
        Err(err) => {
            warn!(uid = %request.uid, namespace = %namespace, error = %err, "Denying pod admission");
            return response.deny(err.to_string());
        }
    };

    let patch = match (serde_json::to_value(pod), serde_json::to_value(&paused)) {
        (Ok(original), Ok(paused)) => json_patch::diff(&original, &paused),
        (Err(err), _) | (_, Err(err)) => {
            error!(uid = %request.uid, error = %err, "Failed to serialize pod");
            return response.deny(format!("pod serialization error: {err}"));
        }
    };
    info!(
        uid = %request.uid,
        namespace = %namespace,
        pod = %pod.name_any(),
        "Admitting pod with the paused scheduler"
    );
    match response.with_patch(patch) {
        Ok(response) => response,
        Err(err) => {
            error!(uid = %request.uid, error = %err, "Failed to serialize patch");
            AdmissionResponse::from(request).deny(format!("patch serialization error: {err}"))
        }
    }
}

/// Unpack an `AdmissionReview` and answer it; an unparseable review is answered `invalid`.
pub async fn review(
    store: &dyn ObjectStore,
    config: &PauseConfig,
    review: AdmissionReview<Pod>,
) -> AdmissionReview<DynamicObject> {
    let request: AdmissionRequest<Pod> = match review.try_into() {
        Ok(request) => request,
        Err(err) => {
            error!(error = %err, "Failed to parse admission request");
            return AdmissionResponse::invalid(err.to_string()).into_review();
        }
    };
    mutate(store, config, &request).await.into_review()
}
