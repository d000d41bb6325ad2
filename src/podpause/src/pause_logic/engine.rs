use super::recreate::recreate_pod;
use crate::policy::{is_owned, scheduler_name, PauseConfig, PauseState};
use crate::profile::CompiledProfile;
use crate::store::ObjectStore;
use controller_core::Result;

use k8s_openapi::api::core::v1::{Pod, PodStatus};
use kube::ResourceExt;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Pause,
    Resume,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Pause => "pause",
            Action::Resume => "resume",
        }
    }
}

/// What a pause or resume did to the pod.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    /// Deleted; the owner creates the replacement
    Evicted,
    /// Replaced by a clone with the swapped scheduler
    Recreated,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Unchanged => "unchanged",
            Outcome::Evicted => "evicted",
            Outcome::Recreated => "recreated",
        }
    }
}

/// Copy of `pod` that can be created under the same name once the original is gone.
fn recreatable_copy(pod: &Pod) -> Pod {
    let mut copy = pod.clone();
    let meta = &mut copy.metadata;
    meta.resource_version = None;
    meta.uid = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.deletion_grace_period_seconds = None;
    meta.managed_fields = None;
    if let Some(spec) = copy.spec.as_mut() {
        spec.node_name = None;
    }
    copy.status = Some(PodStatus::default());
    copy
}

pub fn paused_clone(config: &PauseConfig, pod: &Pod) -> Pod {
    let previous = scheduler_name(pod).unwrap_or_default().to_string();
    let mut clone = recreatable_copy(pod);
    clone
        .annotations_mut()
        .insert(config.markers.previous_scheduler.clone(), previous);
    clone.spec.get_or_insert_with(Default::default).scheduler_name = Some(config.scheduler_name.clone());
    clone
}

pub fn resumed_clone(config: &PauseConfig, pod: &Pod, previous_scheduler: Option<String>) -> Pod {
    let mut clone = recreatable_copy(pod);
    clone.annotations_mut().remove(&config.markers.previous_scheduler);
    clone.spec.get_or_insert_with(Default::default).scheduler_name = previous_scheduler;
    clone
}

fn qualified_name(pod: &Pod) -> String {
    format!("{}/{}", pod.namespace().unwrap_or_default(), pod.name_any())
}

/// Delete an owned pod with its own grace period; a pod that is already gone counts as evicted.
async fn evict(store: &dyn ObjectStore, pod: &Pod) -> Result<()> {
    match store.delete_pod(pod, None).await {
        Err(err) if err.is_not_found() => {
            debug!("Pod {} was already deleted", qualified_name(pod));
            Ok(())
        }
        result => result,
    }
}

pub async fn pause(store: &dyn ObjectStore, config: &PauseConfig, pod: &Pod) -> Result<Outcome> {
    if config.has_paused_scheduler(pod) {
        debug!("Pod {} is already paused", qualified_name(pod));
        return Ok(Outcome::Unchanged);
    }

    if is_owned(pod) {
        evict(store, pod).await?;
        info!("Evicted owned pod {} so its owner recreates it paused", qualified_name(pod));
        return Ok(Outcome::Evicted);
    }

    let clone = paused_clone(config, pod);
    recreate_pod(store, pod, &clone, config.recreate_timeout).await?;
    info!("Paused pod {}", qualified_name(pod));
    Ok(Outcome::Recreated)
}

/// Resume `pod`, or pause it when a profile is given that does not select it.
pub async fn resume(
    store: &dyn ObjectStore,
    config: &PauseConfig,
    pod: &Pod,
    profile: Option<&CompiledProfile>,
) -> Result<Outcome> {
    if let Some(profile) = profile {
        if !profile.matches(pod.labels()) {
            debug!(
                "Pod {} is not selected by ResumeProfile {}, pausing it",
                qualified_name(pod),
                profile.name
            );
            return pause(store, config, pod).await;
        }
    }

    match config.pause_state(pod) {
        PauseState::Active => {
            debug!("Pod {} is not paused", qualified_name(pod));
            Ok(Outcome::Unchanged)
        }
        PauseState::PausedOwned => {
            evict(store, pod).await?;
            info!("Evicted paused owned pod {} so its owner recreates it", qualified_name(pod));
            Ok(Outcome::Evicted)
        }
        PauseState::PausedStandalone { previous_scheduler } => {
            let clone = resumed_clone(config, pod, previous_scheduler);
            recreate_pod(store, pod, &clone, config.recreate_timeout).await?;
            info!("Resumed pod {}", qualified_name(pod));
            Ok(Outcome::Recreated)
        }
    }
}
