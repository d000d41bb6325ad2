use crate::admission::namespace_pauses;
use crate::pause_logic::{pause, resume, Action, Outcome};
use crate::policy::{PauseConfig, PauseIntent, PauseState};
use crate::store::ObjectStore;
use controller_core::Result;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::debug;

/// Result of one pod reconciliation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodReport {
    /// Engine call requested by the pod's own annotation
    pub action: Option<Action>,
    pub outcome: Option<Outcome>,
    pub exempt: bool,
    /// Resume was requested, but the namespace would pause the recreated pod again
    pub overridden: bool,
    /// `status.phase` was patched to the suspended phase
    pub marked_suspended: bool,
}

pub async fn converge_pod(
    store: &dyn ObjectStore,
    config: &PauseConfig,
    namespace: &str,
    name: &str,
) -> Result<PodReport> {
    let Some(pod) = store.get_pod(namespace, name).await? else {
        debug!("Pod {}/{} not found", namespace, name);
        return Ok(PodReport::default());
    };
    if config.is_exempt(&pod) {
        debug!("Skipping pod {}/{} because it is exempt", namespace, name);
        return Ok(PodReport {
            exempt: true,
            ..PodReport::default()
        });
    }

    let action = match config.pod_intent(&pod) {
        PauseIntent::Suspend => Some(Action::Pause),
        PauseIntent::Resume => Some(Action::Resume),
        PauseIntent::Unset => None,
    };
    let overridden = action == Some(Action::Resume)
        && config.pause_state(&pod) != PauseState::Active
        && namespace_pauses(store, config, namespace, &pod).await?;
    let outcome = match action {
        Some(Action::Pause) => Some(pause(store, config, &pod).await?),
        Some(Action::Resume) if overridden => {
            debug!("Keeping pod {}/{} paused because its namespace pauses it", namespace, name);
            None
        }
        Some(Action::Resume) => Some(resume(store, config, &pod, None).await?),
        None => None,
    };
    let marked_suspended = mark_suspended(store, config, &pod).await?;

    Ok(PodReport {
        action,
        outcome,
        exempt: false,
        overridden,
        marked_suspended,
    })
}

/// Write the suspended phase onto a paused pod, merging against the latest revision.
async fn mark_suspended(store: &dyn ObjectStore, config: &PauseConfig, pod: &Pod) -> Result<bool> {
    if !config.has_paused_scheduler(pod) {
        return Ok(false);
    }
    let namespace = pod.namespace().unwrap_or_default();
    let Some(latest) = store.get_pod(&namespace, &pod.name_any()).await? else {
        return Ok(false);
    };
    if !config.has_paused_scheduler(&latest) || config.has_suspended_phase(&latest) {
        return Ok(false);
    }

    let mut desired = latest.clone();
    desired.status.get_or_insert_with(Default::default).phase = Some(config.suspended_phase.clone());
    store.patch_pod_status(&desired, &latest).await?;
    debug!("Marked pod {}/{} as {}", namespace, pod.name_any(), config.suspended_phase);
    Ok(true)
}
