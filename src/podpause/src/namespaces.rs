use crate::pause_logic::{pause, resume, Action, Outcome};
use crate::policy::PauseConfig;
use crate::profile::CompiledProfile;
use crate::store::ObjectStore;
use controller_core::{Error, Result};

use kube::ResourceExt;
use tracing::{debug, info, warn};

/// Result of one namespace sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// `None` when the namespace does not exist
    pub action: Option<Action>,
    pub outcomes: Vec<(String, Outcome)>,
    /// Pods carrying the exemption marker
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

impl SweepReport {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }

    /// Pods that were deleted or recreated
    pub fn changed(&self) -> usize {
        self.outcomes.len() - self.count(Outcome::Unchanged)
    }
}

/// Bring every pod of namespace `name` in line with its pause annotation and `ResumeProfile`.
///
/// Lookup failures are returned. Failures on single pods are logged and recorded in the
/// report; the sweep continues with the next pod.
pub async fn converge_namespace(store: &dyn ObjectStore, config: &PauseConfig, name: &str) -> Result<SweepReport> {
    let Some(ns) = store.get_namespace(name).await? else {
        debug!("Namespace {} not found", name);
        return Ok(SweepReport::default());
    };

    let profile = match config.namespace_profile(&ns) {
        Some(profile_name) => {
            let profile = store
                .get_profile(name, profile_name)
                .await?
                .ok_or_else(|| Error::ProfileNotFound {
                    namespace: name.to_string(),
                    name: profile_name.to_string(),
                })?;
            Some(CompiledProfile::compile(&profile))
        }
        None => None,
    };
    let action = if config.namespace_suspended(&ns) {
        Action::Pause
    } else {
        Action::Resume
    };

    let pods = store.list_pods(name).await?;
    info!(
        "Applying {} to {} pods in namespace {}{}",
        action.as_str(),
        pods.len(),
        name,
        profile
            .as_ref()
            .map(|profile| format!(" with ResumeProfile {}", profile.name))
            .unwrap_or_default(),
    );

    let mut report = SweepReport {
        action: Some(action),
        ..SweepReport::default()
    };
    for pod in pods {
        let pod_name = pod.name_any();
        if config.is_exempt(&pod) {
            debug!("Skipping pod {}/{} because it is exempt", name, pod_name);
            report.skipped.push(pod_name);
            continue;
        }

        let result = match action {
            Action::Pause => pause(store, config, &pod).await,
            Action::Resume => resume(store, config, &pod, profile.as_ref()).await,
        };
        match result {
            Ok(outcome) => report.outcomes.push((pod_name, outcome)),
            Err(err) => {
                warn!("Failed to {} pod {}/{}: {}", action.as_str(), name, pod_name, err);
                report.failed.push(pod_name);
            }
        }
    }

    info!(
        "Namespace {}: {} pods changed, {} skipped, {} failed",
        name,
        report.changed(),
        report.skipped.len(),
        report.failed.len(),
    );
    Ok(report)
}
