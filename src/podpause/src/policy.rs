//! Pause markers read off object metadata.
//!
//! Marker keys and reserved values are configuration: every component receives a
//! [`PauseConfig`] instead of reading process-wide constants.

use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::ResourceExt;
use std::time::Duration;

pub const DEFAULT_PREFIX: &str = "k8s-pause";
pub const DEFAULT_SCHEDULER_NAME: &str = "k8s-pause";
pub const SUSPENDED_PHASE: &str = "Suspended";
pub const DEFAULT_RECREATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Annotation keys understood by the controllers and the admission webhook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Markers {
    /// `"true"` requests the namespace or pod to be paused
    pub suspend: String,
    /// Name of the `ResumeProfile` applied to a namespace
    pub profile: String,
    /// `"true"` hides a pod from every pause/resume action
    pub ignore: String,
    /// Scheduler that was active before the pod was paused
    pub previous_scheduler: String,
}

impl Markers {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            suspend: format!("{prefix}/suspend"),
            profile: format!("{prefix}/profile"),
            ignore: format!("{prefix}/ignore"),
            previous_scheduler: format!("{prefix}/previousScheduler"),
        }
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_PREFIX)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PauseConfig {
    pub markers: Markers,
    /// Scheduler name no real scheduler answers to
    pub scheduler_name: String,
    /// Phase written to the status of paused pods
    pub suspended_phase: String,
    /// Upper bound for the wait on a deletion during recreation
    pub recreate_timeout: Duration,
}

impl Default for PauseConfig {
    fn default() -> Self {
        Self {
            markers: Markers::default(),
            scheduler_name: DEFAULT_SCHEDULER_NAME.to_string(),
            suspended_phase: SUSPENDED_PHASE.to_string(),
            recreate_timeout: DEFAULT_RECREATE_TIMEOUT,
        }
    }
}

/// Pause request carried by a pod's own suspend annotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PauseIntent {
    Suspend,
    Resume,
    /// No annotation: the namespace decides
    Unset,
}

/// Pause state of a pod, derived from its scheduler, owner references and bookkeeping annotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PauseState {
    Active,
    /// Paused; a controller owns the pod and will recreate it once evicted
    PausedOwned,
    /// Paused standalone pod; resuming restores `previous_scheduler` (or the default scheduler)
    PausedStandalone { previous_scheduler: Option<String> },
}

fn is_true(value: Option<&String>) -> bool {
    value.is_some_and(|value| value == "true")
}

impl PauseConfig {
    pub fn namespace_suspended(&self, ns: &Namespace) -> bool {
        is_true(ns.annotations().get(&self.markers.suspend))
    }

    pub fn namespace_profile<'a>(&self, ns: &'a Namespace) -> Option<&'a str> {
        ns.annotations()
            .get(&self.markers.profile)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    pub fn pod_intent(&self, pod: &Pod) -> PauseIntent {
        match pod.annotations().get(&self.markers.suspend) {
            Some(value) if value == "true" => PauseIntent::Suspend,
            Some(_) => PauseIntent::Resume,
            None => PauseIntent::Unset,
        }
    }

    pub fn is_exempt(&self, pod: &Pod) -> bool {
        is_true(pod.annotations().get(&self.markers.ignore))
    }

    pub fn has_paused_scheduler(&self, pod: &Pod) -> bool {
        scheduler_name(pod) == Some(self.scheduler_name.as_str())
    }

    pub fn has_suspended_phase(&self, pod: &Pod) -> bool {
        pod.status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            == Some(self.suspended_phase.as_str())
    }

    pub fn pause_state(&self, pod: &Pod) -> PauseState {
        if !self.has_paused_scheduler(pod) {
            return PauseState::Active;
        }
        if is_owned(pod) {
            return PauseState::PausedOwned;
        }
        let previous_scheduler = pod
            .annotations()
            .get(&self.markers.previous_scheduler)
            .filter(|name| !name.is_empty())
            .cloned();
        PauseState::PausedStandalone { previous_scheduler }
    }
}

pub fn scheduler_name(pod: &Pod) -> Option<&str> {
    pod.spec.as_ref().and_then(|spec| spec.scheduler_name.as_deref())
}

/// A pod with owner references is assumed to be recreated by its owner once deleted.
pub fn is_owned(pod: &Pod) -> bool {
    !pod.owner_references().is_empty()
}
