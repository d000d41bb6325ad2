use crate::policy::{Markers, PauseConfig, DEFAULT_PREFIX, DEFAULT_SCHEDULER_NAME, SUSPENDED_PHASE};

use std::time::Duration;

/// Flags shaping the markers and reserved values, shared by the agent and the cli.
#[derive(clap::Args, Clone, Debug)]
pub struct PauseArgs {
    /// Prefix of the suspend, profile, ignore and previousScheduler annotations
    #[arg(long, env = "ANNOTATION_PREFIX", default_value = DEFAULT_PREFIX)]
    pub annotation_prefix: String,

    /// Scheduler name given to paused pods
    #[arg(long, env = "SCHEDULER_NAME", default_value = DEFAULT_SCHEDULER_NAME)]
    pub scheduler_name: String,

    /// Seconds to wait for a pod deletion before recreating it
    #[arg(long, env = "RECREATE_TIMEOUT_SECS", default_value_t = 60)]
    pub recreate_timeout_secs: u64,
}

impl PauseArgs {
    pub fn to_config(&self) -> PauseConfig {
        PauseConfig {
            markers: Markers::with_prefix(&self.annotation_prefix),
            scheduler_name: self.scheduler_name.clone(),
            suspended_phase: SUSPENDED_PHASE.to_string(),
            recreate_timeout: Duration::from_secs(self.recreate_timeout_secs),
        }
    }
}
