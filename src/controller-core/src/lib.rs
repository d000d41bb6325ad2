use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Namespace {0} not found")]
    NamespaceNotFound(String),

    #[error("ResumeProfile {namespace}/{name} not found")]
    ProfileNotFound { namespace: String, name: String },

    #[error("Watch stream for pod {0} closed before deletion was observed")]
    WatchClosed(String),

    #[error("Pod {name} was not deleted within {timeout:?}")]
    DeletionTimeout { name: String, timeout: Duration },

    #[error("Pod {name} cannot be recreated: {reason}")]
    NotRecreatable { name: String, reason: String },

    #[error("Pod {name} was deleted but could not be recreated: {source}")]
    RecreateFailed {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("MetricsError: {0}")]
    MetricsError(#[source] prometheus::Error),

    #[error("TelemetryError: {0}")]
    TelemetryError(String),

    #[error("Reconcile workers are shut down")]
    WorkersClosed,
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::KubeError(kube::Error::Api(e)) => format!("kubeerror({})", e.reason.to_lowercase()),
            Error::KubeError(_) => "kubeerror".to_string(),
            Error::RecreateFailed { .. } => "recreatefailed".to_string(),
            Error::DeletionTimeout { .. } => "deletiontimeout".to_string(),
            other => {
                let label = format!("{other:?}").to_lowercase();
                label.split(['(', ' ']).next().unwrap_or_default().to_string()
            }
        }
    }

    /// True for API errors carrying HTTP 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(e)) if e.code == 404)
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Error::KubeError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err)
    }
}

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;
pub use metrics::{Metrics, ReconcileMeasurer};
