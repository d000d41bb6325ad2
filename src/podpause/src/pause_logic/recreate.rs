use crate::store::{ObjectStore, PodEvent};
use controller_core::{Error, Result};

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The replaced pod is removed right away; its clone takes over the workload.
const REPLACE_GRACE_PERIOD_SECONDS: u32 = 0;

/// Replace `original` by `clone` under the same name.
///
/// The watch is opened before the delete is sent, so the `Deleted` event cannot be missed.
/// `clone` is only created once the original is confirmed gone: by that event, or by a read
/// when the wait ends without it (closed watch, `timeout`). If the original is still there
/// the error is a [`Error::RecreateFailed`].
/// Dropping the returned future releases the watch.
pub async fn recreate_pod(store: &dyn ObjectStore, original: &Pod, clone: &Pod, timeout: Duration) -> Result<()> {
    let name = original.name_any();
    let namespace = original
        .namespace()
        .ok_or_else(|| Error::InvalidParameters(format!("pod {name} has no namespace")))?;
    let qualified = format!("{namespace}/{name}");
    if !original.finalizers().is_empty() {
        return Err(Error::NotRecreatable {
            name: qualified,
            reason: format!("finalizers {} delay its removal", original.finalizers().join(", ")),
        });
    }

    let mut events = store.watch_pods(&namespace, original).await?;
    store.delete_pod(original, Some(REPLACE_GRACE_PERIOD_SECONDS)).await?;
    debug!("Deleted pod {}, waiting for the deletion to complete", qualified);

    let deleted = async {
        while let Some(event) = events.next().await {
            if let PodEvent::Deleted(pod) = event? {
                if pod.name_any() == name && pod.namespace().as_deref() == Some(namespace.as_str()) {
                    return Ok(());
                }
            }
        }
        Err(Error::WatchClosed(qualified.clone()))
    };
    let waited = match tokio::time::timeout(timeout, deleted).await {
        Ok(result) => result,
        Err(_) => Err(Error::DeletionTimeout {
            name: qualified.clone(),
            timeout,
        }),
    };
    drop(events);
    if let Err(err) = waited {
        if !is_gone(store, original).await.unwrap_or(false) {
            return Err(Error::RecreateFailed {
                name: qualified,
                source: Box::new(err),
            });
        }
        warn!("Deletion of pod {} was not observed, but the pod is gone", qualified);
    }

    store
        .create_pod(clone)
        .await
        .map_err(|source| Error::RecreateFailed {
            name: qualified.clone(),
            source: Box::new(source),
        })?;
    info!("Recreated pod {}", qualified);
    Ok(())
}

/// No pod with the uid of `original` is left under its name.
async fn is_gone(store: &dyn ObjectStore, original: &Pod) -> Result<bool> {
    let namespace = original.namespace().unwrap_or_default();
    let current = store.get_pod(&namespace, &original.name_any()).await?;
    Ok(current.map_or(true, |current| current.uid() != original.uid()))
}
