//! Push-based change subscriptions.
//!
//! A [`Subscription`] owns a background listener task. The task watches the store's
//! change feed, re-reads the subscribed subtree after every relevant commit, and
//! forwards the snapshot. Dropping the subscription aborts the task.

use super::{DocPath, DocumentStore};
use crate::errors::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, trace};

/// Paths written by a single committed operation.
pub type ChangeSet = Arc<Vec<DocPath>>;

const SNAPSHOT_BUFFER: usize = 16;

/// Live view of one subtree. Yields the value at subscription time first.
#[derive(Debug)]
pub struct Subscription {
    path: DocPath,
    snapshots: mpsc::Receiver<Result<Option<Value>>>,
    listener: JoinHandle<()>,
}

impl Subscription {
    /// Starts a listener for `path`. `changes` must be obtained from the store's
    /// feed *before* reading `initial`, so no commit can slip between the two.
    pub(crate) fn start<S: DocumentStore>(
        store: S,
        path: DocPath,
        mut changes: broadcast::Receiver<ChangeSet>,
        initial: Option<Value>,
    ) -> Self {
        let (tx, snapshots) = mpsc::channel(SNAPSHOT_BUFFER);
        let watched = path.clone();
        let listener = tokio::spawn(async move {
            if tx.send(Ok(initial)).await.is_err() {
                return;
            }
            loop {
                let relevant = match changes.recv().await {
                    Ok(changed) => changed.iter().any(|p| p.overlaps(&watched)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Subscription to {} lagged by {} change sets", watched, skipped);
                        true
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !relevant {
                    continue;
                }
                trace!("Change touched {}, re-reading", watched);
                let snapshot = store.read(&watched).await;
                if tx.send(snapshot).await.is_err() {
                    break;
                }
            }
            trace!("Listener for {} stopped", watched);
        });
        Self {
            path,
            snapshots,
            listener,
        }
    }

    #[must_use]
    pub const fn path(&self) -> &DocPath {
        &self.path
    }

    /// Waits for the next snapshot.
    ///
    /// # Errors
    /// Returns `Error::SubscriptionClosed` once the store's change feed is gone, or
    /// the read error raised while refreshing the snapshot.
    pub async fn next(&mut self) -> Result<Option<Value>> {
        self.snapshots
            .recv()
            .await
            .unwrap_or_else(|| Err(self.closed()))
    }

    /// Returns the next snapshot if one is already queued.
    pub fn try_next(&mut self) -> Option<Result<Option<Value>>> {
        match self.snapshots.try_recv() {
            Ok(snapshot) => Some(snapshot),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => Some(Err(self.closed())),
        }
    }

    /// Stops listening. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}

    fn closed(&self) -> Error {
        Error::SubscriptionClosed {
            path: self.path.to_string(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
