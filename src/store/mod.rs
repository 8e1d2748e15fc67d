//! Remote document store boundary.
//!
//! The storefront only ever talks to its backing store through [`DocumentStore`]:
//! point reads of a subtree, full overwrites, multi-path partial updates, and
//! push-based change subscriptions. [`sql::SqlDocumentStore`] is the bundled
//! implementation.

pub mod path;
pub mod sql;
pub mod subscription;

pub use path::{DocPath, paths};
pub use sql::SqlDocumentStore;
pub use subscription::Subscription;

use crate::errors::{Error, Result};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::future::Future;
use tracing::warn;

/// One change applied by [`DocumentStore::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// Overwrite the subtree at the path (a JSON `null` removes it).
    Set(Value),
    /// Remove the subtree at the path.
    Remove,
    /// Add `delta` to the number at the path (missing counts as 0), never going
    /// below `floor` when one is given.
    Increment { delta: i64, floor: Option<i64> },
}

/// A set of independent path updates applied together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateBatch {
    entries: Vec<(DocPath, FieldUpdate)>,
}

impl UpdateBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, path: DocPath, value: Value) -> Self {
        self.entries.push((path, FieldUpdate::Set(value)));
        self
    }

    /// Serializes `value` and sets it at `path`.
    pub fn set_json<T: Serialize>(self, path: DocPath, value: &T) -> Result<Self> {
        Ok(self.set(path, serde_json::to_value(value)?))
    }

    #[must_use]
    pub fn remove(mut self, path: DocPath) -> Self {
        self.entries.push((path, FieldUpdate::Remove));
        self
    }

    #[must_use]
    pub fn increment(mut self, path: DocPath, delta: i64) -> Self {
        self.entries.push((path, FieldUpdate::Increment { delta, floor: None }));
        self
    }

    /// Like [`UpdateBatch::increment`], clamping the result at `floor`.
    #[must_use]
    pub fn increment_with_floor(mut self, path: DocPath, delta: i64, floor: i64) -> Self {
        self.entries.push((
            path,
            FieldUpdate::Increment {
                delta,
                floor: Some(floor),
            },
        ));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn entries(&self) -> &[(DocPath, FieldUpdate)] {
        &self.entries
    }

    #[must_use]
    pub fn paths(&self) -> Vec<DocPath> {
        self.entries.iter().map(|(p, _)| p.clone()).collect()
    }

    /// Rejects batches in which one path contains another; the outcome of such a
    /// batch would depend on application order.
    ///
    /// # Errors
    /// Returns `Error::InvalidPath` naming the first overlapping pair.
    pub fn validate(&self) -> Result<()> {
        for (i, (a, _)) in self.entries.iter().enumerate() {
            if let Some((b, _)) = self.entries[i + 1..].iter().find(|(b, _)| a.overlaps(b)) {
                return Err(Error::InvalidPath {
                    path: a.to_string(),
                    reason: format!("overlaps '{b}' in the same update"),
                });
            }
        }
        Ok(())
    }
}

/// Primitive operations of the hierarchical document store.
///
/// Implementations must be cheap to clone; clones share the same backing store and
/// change feed.
pub trait DocumentStore: Clone + Send + Sync + 'static {
    /// Point read of the subtree at `path`. `None` when nothing is stored there.
    fn read(&self, path: &DocPath) -> impl Future<Output = Result<Option<Value>>> + Send;

    /// Replaces the subtree at `path`. Writing `null` removes it.
    fn write(&self, path: &DocPath, value: Value) -> impl Future<Output = Result<()>> + Send;

    /// Applies every entry of `batch`. Paths in a batch must not overlap.
    fn update(&self, batch: UpdateBatch) -> impl Future<Output = Result<()>> + Send;

    /// Starts listening to the subtree at `path`. The returned subscription yields
    /// the current value first, then a fresh snapshot after every change touching
    /// the subtree. Dropping it unsubscribes.
    fn subscribe(&self, path: &DocPath) -> impl Future<Output = Result<Subscription>> + Send;

    /// Removes the subtree at `path`. Removing a missing path is a no-op.
    fn remove(&self, path: &DocPath) -> impl Future<Output = Result<()>> + Send {
        self.write(path, Value::Null)
    }

    /// Stores `value` under a freshly generated key below `parent` and returns the key.
    fn push(&self, parent: &DocPath, value: Value) -> impl Future<Output = Result<String>> + Send {
        async move {
            let key = new_key();
            self.write(&parent.child(&key)?, value).await?;
            Ok(key)
        }
    }
}

/// Generates a unique key for a new child node.
#[must_use]
pub fn new_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Reads and deserializes the document at `path`.
pub async fn read_as<S, T>(store: &S, path: &DocPath) -> Result<Option<T>>
where
    S: DocumentStore,
    T: DeserializeOwned,
{
    store
        .read(path)
        .await?
        .map(serde_json::from_value)
        .transpose()
        .map_err(Into::into)
}

/// Reads every child of `path` as `(key, T)` pairs, ordered by key.
pub async fn read_children<S, T>(store: &S, path: &DocPath) -> Result<Vec<(String, T)>>
where
    S: DocumentStore,
    T: DeserializeOwned,
{
    Ok(children_of(path, store.read(path).await?))
}

/// Splits a subtree snapshot into typed children. Children that do not
/// deserialize are skipped with a warning rather than failing the whole listing.
pub fn children_of<T: DeserializeOwned>(path: &DocPath, value: Option<Value>) -> Vec<(String, T)> {
    let Some(Value::Object(map)) = value else {
        return Vec::new();
    };
    map.into_iter()
        .filter_map(|(key, child)| match serde_json::from_value(child) {
            Ok(parsed) => Some((key, parsed)),
            Err(e) => {
                warn!("Skipping malformed document {}/{}: {}", path, key, e);
                None
            }
        })
        .collect()
}
