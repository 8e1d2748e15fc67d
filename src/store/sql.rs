//! SeaORM-backed document store.
//!
//! Documents live in the `documents` table, one row per stored node. A logical
//! subtree is either found inside the body of a single covering row, or assembled
//! from the rows below it. Every write runs inside a database transaction and
//! behind an in-process write gate, so multi-path updates (and the counter
//! increments within them) apply all-or-nothing and never interleave.

use super::{
    DocPath, DocumentStore, FieldUpdate, UpdateBatch,
    subscription::{ChangeSet, Subscription},
};
use crate::{
    entities::{Document, document},
    errors::{Error, Result},
};
use sea_orm::{Set, TransactionTrait, prelude::*};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, instrument};

const CHANGE_FEED_CAPACITY: usize = 64;

/// Document store persisted through a SeaORM connection.
#[derive(Clone)]
pub struct SqlDocumentStore {
    db: Arc<DatabaseConnection>,
    changes: broadcast::Sender<ChangeSet>,
    write_gate: Arc<Mutex<()>>,
}

impl std::fmt::Debug for SqlDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlDocumentStore")
            .field("subscribers", &self.changes.receiver_count())
            .finish_non_exhaustive()
    }
}

/// A mutation waiting to be applied inside a write transaction.
enum Pending {
    Write { path: DocPath, value: Value },
    Batch(UpdateBatch),
}

impl SqlDocumentStore {
    /// Wraps an open connection. The `documents` table must already exist
    /// (see [`crate::config::database::create_tables`]).
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            db: Arc::new(db),
            changes,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn commit(&self, changed: Vec<DocPath>, pending: Pending) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let txn = self.db.begin().await?;
        match pending {
            Pending::Write { path, value } => write_at(&txn, &path, normalize(value)).await?,
            Pending::Batch(batch) => {
                for (path, change) in batch.entries() {
                    match change {
                        FieldUpdate::Set(value) => {
                            write_at(&txn, path, normalize(value.clone())).await?;
                        }
                        FieldUpdate::Remove => write_at(&txn, path, None).await?,
                        FieldUpdate::Increment { delta, floor } => {
                            increment_at(&txn, path, *delta, *floor).await?;
                        }
                    }
                }
            }
        }
        txn.commit().await?;
        // Sending fails only when nobody is subscribed.
        let _ = self.changes.send(ChangeSet::new(changed));
        Ok(())
    }
}

impl DocumentStore for SqlDocumentStore {
    #[instrument(skip_all, fields(path = %path))]
    async fn read(&self, path: &DocPath) -> Result<Option<Value>> {
        read_at(self.db.as_ref(), path).await
    }

    #[instrument(skip_all, fields(path = %path))]
    async fn write(&self, path: &DocPath, value: Value) -> Result<()> {
        debug!("Writing document");
        self.commit(
            vec![path.clone()],
            Pending::Write {
                path: path.clone(),
                value,
            },
        )
        .await
    }

    #[instrument(skip_all, fields(entries = batch.len()))]
    async fn update(&self, batch: UpdateBatch) -> Result<()> {
        batch.validate()?;
        if batch.is_empty() {
            return Ok(());
        }
        debug!("Applying multi-path update");
        let changed = batch.paths();
        self.commit(changed, Pending::Batch(batch)).await
    }

    #[instrument(skip_all, fields(path = %path))]
    async fn subscribe(&self, path: &DocPath) -> Result<Subscription> {
        let changes = self.changes.subscribe();
        let initial = read_at(self.db.as_ref(), path).await?;
        debug!("Subscribed");
        Ok(Subscription::start(
            self.clone(),
            path.clone(),
            changes,
            initial,
        ))
    }
}

/// Finds the stored row whose body contains `path`: the row at `path` itself or
/// at one of its ancestors.
async fn covering_row<C: ConnectionTrait>(conn: &C, path: &DocPath) -> Result<Option<document::Model>> {
    let rows = Document::find()
        .filter(document::Column::Path.is_in(path.lineage()))
        .all(conn)
        .await?;
    Ok(rows.into_iter().max_by_key(|row| row.path.len()))
}

/// Rows stored strictly below `path`.
async fn descendant_rows<C: ConnectionTrait>(conn: &C, path: &DocPath) -> Result<Vec<document::Model>> {
    let prefix = format!("{path}/");
    // LIKE treats `_` as a wildcard, so re-check the prefix exactly.
    let rows = Document::find()
        .filter(document::Column::Path.like(format!("{prefix}%")))
        .all(conn)
        .await?;
    Ok(rows
        .into_iter()
        .filter(|row| row.path.starts_with(&prefix))
        .collect())
}

async fn read_at<C: ConnectionTrait>(conn: &C, path: &DocPath) -> Result<Option<Value>> {
    if let Some(row) = covering_row(conn, path).await? {
        let mut node = &row.body;
        for segment in path.relative_to(&row.path) {
            match node.get(segment) {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        return Ok(Some(node.clone()));
    }

    let rows = descendant_rows(conn, path).await?;
    if rows.is_empty() {
        return Ok(None);
    }
    let mut tree = Value::Object(Map::new());
    for row in rows {
        let row_path = DocPath::parse(&row.path)?;
        let relative: Vec<&str> = row_path.relative_to(path.as_str());
        set_pointer(&mut tree, &relative, row.body);
    }
    Ok(Some(tree))
}

async fn write_at<C: ConnectionTrait>(conn: &C, path: &DocPath, value: Option<Value>) -> Result<()> {
    let now = chrono::Utc::now();

    if let Some(row) = covering_row(conn, path).await? {
        let relative: Vec<&str> = path.relative_to(&row.path);
        let body = if relative.is_empty() {
            value
        } else {
            let mut body = row.body.clone();
            match value {
                Some(v) => set_pointer(&mut body, &relative, v),
                None => remove_pointer(&mut body, &relative),
            }
            normalize(body)
        };
        match body {
            Some(body) => {
                let mut active: document::ActiveModel = row.into();
                active.body = Set(body);
                active.updated_at = Set(now);
                active.update(conn).await?;
            }
            None => {
                row.delete(conn).await?;
            }
        }
        return Ok(());
    }

    let stale: Vec<String> = descendant_rows(conn, path)
        .await?
        .into_iter()
        .map(|row| row.path)
        .collect();
    if !stale.is_empty() {
        Document::delete_many()
            .filter(document::Column::Path.is_in(stale))
            .exec(conn)
            .await?;
    }

    if let Some(body) = value {
        document::ActiveModel {
            path: Set(path.to_string()),
            body: Set(body),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;
    }
    Ok(())
}

async fn increment_at<C: ConnectionTrait>(
    conn: &C,
    path: &DocPath,
    delta: i64,
    floor: Option<i64>,
) -> Result<()> {
    let current = match read_at(conn, path).await? {
        None => {
            // A missing counter starts at zero, but only inside an existing document.
            if let Some(parent) = path.parent() {
                if read_at(conn, &parent).await?.is_none() {
                    return Err(Error::MissingParent {
                        path: path.to_string(),
                    });
                }
            }
            0
        }
        Some(value) => value.as_i64().ok_or_else(|| Error::NotACounter {
            path: path.to_string(),
        })?,
    };
    let mut next = current.saturating_add(delta);
    if let Some(floor) = floor {
        next = next.max(floor);
    }
    write_at(conn, path, Some(Value::from(next))).await
}

/// Drops nulls and empty objects, which the tree never stores.
fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k, v)))
                .collect();
            (!pruned.is_empty()).then_some(Value::Object(pruned))
        }
        other => Some(other),
    }
}

fn set_pointer(root: &mut Value, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };
    let mut node = root;
    for segment in parents {
        ensure_object(node);
        let Value::Object(map) = node else { return };
        node = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(node);
    if let Value::Object(map) = node {
        map.insert((*last).to_string(), value);
    }
}

fn remove_pointer(root: &mut Value, segments: &[&str]) {
    let Some((last, parents)) = segments.split_last() else {
        *root = Value::Null;
        return;
    };
    let mut node = root;
    for segment in parents {
        match node.get_mut(*segment) {
            Some(child) => node = child,
            None => return,
        }
    }
    if let Value::Object(map) = node {
        map.remove(*last);
    }
}

/// Replaces a scalar found where the tree needs an object.
fn ensure_object(node: &mut Value) {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
}
