//! Shared test utilities for the storefront.
//!
//! This module provides helpers for setting up in-memory stores, seeding records
//! with sensible defaults, and a [`RecordingStore`] that counts store calls and can
//! inject failures.

use crate::{
    core::accounts::{Role, Session},
    errors::{Error, Result},
    models::{Category, Product, UserProfile, UserRecord},
    store::{DocPath, DocumentStore, SqlDocumentStore, Subscription, UpdateBatch, new_key, paths},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::DbErr;
use serde_json::Value;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Creates an in-memory `SQLite` database with all tables initialized.
pub async fn setup_test_db() -> Result<sea_orm::DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a document store over a fresh in-memory database.
/// This is the standard setup for all store-backed tests.
pub async fn setup_test_store() -> Result<SqlDocumentStore> {
    Ok(SqlDocumentStore::new(setup_test_db().await?))
}

/// Creates a test product directly in the store.
///
/// # Defaults
/// * category: Roses
/// * image: a placeholder URI
pub async fn create_test_product<S: DocumentStore>(
    store: &S,
    name: &str,
    price: i64,
    stock: u32,
    sales: u32,
) -> Result<Product> {
    let id = new_key();
    let product = Product {
        id: id.clone(),
        name: name.to_string(),
        price: Decimal::from(price),
        category: Category::Roses,
        image: format!("https://example.com/{id}.png"),
        stock,
        sales,
        description: Some(format!("{name} for testing")),
        sizes: Vec::new(),
        created_at: Utc::now(),
    };
    store
        .write(&paths::product(&id)?, serde_json::to_value(&product)?)
        .await?;
    Ok(product)
}

/// Creates a customer profile directly in the store, bypassing signup validation.
///
/// # Defaults
/// * first and last name: "Test" and "Customer"
/// * email: `{username}@example.com`
pub async fn create_test_user<S: DocumentStore>(store: &S, username: &str) -> Result<UserProfile> {
    let profile = UserProfile {
        username: username.to_string(),
        first_name: "Test".to_string(),
        last_name: "Customer".to_string(),
        email: format!("{username}@example.com"),
        phone: "555-123-4567".to_string(),
        address: "1 Garden Way".to_string(),
        city: "Springfield".to_string(),
        state: "IL".to_string(),
        zip: "62701".to_string(),
        created_at: Utc::now(),
    };
    let record = UserRecord {
        profile: profile.clone(),
        password_hash: "not-a-real-hash".to_string(),
    };
    store
        .write(&paths::user(username)?, serde_json::to_value(&record)?)
        .await?;
    Ok(profile)
}

#[must_use]
pub fn customer_session(username: &str) -> Session {
    Session {
        username: username.to_string(),
        role: Role::Customer,
    }
}

#[must_use]
pub fn admin_session() -> Session {
    Session {
        username: "admin".to_string(),
        role: Role::Admin,
    }
}

#[derive(Debug)]
struct Recorder {
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_reads: AtomicBool,
    writes_before_failure: AtomicUsize,
}

/// Wraps a store, counting calls and optionally failing them.
///
/// Writes cover `write`, `update`, and everything built on them (`push`, `remove`).
/// Subscriptions are passed straight through and not counted.
#[derive(Debug, Clone)]
pub struct RecordingStore<S> {
    inner: S,
    recorder: Arc<Recorder>,
}

impl<S: DocumentStore> RecordingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            recorder: Arc::new(Recorder {
                reads: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
                fail_reads: AtomicBool::new(false),
                writes_before_failure: AtomicUsize::new(usize::MAX),
            }),
        }
    }

    pub fn reads(&self) -> usize {
        self.recorder.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.recorder.writes.load(Ordering::SeqCst)
    }

    /// Total store calls seen so far.
    pub fn calls(&self) -> usize {
        self.reads() + self.writes()
    }

    pub fn reset_counts(&self) {
        self.recorder.reads.store(0, Ordering::SeqCst);
        self.recorder.writes.store(0, Ordering::SeqCst);
    }

    /// Makes every subsequent read fail.
    pub fn fail_reads(&self) {
        self.recorder.fail_reads.store(true, Ordering::SeqCst);
    }

    /// Lets `successes` more writes through, then fails the rest.
    pub fn fail_writes_after(&self, successes: usize) {
        self.recorder
            .writes_before_failure
            .store(successes, Ordering::SeqCst);
    }

    pub const fn inner(&self) -> &S {
        &self.inner
    }

    fn record_write(&self) -> Result<()> {
        self.recorder.writes.fetch_add(1, Ordering::SeqCst);
        let allowed = self.recorder.writes_before_failure.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            },
        );
        if allowed.is_err() {
            return Err(injected("write"));
        }
        Ok(())
    }
}

fn injected(what: &str) -> Error {
    Error::Database(DbErr::Custom(format!("injected {what} failure")))
}

impl<S: DocumentStore> DocumentStore for RecordingStore<S> {
    async fn read(&self, path: &DocPath) -> Result<Option<Value>> {
        self.recorder.reads.fetch_add(1, Ordering::SeqCst);
        if self.recorder.fail_reads.load(Ordering::SeqCst) {
            return Err(injected("read"));
        }
        self.inner.read(path).await
    }

    async fn write(&self, path: &DocPath, value: Value) -> Result<()> {
        self.record_write()?;
        self.inner.write(path, value).await
    }

    async fn update(&self, batch: UpdateBatch) -> Result<()> {
        self.record_write()?;
        self.inner.update(batch).await
    }

    async fn subscribe(&self, path: &DocPath) -> Result<Subscription> {
        self.inner.subscribe(path).await
    }
}
