//! Database configuration module for the storefront.
//!
//! This module handles the database connection and table creation using `SeaORM`.
//! The document store keeps every record in a single `documents` table, generated
//! from the entity definition with `Schema::create_table_from_entity` so the schema
//! always matches the Rust struct.

use crate::entities::Document;
use crate::errors::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/bud_of_roses.sqlite?mode=rwc";

/// Gets the database URL from the `DATABASE_URL` environment variable, falling
/// back to a local `SQLite` file.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database named by [`get_database_url`].
pub async fn create_connection() -> Result<DatabaseConnection> {
    Database::connect(&get_database_url())
        .await
        .map_err(Into::into)
}

/// Creates the `documents` table if it does not exist yet.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut documents = schema.create_table_from_entity(Document);
    documents.if_not_exists();

    db.execute(builder.build(&documents)).await?;
    Ok(())
}
