//! Entity module - Contains the SeaORM entity definitions for the database.
//! The storefront persists a single table of JSON documents keyed by path.

pub mod document;

pub use document::{Column as DocumentColumn, Entity as Document, Model as DocumentModel};
