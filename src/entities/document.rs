//! Document entity - One stored node of the hierarchical document tree.
//!
//! Each row holds the JSON body found at `path`. No stored path is ever an ancestor
//! of another stored path: writes below an existing row are merged into that row's
//! body, and writes above existing rows replace them.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Document database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    /// Slash-separated location of the document (e.g. `productlist/abc`)
    #[sea_orm(primary_key, auto_increment = false)]
    pub path: String,
    /// JSON body of the document subtree
    pub body: Json,
    /// When this document was last written
    pub updated_at: DateTimeUtc,
}

/// Documents have no relationships; hierarchy lives in the path
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
