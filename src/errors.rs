//! Unified error types and result handling.
//!
//! Errors fall into three families: local validation failures (never reach the store),
//! remote failures (the store rejected or could not complete an operation), and
//! business-rule rejections detected by a pre-check read before any mutation.

use crate::core::checkout::CheckoutStep;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid document path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Document at '{path}' is not a number")]
    NotACounter { path: String },

    #[error("Cannot update '{path}': the document containing it does not exist")]
    MissingParent { path: String },

    #[error("Subscription to '{path}' closed")]
    SubscriptionClosed { path: String },

    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Invalid quantity: {quantity} (must be at least 1)")]
    InvalidQuantity { quantity: u32 },

    #[error("No changes made")]
    NoChanges,

    #[error("Product not found: {id}")]
    ProductNotFound { id: String },

    #[error("Order not found: {id}")]
    OrderNotFound { id: String },

    #[error("User not found: {username}")]
    UserNotFound { username: String },

    #[error("Username '{username}' already exists")]
    UsernameTaken { username: String },

    #[error("Email '{email}' is already registered")]
    EmailTaken { email: String },

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Administrator access required")]
    Forbidden,

    #[error("Password hashing failed")]
    PasswordHash,

    #[error("No items selected for checkout")]
    EmptyCheckout,

    #[error("This checkout has already run")]
    CheckoutAlreadyRun,

    #[error("Insufficient stock for '{product}': {available} available, {requested} requested")]
    InsufficientStock {
        product: String,
        available: u32,
        requested: u32,
    },

    #[error("Cannot move order {id} from {from} to {to}")]
    InvalidStatusTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("Checkout failed during {step}: {source}")]
    Checkout {
        step: CheckoutStep,
        /// Set when the order record was already written before the failure.
        order_id: Option<String>,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// True for failures of the store itself, as opposed to local validation
    /// or business-rule rejections.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        match self {
            Self::Database(_) | Self::Serialization(_) | Self::SubscriptionClosed { .. } => true,
            Self::Checkout { source, .. } => source.is_remote(),
            _ => false,
        }
    }

    /// Message suitable for showing to a shopper. Remote failures collapse into a
    /// single generic notice; everything else keeps its specific wording.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Checkout {
                order_id: Some(_), ..
            } => "Your order was recorded but could not be fully processed. Please contact the shop."
                .to_string(),
            e if e.is_remote() => "Something went wrong. Please try again.".to_string(),
            Self::Checkout { source, .. } => source.user_message(),
            e => e.to_string(),
        }
    }
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
