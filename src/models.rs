//! Storefront records as they are stored in the document tree.
//!
//! Record keys live in the path, not in the body, so every keyed type carries its
//! id as a `#[serde(skip)]` field filled in after reading.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::errors::Error;

/// Flower categories offered by the shop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Roses,
    Tulips,
    Lilies,
    Orchids,
    Daisies,
    Carnations,
    Sunflowers,
    #[serde(rename = "Mixed Bouquets")]
    MixedBouquets,
    #[serde(rename = "Exotic Flowers")]
    ExoticFlowers,
    #[serde(rename = "Dried Flowers")]
    DriedFlowers,
}

impl Category {
    pub const ALL: [Self; 10] = [
        Self::Roses,
        Self::Tulips,
        Self::Lilies,
        Self::Orchids,
        Self::Daisies,
        Self::Carnations,
        Self::Sunflowers,
        Self::MixedBouquets,
        Self::ExoticFlowers,
        Self::DriedFlowers,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Roses => "Roses",
            Self::Tulips => "Tulips",
            Self::Lilies => "Lilies",
            Self::Orchids => "Orchids",
            Self::Daisies => "Daisies",
            Self::Carnations => "Carnations",
            Self::Sunflowers => "Sunflowers",
            Self::MixedBouquets => "Mixed Bouquets",
            Self::ExoticFlowers => "Exotic Flowers",
            Self::DriedFlowers => "Dried Flowers",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Validation {
                field: "category",
                message: format!("'{s}' is not a valid category"),
            })
    }
}

/// A product listed in the catalog (`productlist/{id}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(skip)]
    pub id: String,
    pub name: String,
    pub price: Decimal,
    pub category: Category,
    pub image: String,
    pub stock: u32,
    #[serde(default)]
    pub sales: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sizes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Product {
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// One product/quantity pairing in a customer's cart (`users/{u}/cart/{id}`).
///
/// Name, price and image are copied from the product when the line is created and
/// are not refreshed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineItem {
    #[serde(skip)]
    pub id: String,
    pub product_id: String,
    pub product_name: String,
    pub price: Decimal,
    #[serde(default)]
    pub image: String,
    pub quantity: u32,
    pub total_amount: Decimal,
    pub added_at: DateTime<Utc>,
    /// Chosen for the next checkout. Local only.
    #[serde(skip)]
    pub selected: bool,
}

impl CartLineItem {
    /// Starts a new line for `product`, freezing its current name, price and image.
    #[must_use]
    pub fn for_product(id: impl Into<String>, product: &Product, quantity: u32) -> Self {
        Self {
            id: id.into(),
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            price: product.price,
            image: product.image.clone(),
            quantity,
            total_amount: product.price * Decimal::from(quantity),
            added_at: Utc::now(),
            selected: false,
        }
    }

    /// Sets the quantity and recomputes the total from the stored unit price.
    pub fn set_quantity(&mut self, quantity: u32) {
        self.quantity = quantity;
        self.total_amount = self.price * Decimal::from(quantity);
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// How the customer pays for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    CashOnDelivery,
    Gcash,
}

/// Lifecycle of a placed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
    InTransit,
    Shipped,
    Received,
    Cancelled,
}

impl OrderStatus {
    /// Received and cancelled orders never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Received | Self::Cancelled)
    }

    #[must_use]
    pub const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::InTransit, Self::Shipped | Self::Received | Self::Cancelled)
                | (Self::Shipped, Self::Received | Self::Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InTransit => "in-transit",
            Self::Shipped => "shipped",
            Self::Received => "received",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Immutable snapshot of one purchased line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub product_name: String,
    pub price: Decimal,
    pub quantity: u32,
    #[serde(default)]
    pub image: String,
    pub total_amount: Decimal,
}

impl From<&CartLineItem> for OrderItem {
    fn from(line: &CartLineItem) -> Self {
        Self {
            product_id: line.product_id.clone(),
            product_name: line.product_name.clone(),
            price: line.price,
            quantity: line.quantity,
            image: line.image.clone(),
            total_amount: line.total_amount,
        }
    }
}

/// A placed order (`orders/{id}`). Only `status` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(skip)]
    pub id: String,
    pub customer_username: String,
    pub customer_name: String,
    pub items: Vec<OrderItem>,
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub total_amount: Decimal,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    pub ordered_at: DateTime<Utc>,
    pub status: OrderStatus,
}

impl Order {
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Public profile of a registered customer (`users/{username}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(skip)]
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Stored user document: the profile plus its password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserRecord {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub password_hash: String,
}
