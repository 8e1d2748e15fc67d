//! Storefront configuration loading from config.toml
//!
//! The file holds shop-wide settings (shipping fee, low-stock threshold, admin
//! accounts, checkout behavior) and the products used to seed an empty catalog.

use crate::{
    config::users,
    core::checkout::{CheckoutOptions, CommitMode, OversellPolicy},
    errors::{Error, Result},
    models::Category,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Deserialize)]
pub struct StorefrontConfig {
    /// Flat fee added to every order
    #[serde(default = "default_shipping_fee")]
    pub shipping_fee: Decimal,
    /// Products with less stock than this are reported as running low
    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: u32,
    /// Usernames granted the admin role
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub checkout: CheckoutSettings,
    /// Catalog entries seeded into an empty store
    #[serde(default)]
    pub products: Vec<ProductSeed>,
}

/// The `[checkout]` table
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CheckoutSettings {
    #[serde(default)]
    pub commit: CommitMode,
    #[serde(default)]
    pub oversell: OversellPolicy,
}

/// A product to seed
#[derive(Debug, Clone, Deserialize)]
pub struct ProductSeed {
    pub name: String,
    pub price: Decimal,
    pub category: Category,
    pub image: String,
    pub stock: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sizes: Vec<String>,
}

fn default_shipping_fee() -> Decimal {
    Decimal::from(80)
}

const fn default_low_stock_threshold() -> u32 {
    20
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            shipping_fee: default_shipping_fee(),
            low_stock_threshold: default_low_stock_threshold(),
            admins: Vec::new(),
            checkout: CheckoutSettings::default(),
            products: Vec::new(),
        }
    }
}

impl StorefrontConfig {
    /// Checkout settings combined with the shop's shipping fee.
    #[must_use]
    pub fn checkout_options(&self) -> CheckoutOptions {
        CheckoutOptions {
            shipping_fee: self.shipping_fee,
            commit: self.checkout.commit,
            oversell: self.checkout.oversell,
        }
    }

    /// Admins from the file plus those named in `STOREFRONT_ADMINS`.
    #[must_use]
    pub fn all_admins(&self) -> Vec<String> {
        let mut admins = self.admins.clone();
        for name in users::get_env_admins() {
            if !admins.contains(&name) {
                admins.push(name);
            }
        }
        admins
    }

    fn validate(self) -> Result<Self> {
        if self.shipping_fee.is_sign_negative() {
            return Err(Error::Config {
                message: "shipping_fee must not be negative".to_string(),
            });
        }
        if let Some(seed) = self
            .products
            .iter()
            .find(|p| p.name.trim().is_empty() || p.price <= Decimal::ZERO)
        {
            return Err(Error::Config {
                message: format!("Seed product '{}' needs a name and a positive price", seed.name),
            });
        }
        Ok(self)
    }
}

/// Parses configuration from TOML text.
///
/// # Errors
/// Returns `Error::Config` if the TOML is invalid, a field has the wrong type, or a
/// value is out of range.
pub fn parse_config(contents: &str) -> Result<StorefrontConfig> {
    toml::from_str::<StorefrontConfig>(contents)
        .map_err(|e| Error::Config {
            message: format!("Failed to parse config.toml: {e}"),
        })?
        .validate()
}

/// Loads storefront configuration from a TOML file
///
/// # Errors
/// Returns an error if the file cannot be read or does not parse.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<StorefrontConfig> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;
    parse_config(&contents)
}

/// Loads configuration from `STOREFRONT_CONFIG`, or ./config.toml when unset
pub fn load_default_config() -> Result<StorefrontConfig> {
    let path =
        std::env::var("STOREFRONT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_config(path)
}
