//! Catalog business logic - product administration and browsing.
//!
//! Mutations require an admin [`Session`]. Products live under `productlist/{id}`
//! with store-assigned ids. Listing helpers return products sorted by name; search
//! and category filtering work on an already-loaded list.

use crate::{
    config::storefront::ProductSeed,
    core::accounts::Session,
    errors::{Error, Result},
    models::{Category, Product},
    store::{DocumentStore, UpdateBatch, new_key, paths, read_as, read_children},
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{info, instrument};

/// Input for a new catalog entry.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub price: Decimal,
    pub category: Category,
    pub image: String,
    pub stock: u32,
    pub description: String,
    pub sizes: Vec<String>,
}

/// Fields to change on an existing product. Sales are never edited directly.
#[derive(Debug, Clone, Default)]
pub struct ProductEdit {
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub category: Option<Category>,
    pub image: Option<String>,
    pub stock: Option<u32>,
    pub description: Option<String>,
    pub sizes: Option<Vec<String>>,
}

fn invalid(field: &'static str, message: &str) -> Error {
    Error::Validation {
        field,
        message: message.to_string(),
    }
}

fn validate_text(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(field, "is required"));
    }
    Ok(())
}

fn validate_price(price: Decimal) -> Result<()> {
    if price <= Decimal::ZERO {
        return Err(invalid("price", "must be a positive number"));
    }
    Ok(())
}

/// Validates a new product without touching the store.
///
/// # Errors
/// Returns `Error::Validation` for a blank name, description, or image, a price that
/// is not positive, or a stock below one.
pub fn validate_new_product(product: &NewProduct) -> Result<()> {
    validate_text("name", &product.name)?;
    validate_price(product.price)?;
    validate_text("description", &product.description)?;
    validate_text("image", &product.image)?;
    if product.stock < 1 {
        return Err(invalid("stock", "must be at least 1"));
    }
    Ok(())
}

/// Adds a product to the catalog with zero sales.
#[instrument(skip_all, fields(name = %new.name))]
pub async fn add_product<S: DocumentStore>(
    store: &S,
    session: &Session,
    new: NewProduct,
) -> Result<Product> {
    session.require_admin()?;
    validate_new_product(&new)?;

    let mut product = Product {
        id: String::new(),
        name: new.name.trim().to_string(),
        price: new.price,
        category: new.category,
        image: new.image.trim().to_string(),
        stock: new.stock,
        sales: 0,
        description: Some(new.description.trim().to_string()),
        sizes: new.sizes,
        created_at: Utc::now(),
    };
    product.id = store
        .push(&paths::products(), serde_json::to_value(&product)?)
        .await?;
    info!("Added product {} ({})", product.name, product.id);
    Ok(product)
}

/// Looks up one product.
///
/// # Errors
/// Returns `Error::ProductNotFound` when the id is unknown.
pub async fn get_product<S: DocumentStore>(store: &S, product_id: &str) -> Result<Product> {
    let product: Option<Product> = read_as(store, &paths::product(product_id)?).await?;
    product
        .map(|p| p.with_id(product_id))
        .ok_or_else(|| Error::ProductNotFound {
            id: product_id.to_string(),
        })
}

/// Applies an admin edit to a product.
///
/// # Errors
/// - `Error::Forbidden` for non-admin sessions
/// - `Error::Validation` for a blank text field or a non-positive price
/// - `Error::NoChanges` when every given field matches the stored product
/// - `Error::ProductNotFound` for an unknown id
#[instrument(skip_all, fields(product_id = %product_id))]
pub async fn edit_product<S: DocumentStore>(
    store: &S,
    session: &Session,
    product_id: &str,
    edit: ProductEdit,
) -> Result<Product> {
    session.require_admin()?;
    if let Some(name) = &edit.name {
        validate_text("name", name)?;
    }
    if let Some(price) = edit.price {
        validate_price(price)?;
    }
    if let Some(image) = &edit.image {
        validate_text("image", image)?;
    }
    if let Some(description) = &edit.description {
        validate_text("description", description)?;
    }

    let current = get_product(store, product_id).await?;
    let path = paths::product(product_id)?;
    let mut batch = UpdateBatch::new();

    if let Some(name) = edit.name.map(|n| n.trim().to_string()).filter(|n| *n != current.name) {
        batch = batch.set(path.child("name")?, Value::String(name));
    }
    if let Some(price) = edit.price.filter(|p| *p != current.price) {
        batch = batch.set_json(path.child("price")?, &price)?;
    }
    if let Some(category) = edit.category.filter(|c| *c != current.category) {
        batch = batch.set_json(path.child("category")?, &category)?;
    }
    if let Some(image) = edit.image.map(|i| i.trim().to_string()).filter(|i| *i != current.image) {
        batch = batch.set(path.child("image")?, Value::String(image));
    }
    if let Some(stock) = edit.stock.filter(|s| *s != current.stock) {
        batch = batch.set(path.child("stock")?, Value::from(stock));
    }
    if let Some(description) = edit
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| current.description.as_deref() != Some(d.as_str()))
    {
        batch = batch.set(path.child("description")?, Value::String(description));
    }
    if let Some(sizes) = edit.sizes.filter(|s| *s != current.sizes) {
        batch = batch.set_json(path.child("sizes")?, &sizes)?;
    }

    if batch.is_empty() {
        return Err(Error::NoChanges);
    }
    store.update(batch).await?;
    info!("Edited product {}", product_id);
    get_product(store, product_id).await
}

/// Removes a product from the catalog. Existing orders keep their snapshots.
///
/// # Errors
/// Returns `Error::ProductNotFound` for an unknown id.
#[instrument(skip_all, fields(product_id = %product_id))]
pub async fn delete_product<S: DocumentStore>(
    store: &S,
    session: &Session,
    product_id: &str,
) -> Result<()> {
    session.require_admin()?;
    let path = paths::product(product_id)?;
    if store.read(&path).await?.is_none() {
        return Err(Error::ProductNotFound {
            id: product_id.to_string(),
        });
    }
    store.remove(&path).await?;
    info!("Deleted product {}", product_id);
    Ok(())
}

/// Every product in the catalog, sorted by name.
pub async fn list_products<S: DocumentStore>(store: &S) -> Result<Vec<Product>> {
    let products: Vec<(String, Product)> = read_children(store, &paths::products()).await?;
    let mut products: Vec<Product> = products
        .into_iter()
        .map(|(id, product)| product.with_id(id))
        .collect();
    products.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(products)
}

/// Case-insensitive substring match on name or category. A blank query matches
/// everything.
#[must_use]
pub fn search_products(products: &[Product], query: &str) -> Vec<Product> {
    let query = query.trim().to_lowercase();
    products
        .iter()
        .filter(|p| {
            query.is_empty()
                || p.name.to_lowercase().contains(&query)
                || p.category.label().to_lowercase().contains(&query)
        })
        .cloned()
        .collect()
}

#[must_use]
pub fn filter_by_category(products: &[Product], category: Category) -> Vec<Product> {
    products
        .iter()
        .filter(|p| p.category == category)
        .cloned()
        .collect()
}

/// Seeds the catalog from configuration, but only when it is empty.
/// Returns the number of products written.
pub async fn seed_catalog<S: DocumentStore>(store: &S, seeds: &[ProductSeed]) -> Result<usize> {
    if seeds.is_empty() {
        return Ok(0);
    }
    if store.read(&paths::products()).await?.is_some() {
        info!("Catalog already populated, skipping seed");
        return Ok(0);
    }

    let now = Utc::now();
    let mut batch = UpdateBatch::new();
    for seed in seeds {
        let product = Product {
            id: String::new(),
            name: seed.name.clone(),
            price: seed.price,
            category: seed.category,
            image: seed.image.clone(),
            stock: seed.stock,
            sales: 0,
            description: seed.description.clone(),
            sizes: seed.sizes.clone(),
            created_at: now,
        };
        batch = batch.set_json(paths::product(&new_key())?, &product)?;
    }
    store.update(batch).await?;
    info!("Seeded {} products", seeds.len());
    Ok(seeds.len())
}
