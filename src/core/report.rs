//! Inventory report generation.
//!
//! This module summarizes the catalog and order book into structured data: stock and
//! sales totals, the products running low, and revenue from orders that were not
//! cancelled. Formatting helpers render the report as plain text for the log.

use crate::{
    core::{catalog, orders},
    errors::Result,
    models::{Order, OrderStatus, Product},
    store::{DocumentStore, paths, read_children},
};
use rust_decimal::Decimal;
use std::fmt::Write as _;

/// Snapshot of inventory and sales across the shop.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryReport {
    pub product_count: usize,
    pub total_stock: u64,
    /// Units sold across all products
    pub total_sales: u64,
    /// Products with less stock than the threshold, lowest stock first
    pub low_stock: Vec<Product>,
    pub low_stock_threshold: u32,
    pub order_count: usize,
    /// Sum of order totals, cancelled orders excluded
    pub revenue: Decimal,
}

/// Builds the report from already-loaded products and orders.
#[must_use]
pub fn summarize(products: &[Product], orders: &[Order], low_stock_threshold: u32) -> InventoryReport {
    let mut low_stock: Vec<Product> = products
        .iter()
        .filter(|p| p.stock < low_stock_threshold)
        .cloned()
        .collect();
    low_stock.sort_by(|a, b| a.stock.cmp(&b.stock).then_with(|| a.name.cmp(&b.name)));

    let live_orders = orders
        .iter()
        .filter(|order| order.status != OrderStatus::Cancelled);

    InventoryReport {
        product_count: products.len(),
        total_stock: products.iter().map(|p| u64::from(p.stock)).sum(),
        total_sales: products.iter().map(|p| u64::from(p.sales)).sum(),
        low_stock,
        low_stock_threshold,
        order_count: orders.len(),
        revenue: live_orders.map(|order| order.total_amount).sum(),
    }
}

/// Reads the catalog and every order and summarizes them.
pub async fn inventory_report<S: DocumentStore>(
    store: &S,
    low_stock_threshold: u32,
) -> Result<InventoryReport> {
    let products = catalog::list_products(store).await?;
    let orders: Vec<(String, Order)> = read_children(store, &paths::orders()).await?;
    let orders: Vec<Order> = orders
        .into_iter()
        .map(|(id, order)| order.with_id(id))
        .collect();
    Ok(summarize(&products, &orders, low_stock_threshold))
}

/// Renders the report as a few lines of plain text.
#[must_use]
pub fn format_report(report: &InventoryReport) -> String {
    let mut out = format!(
        "{} products, {} in stock, {} sold; {} orders, revenue {}",
        report.product_count,
        report.total_stock,
        report.total_sales,
        report.order_count,
        report.revenue
    );
    if !report.low_stock.is_empty() {
        let _ = write!(out, "\nLow stock (< {}):", report.low_stock_threshold);
        for product in &report.low_stock {
            let _ = write!(out, "\n  {} - {} left", product.name, product.stock);
        }
    }
    out
}

/// How much one customer has spent, cancelled orders excluded.
pub async fn customer_spend<S: DocumentStore>(store: &S, username: &str) -> Result<Decimal> {
    Ok(orders::orders_for_customer(store, username)
        .await?
        .iter()
        .filter(|order| order.status != OrderStatus::Cancelled)
        .map(|order| order.total_amount)
        .sum())
}
