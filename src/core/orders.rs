//! Order history and status transitions.
//!
//! Orders are written once by checkout and afterwards only their `status` changes.
//! Admins ship orders, customers confirm receipt of their own orders, and either may
//! cancel an order that has not been received. Cancelling does not restock.

use crate::{
    core::accounts::Session,
    errors::{Error, Result},
    models::{Order, OrderStatus},
    store::{DocumentStore, paths, read_as, read_children},
};
use tracing::{info, instrument};

async fn load_orders<S: DocumentStore>(store: &S) -> Result<Vec<Order>> {
    let orders: Vec<(String, Order)> = read_children(store, &paths::orders()).await?;
    let mut orders: Vec<Order> = orders
        .into_iter()
        .map(|(id, order)| order.with_id(id))
        .collect();
    orders.sort_by(|a, b| b.ordered_at.cmp(&a.ordered_at));
    Ok(orders)
}

/// A customer's orders, newest first.
pub async fn orders_for_customer<S: DocumentStore>(store: &S, username: &str) -> Result<Vec<Order>> {
    Ok(load_orders(store)
        .await?
        .into_iter()
        .filter(|order| order.customer_username == username)
        .collect())
}

/// Every order in the shop, newest first. Admin only.
pub async fn all_orders<S: DocumentStore>(store: &S, session: &Session) -> Result<Vec<Order>> {
    session.require_admin()?;
    load_orders(store).await
}

#[must_use]
pub fn filter_by_status(orders: &[Order], status: OrderStatus) -> Vec<Order> {
    orders
        .iter()
        .filter(|order| order.status == status)
        .cloned()
        .collect()
}

/// Loads one order. Customers may only see their own.
///
/// # Errors
/// Returns `Error::OrderNotFound` for an unknown id or another customer's order.
pub async fn get_order<S: DocumentStore>(store: &S, session: &Session, order_id: &str) -> Result<Order> {
    let order: Option<Order> = read_as(store, &paths::order(order_id)?).await?;
    order
        .map(|o| o.with_id(order_id))
        .filter(|o| session.is_admin() || o.customer_username == session.username)
        .ok_or_else(|| Error::OrderNotFound {
            id: order_id.to_string(),
        })
}

fn may_move(session: &Session, order: &Order, next: OrderStatus) -> bool {
    let owner = order.customer_username == session.username;
    match next {
        OrderStatus::Shipped => session.is_admin(),
        OrderStatus::Received => owner,
        OrderStatus::Cancelled => owner || session.is_admin(),
        OrderStatus::InTransit => false,
    }
}

/// Moves an order to `next`.
///
/// # Errors
/// - `Error::OrderNotFound` for an unknown or foreign order
/// - `Error::InvalidStatusTransition` when `next` cannot follow the current status
/// - `Error::Forbidden` when the session may not make this transition
#[instrument(skip_all, fields(order_id = %order_id, next = %next))]
pub async fn set_status<S: DocumentStore>(
    store: &S,
    session: &Session,
    order_id: &str,
    next: OrderStatus,
) -> Result<Order> {
    let mut order = get_order(store, session, order_id).await?;
    if !order.status.can_become(next) {
        return Err(Error::InvalidStatusTransition {
            id: order_id.to_string(),
            from: order.status.to_string(),
            to: next.to_string(),
        });
    }
    if !may_move(session, &order, next) {
        return Err(Error::Forbidden);
    }

    store
        .write(
            &paths::order(order_id)?.child("status")?,
            serde_json::to_value(next)?,
        )
        .await?;
    info!("Order {} moved from {} to {}", order_id, order.status, next);
    order.status = next;
    Ok(order)
}

pub async fn ship_order<S: DocumentStore>(store: &S, session: &Session, order_id: &str) -> Result<Order> {
    set_status(store, session, order_id, OrderStatus::Shipped).await
}

pub async fn confirm_received<S: DocumentStore>(
    store: &S,
    session: &Session,
    order_id: &str,
) -> Result<Order> {
    set_status(store, session, order_id, OrderStatus::Received).await
}

pub async fn cancel_order<S: DocumentStore>(store: &S, session: &Session, order_id: &str) -> Result<Order> {
    set_status(store, session, order_id, OrderStatus::Cancelled).await
}
