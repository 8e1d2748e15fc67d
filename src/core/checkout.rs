//! Checkout sequencer - turns selected cart lines into an order.
//!
//! A checkout walks a fixed sequence of steps:
//!
//! `Start → FetchCounters → ComputeNewCounters → WriteOrder → ApplyCounterUpdates →
//! ClearCartEntries → Done`
//!
//! and fails at whichever step raised an error. Nothing is written before
//! `WriteOrder`, so validation, read, and stock failures never leave a trace.
//!
//! How the three writing steps reach the store depends on [`CommitMode`]:
//! - [`CommitMode::Atomic`] sends the order, the counter changes, and the cart
//!   removals as one multi-path update. Counters use the store's increment
//!   primitive, so concurrent checkouts of the same product never lose sales.
//! - [`CommitMode::Sequential`] issues three separate writes and sets counters to
//!   the values computed from the earlier read (last write wins). A failure after
//!   the order is written is reported with the order id so it can be reconciled.

use crate::{
    core::accounts::Session,
    errors::{Error, Result},
    models::{CartLineItem, Order, OrderItem, OrderStatus, PaymentMethod, Product, UserProfile},
    store::{DocumentStore, UpdateBatch, new_key, paths, read_as},
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};
use tracing::{debug, info, instrument, warn};

/// A point in the checkout sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutStep {
    Start,
    FetchCounters,
    ComputeNewCounters,
    WriteOrder,
    ApplyCounterUpdates,
    ClearCartEntries,
    Done,
}

impl fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::FetchCounters => "fetch counters",
            Self::ComputeNewCounters => "compute new counters",
            Self::WriteOrder => "write order",
            Self::ApplyCounterUpdates => "apply counter updates",
            Self::ClearCartEntries => "clear cart entries",
            Self::Done => "done",
        })
    }
}

/// How the writing steps are committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    #[default]
    Atomic,
    Sequential,
}

/// What to do when an order asks for more than is in stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversellPolicy {
    /// Accept the order and floor the stock at zero.
    #[default]
    Clamp,
    /// Refuse the order before anything is written.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutOptions {
    pub shipping_fee: Decimal,
    pub commit: CommitMode,
    pub oversell: OversellPolicy,
}

impl Default for CheckoutOptions {
    fn default() -> Self {
        Self {
            shipping_fee: Decimal::from(80),
            commit: CommitMode::default(),
            oversell: OversellPolicy::default(),
        }
    }
}

/// Counter change computed for one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterUpdate {
    pub product_id: String,
    pub ordered: u32,
    pub stock_before: u32,
    pub stock_after: u32,
    pub sales_before: u32,
    pub sales_after: u32,
}

/// Result of a completed checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutReceipt {
    pub order: Order,
    pub counters: Vec<CounterUpdate>,
    /// Cart lines removed by this checkout.
    pub cleared_lines: Vec<String>,
}

impl CheckoutReceipt {
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.order.total_amount
    }
}

/// Runs the checkout steps for one customer. Each instance runs once; later calls
/// to [`CheckoutSequencer::run`] are refused.
#[derive(Debug)]
pub struct CheckoutSequencer<'a, S> {
    store: &'a S,
    options: &'a CheckoutOptions,
    step: CheckoutStep,
    failed: bool,
}

impl<'a, S: DocumentStore> CheckoutSequencer<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S, options: &'a CheckoutOptions) -> Self {
        Self {
            store,
            options,
            step: CheckoutStep::Start,
            failed: false,
        }
    }

    /// The step reached so far; after a failure, the step that failed.
    #[must_use]
    pub const fn step(&self) -> CheckoutStep {
        self.step
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.failed
    }

    /// Checks out `lines` for `session`'s customer.
    ///
    /// # Errors
    /// - `Error::EmptyCheckout` or `Error::InvalidQuantity` before any store call
    /// - `Error::UserNotFound`, `Error::ProductNotFound`, or `Error::InsufficientStock`
    ///   (reject policy) after reading, with nothing written
    /// - `Error::Checkout` wrapping a store failure, naming the failed step and, in
    ///   sequential mode, the id of an order that was already written
    /// - `Error::CheckoutAlreadyRun` when this sequencer has already run
    #[instrument(skip_all, fields(customer = %session.username, lines = lines.len()))]
    pub async fn run(
        &mut self,
        session: &Session,
        lines: &[CartLineItem],
        payment_method: PaymentMethod,
    ) -> Result<CheckoutReceipt> {
        if self.step != CheckoutStep::Start || self.failed {
            return Err(Error::CheckoutAlreadyRun);
        }
        match self.run_steps(&session.username, lines, payment_method).await {
            Ok(receipt) => {
                self.enter(CheckoutStep::Done);
                info!(
                    "Order {} placed: {} item(s), total {}",
                    receipt.order.id,
                    receipt.order.items.len(),
                    receipt.order.total_amount
                );
                Ok(receipt)
            }
            Err(e) => {
                self.failed = true;
                warn!("Checkout failed during {}: {}", self.step, e);
                Err(e)
            }
        }
    }

    fn enter(&mut self, step: CheckoutStep) {
        debug!("Checkout step: {} -> {}", self.step, step);
        self.step = step;
    }

    fn remote(&self, order_id: Option<&str>, source: Error) -> Error {
        Error::Checkout {
            step: self.step,
            order_id: order_id.map(ToString::to_string),
            source: Box::new(source),
        }
    }

    async fn run_steps(
        &mut self,
        customer: &str,
        lines: &[CartLineItem],
        payment_method: PaymentMethod,
    ) -> Result<CheckoutReceipt> {
        let ordered = validate_lines(customer, lines)?;
        debug!("Checking out {} product(s) in {:?} mode", ordered.len(), self.options.commit);

        self.enter(CheckoutStep::FetchCounters);
        let (profile, products) = self.fetch(customer, &ordered).await?;

        self.enter(CheckoutStep::ComputeNewCounters);
        let counters = compute_counters(&products, &ordered, self.options.oversell)?;

        self.enter(CheckoutStep::WriteOrder);
        let order = build_order(&profile, lines, payment_method, self.options.shipping_fee);
        let cleared_lines: Vec<String> = lines
            .iter()
            .map(|line| line.id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        match self.options.commit {
            CommitMode::Atomic => {
                self.commit_atomic(customer, &order, &counters, &cleared_lines)
                    .await?;
            }
            CommitMode::Sequential => {
                self.commit_sequential(customer, &order, &counters, &cleared_lines)
                    .await?;
            }
        }

        Ok(CheckoutReceipt {
            order,
            counters,
            cleared_lines,
        })
    }

    async fn fetch(
        &self,
        customer: &str,
        ordered: &BTreeMap<String, u32>,
    ) -> Result<(UserProfile, BTreeMap<String, Product>)> {
        let profile: Option<UserProfile> = read_as(self.store, &paths::user(customer)?)
            .await
            .map_err(|e| self.remote(None, e))?;
        let Some(mut profile) = profile else {
            return Err(Error::UserNotFound {
                username: customer.to_string(),
            });
        };
        profile.username = customer.to_string();

        let mut products = BTreeMap::new();
        for product_id in ordered.keys() {
            let product: Option<Product> = read_as(self.store, &paths::product(product_id)?)
                .await
                .map_err(|e| self.remote(None, e))?;
            let product = product.ok_or_else(|| Error::ProductNotFound {
                id: product_id.clone(),
            })?;
            products.insert(product_id.clone(), product.with_id(product_id.clone()));
        }
        Ok((profile, products))
    }

    async fn commit_atomic(
        &mut self,
        customer: &str,
        order: &Order,
        counters: &[CounterUpdate],
        cleared_lines: &[String],
    ) -> Result<()> {
        let mut batch = UpdateBatch::new().set_json(paths::order(&order.id)?, order)?;
        for counter in counters {
            let product = paths::product(&counter.product_id)?;
            batch = batch
                .increment_with_floor(product.child("stock")?, -i64::from(counter.ordered), 0)
                .increment(product.child("sales")?, i64::from(counter.ordered));
        }
        for line_id in cleared_lines {
            batch = batch.remove(paths::cart_item(customer, line_id)?);
        }

        debug!("Committing order {} with {} path updates", order.id, batch.len());
        self.store
            .update(batch)
            .await
            .map_err(|e| self.remote(None, e))?;
        self.enter(CheckoutStep::ApplyCounterUpdates);
        self.enter(CheckoutStep::ClearCartEntries);
        Ok(())
    }

    async fn commit_sequential(
        &mut self,
        customer: &str,
        order: &Order,
        counters: &[CounterUpdate],
        cleared_lines: &[String],
    ) -> Result<()> {
        let order_path = paths::order(&order.id)?;
        self.store
            .write(&order_path, serde_json::to_value(order)?)
            .await
            .map_err(|e| self.remote(None, e))?;

        self.enter(CheckoutStep::ApplyCounterUpdates);
        let mut batch = UpdateBatch::new();
        for counter in counters {
            let product = paths::product(&counter.product_id)?;
            batch = batch
                .set(product.child("stock")?, counter.stock_after.into())
                .set(product.child("sales")?, counter.sales_after.into());
        }
        self.store
            .update(batch)
            .await
            .map_err(|e| self.remote(Some(&order.id), e))?;

        self.enter(CheckoutStep::ClearCartEntries);
        let mut batch = UpdateBatch::new();
        for line_id in cleared_lines {
            batch = batch.remove(paths::cart_item(customer, line_id)?);
        }
        self.store
            .update(batch)
            .await
            .map_err(|e| self.remote(Some(&order.id), e))?;
        Ok(())
    }
}

/// Checks out `lines` for the session's customer.
///
/// # Errors
/// See [`CheckoutSequencer::run`].
pub async fn place_order<S: DocumentStore>(
    store: &S,
    session: &Session,
    lines: &[CartLineItem],
    payment_method: PaymentMethod,
    options: &CheckoutOptions,
) -> Result<CheckoutReceipt> {
    CheckoutSequencer::new(store, options)
        .run(session, lines, payment_method)
        .await
}

/// Rejects empty or malformed selections and sums quantities per product.
fn validate_lines(customer: &str, lines: &[CartLineItem]) -> Result<BTreeMap<String, u32>> {
    if lines.is_empty() {
        return Err(Error::EmptyCheckout);
    }
    paths::user(customer)?;

    let mut ordered: BTreeMap<String, u32> = BTreeMap::new();
    for line in lines {
        if line.quantity < 1 {
            return Err(Error::InvalidQuantity {
                quantity: line.quantity,
            });
        }
        paths::product(&line.product_id)?;
        paths::cart_item(customer, &line.id)?;
        let entry = ordered.entry(line.product_id.clone()).or_default();
        *entry = entry.saturating_add(line.quantity);
    }
    Ok(ordered)
}

fn compute_counters(
    products: &BTreeMap<String, Product>,
    ordered: &BTreeMap<String, u32>,
    oversell: OversellPolicy,
) -> Result<Vec<CounterUpdate>> {
    let mut counters = Vec::with_capacity(ordered.len());
    for (product_id, &quantity) in ordered {
        let product = products.get(product_id).ok_or_else(|| Error::ProductNotFound {
            id: product_id.clone(),
        })?;
        if oversell == OversellPolicy::Reject && quantity > product.stock {
            return Err(Error::InsufficientStock {
                product: product.name.clone(),
                available: product.stock,
                requested: quantity,
            });
        }
        counters.push(CounterUpdate {
            product_id: product_id.clone(),
            ordered: quantity,
            stock_before: product.stock,
            stock_after: product.stock.saturating_sub(quantity),
            sales_before: product.sales,
            sales_after: product.sales.saturating_add(quantity),
        });
    }
    Ok(counters)
}

fn build_order(
    profile: &UserProfile,
    lines: &[CartLineItem],
    payment_method: PaymentMethod,
    shipping_fee: Decimal,
) -> Order {
    let items: Vec<OrderItem> = lines
        .iter()
        .map(|line| {
            let mut item = OrderItem::from(line);
            item.total_amount = line.price * Decimal::from(line.quantity);
            item
        })
        .collect();
    let subtotal: Decimal = items.iter().map(|item| item.total_amount).sum();

    Order {
        id: new_key(),
        customer_username: profile.username.clone(),
        customer_name: profile.display_name(),
        items,
        subtotal,
        shipping_fee,
        total_amount: subtotal + shipping_fee,
        payment_method,
        ordered_at: Utc::now(),
        status: OrderStatus::InTransit,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{
        core::{
            cart::{CartAction, CartState},
            orders,
        },
        models::Product,
        store::{DocPath, SqlDocumentStore, Subscription, read_children},
        test_utils::{
            RecordingStore, create_test_product, create_test_user, customer_session,
            setup_test_store,
        },
    };

    /// Deletes one document right before every multi-path update, as an admin
    /// acting between the counter read and the commit would.
    #[derive(Clone)]
    struct DeleteBeforeUpdate {
        inner: SqlDocumentStore,
        doomed: DocPath,
    }

    impl DocumentStore for DeleteBeforeUpdate {
        async fn read(&self, path: &DocPath) -> Result<Option<serde_json::Value>> {
            self.inner.read(path).await
        }

        async fn write(&self, path: &DocPath, value: serde_json::Value) -> Result<()> {
            self.inner.write(path, value).await
        }

        async fn update(&self, batch: UpdateBatch) -> Result<()> {
            self.inner.remove(&self.doomed).await?;
            self.inner.update(batch).await
        }

        async fn subscribe(&self, path: &DocPath) -> Result<Subscription> {
            self.inner.subscribe(path).await
        }
    }

    fn line(id: &str, product: &Product, quantity: u32) -> CartLineItem {
        let mut line = CartLineItem::for_product(id, product, quantity);
        line.selected = true;
        line
    }

    async fn put_in_cart<S: DocumentStore>(store: &S, customer: &str, line: &CartLineItem) -> Result<()> {
        store
            .write(
                &paths::cart_item(customer, &line.id)?,
                serde_json::to_value(line)?,
            )
            .await
    }

    async fn product_counters(store: &SqlDocumentStore, id: &str) -> Result<(u32, u32)> {
        let product: Product = read_as(store, &paths::product(id)?).await?.unwrap();
        Ok((product.stock, product.sales))
    }

    async fn cart_ids(store: &SqlDocumentStore, customer: &str) -> Result<Vec<String>> {
        let lines: Vec<(String, CartLineItem)> =
            read_children(store, &paths::cart(customer)?).await?;
        Ok(lines.into_iter().map(|(id, _)| id).collect())
    }

    #[tokio::test]
    async fn test_empty_checkout_makes_no_store_calls() -> Result<()> {
        let store = RecordingStore::new(setup_test_store().await?);
        let session = customer_session("rosie");

        for commit in [CommitMode::Atomic, CommitMode::Sequential] {
            let options = CheckoutOptions {
                commit,
                ..CheckoutOptions::default()
            };
            let mut sequencer = CheckoutSequencer::new(&store, &options);
            let result = sequencer.run(&session, &[], PaymentMethod::default()).await;
            assert!(matches!(result, Err(Error::EmptyCheckout)));
            assert!(sequencer.is_failed());
            assert_eq!(sequencer.step(), CheckoutStep::Start);
        }
        assert_eq!(store.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_quantity_line_is_rejected_locally() -> Result<()> {
        let store = RecordingStore::new(setup_test_store().await?);
        let product = create_test_product(store.inner(), "Lily", 10, 5, 0).await?;
        let mut bad = line("l1", &product, 1);
        bad.quantity = 0;

        let result = place_order(
            &store,
            &customer_session("rosie"),
            &[bad],
            PaymentMethod::default(),
            &CheckoutOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidQuantity { quantity: 0 })));
        assert_eq!(store.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_end_to_end_single_product() -> Result<()> {
        for commit in [CommitMode::Atomic, CommitMode::Sequential] {
            let store = setup_test_store().await?;
            create_test_user(&store, "rosie").await?;
            let p = create_test_product(&store, "Red Rose", 15, 10, 5).await?;
            let l = line("l1", &p, 3);
            put_in_cart(&store, "rosie", &l).await?;

            let options = CheckoutOptions {
                commit,
                ..CheckoutOptions::default()
            };
            let receipt = place_order(
                &store,
                &customer_session("rosie"),
                &[l],
                PaymentMethod::CashOnDelivery,
                &options,
            )
            .await?;

            assert_eq!(product_counters(&store, &p.id).await?, (7, 8));
            assert_eq!(receipt.total(), Decimal::from(3 * 15 + 80));
            assert!(cart_ids(&store, "rosie").await?.is_empty());

            let history = orders::orders_for_customer(&store, "rosie").await?;
            assert_eq!(history.len(), 1);
            let order = &history[0];
            assert_eq!(order.id, receipt.order.id);
            assert_eq!(order.items.len(), 1);
            assert_eq!(order.items[0].product_id, p.id);
            assert_eq!(order.items[0].quantity, 3);
            assert_eq!(order.total_amount, Decimal::from(125));
            assert_eq!(order.status, OrderStatus::InTransit);
            assert_eq!(order.customer_name, "Test Customer");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_two_lines_total_includes_shipping() -> Result<()> {
        let store = setup_test_store().await?;
        create_test_user(&store, "rosie").await?;
        let a = create_test_product(&store, "Tulip", 20, 10, 0).await?;
        let b = create_test_product(&store, "Daisy", 20, 10, 0).await?;
        let lines = [line("la", &a, 2), line("lb", &b, 1)];

        let receipt = place_order(
            &store,
            &customer_session("rosie"),
            &lines,
            PaymentMethod::Gcash,
            &CheckoutOptions::default(),
        )
        .await?;
        assert_eq!(receipt.order.subtotal, Decimal::from(60));
        assert_eq!(receipt.order.shipping_fee, Decimal::from(80));
        assert_eq!(receipt.total(), Decimal::from(140));
        assert_eq!(receipt.order.payment_method, PaymentMethod::Gcash);
        Ok(())
    }

    #[tokio::test]
    async fn test_oversell_clamps_stock_at_zero() -> Result<()> {
        for commit in [CommitMode::Atomic, CommitMode::Sequential] {
            let store = setup_test_store().await?;
            create_test_user(&store, "rosie").await?;
            let p = create_test_product(&store, "Orchid", 30, 2, 1).await?;

            let options = CheckoutOptions {
                commit,
                ..CheckoutOptions::default()
            };
            let receipt = place_order(
                &store,
                &customer_session("rosie"),
                &[line("l1", &p, 5)],
                PaymentMethod::default(),
                &options,
            )
            .await?;
            assert_eq!(receipt.counters[0].stock_after, 0);
            assert_eq!(product_counters(&store, &p.id).await?, (0, 6));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_reject_policy_fails_before_writing() -> Result<()> {
        let store = RecordingStore::new(setup_test_store().await?);
        create_test_user(store.inner(), "rosie").await?;
        let p = create_test_product(store.inner(), "Orchid", 30, 2, 1).await?;

        let options = CheckoutOptions {
            oversell: OversellPolicy::Reject,
            ..CheckoutOptions::default()
        };
        let result = place_order(
            &store,
            &customer_session("rosie"),
            &[line("l1", &p, 5)],
            PaymentMethod::default(),
            &options,
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::InsufficientStock {
                available: 2,
                requested: 5,
                ..
            })
        ));
        assert_eq!(store.writes(), 0);
        assert_eq!(product_counters(store.inner(), &p.id).await?, (2, 1));
        Ok(())
    }

    #[tokio::test]
    async fn test_read_failure_writes_nothing() -> Result<()> {
        let store = RecordingStore::new(setup_test_store().await?);
        create_test_user(store.inner(), "rosie").await?;
        let p = create_test_product(store.inner(), "Sunflower", 8, 4, 0).await?;
        store.fail_reads();

        let options = CheckoutOptions::default();
        let mut sequencer = CheckoutSequencer::new(&store, &options);
        let result = sequencer
            .run(&customer_session("rosie"), &[line("l1", &p, 1)], PaymentMethod::default())
            .await;
        assert!(matches!(
            result,
            Err(Error::Checkout {
                step: CheckoutStep::FetchCounters,
                order_id: None,
                ..
            })
        ));
        assert_eq!(sequencer.step(), CheckoutStep::FetchCounters);
        assert_eq!(store.writes(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_product_fails_without_writes() -> Result<()> {
        let store = RecordingStore::new(setup_test_store().await?);
        create_test_user(store.inner(), "rosie").await?;
        let mut ghost = create_test_product(store.inner(), "Ghost", 8, 4, 0).await?;
        ghost.id = "deleted".to_string();

        let result = place_order(
            &store,
            &customer_session("rosie"),
            &[line("l1", &ghost, 1)],
            PaymentMethod::default(),
            &CheckoutOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(Error::ProductNotFound { .. })));
        assert_eq!(store.writes(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_atomic_commit_failure_leaves_no_partial_state() -> Result<()> {
        let store = RecordingStore::new(setup_test_store().await?);
        create_test_user(store.inner(), "rosie").await?;
        let p = create_test_product(store.inner(), "Carnation", 5, 10, 0).await?;
        let l = line("l1", &p, 2);
        put_in_cart(store.inner(), "rosie", &l).await?;
        store.fail_writes_after(0);

        let result = place_order(
            &store,
            &customer_session("rosie"),
            &[l],
            PaymentMethod::default(),
            &CheckoutOptions::default(),
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::Checkout {
                step: CheckoutStep::WriteOrder,
                order_id: None,
                ..
            })
        ));
        assert_eq!(product_counters(store.inner(), &p.id).await?, (10, 0));
        assert_eq!(cart_ids(store.inner(), "rosie").await?, vec!["l1".to_string()]);
        assert!(orders::orders_for_customer(store.inner(), "rosie").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_product_deleted_before_commit_rolls_back() -> Result<()> {
        let inner = setup_test_store().await?;
        create_test_user(&inner, "rosie").await?;
        let p = create_test_product(&inner, "Carnation", 5, 10, 0).await?;
        let l = line("l1", &p, 2);
        put_in_cart(&inner, "rosie", &l).await?;
        let store = DeleteBeforeUpdate {
            inner: inner.clone(),
            doomed: paths::product(&p.id)?,
        };

        let result = place_order(
            &store,
            &customer_session("rosie"),
            &[l],
            PaymentMethod::default(),
            &CheckoutOptions::default(),
        )
        .await
        .unwrap_err();
        let Error::Checkout { order_id, source, .. } = &result else {
            panic!("unexpected error: {result}");
        };
        assert!(order_id.is_none());
        assert!(matches!(**source, Error::MissingParent { .. }));

        assert_eq!(inner.read(&paths::product(&p.id)?).await?, None);
        assert!(orders::orders_for_customer(&inner, "rosie").await?.is_empty());
        assert_eq!(cart_ids(&inner, "rosie").await?, vec!["l1".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_sequencer_refuses_second_run() -> Result<()> {
        let store = RecordingStore::new(setup_test_store().await?);
        create_test_user(store.inner(), "rosie").await?;
        let p = create_test_product(store.inner(), "Tulip", 10, 10, 0).await?;
        let session = customer_session("rosie");
        let options = CheckoutOptions::default();

        let mut sequencer = CheckoutSequencer::new(&store, &options);
        sequencer
            .run(&session, &[line("l1", &p, 1)], PaymentMethod::default())
            .await?;
        assert_eq!(sequencer.step(), CheckoutStep::Done);

        store.reset_counts();
        let again = sequencer
            .run(&session, &[line("l1", &p, 1)], PaymentMethod::default())
            .await;
        assert!(matches!(again, Err(Error::CheckoutAlreadyRun)));
        assert_eq!(sequencer.step(), CheckoutStep::Done);
        assert!(!sequencer.is_failed());

        let mut failed = CheckoutSequencer::new(&store, &options);
        assert!(failed.run(&session, &[], PaymentMethod::default()).await.is_err());
        let retry = failed
            .run(&session, &[line("l1", &p, 1)], PaymentMethod::default())
            .await;
        assert!(matches!(retry, Err(Error::CheckoutAlreadyRun)));
        assert_eq!(store.calls(), 0);
        assert_eq!(product_counters(store.inner(), &p.id).await?, (9, 1));
        Ok(())
    }

    #[tokio::test]
    async fn test_sequential_failure_reports_recorded_order() -> Result<()> {
        let store = RecordingStore::new(setup_test_store().await?);
        create_test_user(store.inner(), "rosie").await?;
        let p = create_test_product(store.inner(), "Carnation", 5, 10, 0).await?;
        let l = line("l1", &p, 2);
        put_in_cart(store.inner(), "rosie", &l).await?;
        store.fail_writes_after(1);

        let options = CheckoutOptions {
            commit: CommitMode::Sequential,
            ..CheckoutOptions::default()
        };
        let err = place_order(
            &store,
            &customer_session("rosie"),
            &[l],
            PaymentMethod::default(),
            &options,
        )
        .await
        .unwrap_err();

        let Error::Checkout { step, order_id, .. } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(*step, CheckoutStep::ApplyCounterUpdates);
        let history = orders::orders_for_customer(store.inner(), "rosie").await?;
        assert_eq!(history.len(), 1);
        assert_eq!(order_id.as_deref(), Some(history[0].id.as_str()));
        assert_eq!(product_counters(store.inner(), &p.id).await?, (10, 0));
        assert!(err.user_message().contains("recorded"));
        Ok(())
    }

    #[tokio::test]
    async fn test_only_checked_out_lines_are_cleared() -> Result<()> {
        let store = setup_test_store().await?;
        create_test_user(&store, "rosie").await?;
        let a = create_test_product(&store, "Tulip", 10, 10, 0).await?;
        let b = create_test_product(&store, "Lily", 12, 10, 0).await?;
        let la = line("la", &a, 1);
        let mut lb = line("lb", &b, 1);
        lb.selected = false;
        put_in_cart(&store, "rosie", &la).await?;
        put_in_cart(&store, "rosie", &lb).await?;

        let receipt = place_order(
            &store,
            &customer_session("rosie"),
            &[la],
            PaymentMethod::default(),
            &CheckoutOptions::default(),
        )
        .await?;
        assert_eq!(receipt.cleared_lines, vec!["la".to_string()]);
        assert_eq!(cart_ids(&store, "rosie").await?, vec!["lb".to_string()]);
        assert_eq!(product_counters(&store, &b.id).await?, (10, 0));
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_atomic_checkouts_keep_every_sale() -> Result<()> {
        let store = setup_test_store().await?;
        let p = create_test_product(&store, "Rose", 10, 100, 0).await?;
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let p = p.clone();
            handles.push(tokio::spawn(async move {
                let customer = format!("buyer{i}");
                create_test_user(&store, &customer).await?;
                place_order(
                    &store,
                    &customer_session(&customer),
                    &[line("l1", &p, 2)],
                    PaymentMethod::default(),
                    &CheckoutOptions::default(),
                )
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap()?;
        }
        assert_eq!(product_counters(&store, &p.id).await?, (84, 16));
        Ok(())
    }

    #[tokio::test]
    async fn test_reducer_selection_feeds_checkout() -> Result<()> {
        let store = setup_test_store().await?;
        create_test_user(&store, "rosie").await?;
        let a = create_test_product(&store, "Tulip", 10, 10, 0).await?;
        let b = create_test_product(&store, "Lily", 20, 10, 0).await?;

        let mut cart = CartState::new();
        for (product, quantity) in [(&a, 2), (&b, 1)] {
            cart.dispatch(CartAction::Add {
                product: product.clone(),
                quantity,
            })?;
            put_in_cart(&store, "rosie", cart.line(&product.id).unwrap()).await?;
        }
        cart.dispatch(CartAction::ToggleSelection {
            line_id: a.id.clone(),
        })?;

        let selected = cart.selected_items();
        let receipt = place_order(
            &store,
            &customer_session("rosie"),
            &selected,
            PaymentMethod::default(),
            &CheckoutOptions::default(),
        )
        .await?;
        assert_eq!(receipt.order.subtotal, cart.total());
        cart.dispatch(CartAction::RemoveLines {
            line_ids: receipt.cleared_lines,
        })?;
        assert_eq!(cart.len(), 1);
        assert_eq!(cart_ids(&store, "rosie").await?, vec![b.id.clone()]);
        Ok(())
    }
}
