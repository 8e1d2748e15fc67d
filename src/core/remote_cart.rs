//! Store-backed cart.
//!
//! Line items live in the store under `users/{username}/cart/{lineItemId}` and a
//! [`RemoteCart`] keeps a local mirror of them, refreshed from a change subscription.
//! Mutations are computed from what the store holds, not from the mirror, and the
//! mirror only changes once a write has succeeded. Which lines are selected for
//! checkout is tracked locally and survives refreshes.

use crate::{
    core::{
        accounts::Session,
        cart,
        checkout::{self, CheckoutOptions, CheckoutReceipt},
    },
    errors::{Error, Result},
    models::{CartLineItem, PaymentMethod, Product},
    store::{DocPath, DocumentStore, Subscription, UpdateBatch, children_of, new_key, paths, read_as, read_children},
};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, instrument};

/// A customer's cart mirrored from the store.
#[derive(Debug)]
pub struct RemoteCart<S: DocumentStore> {
    store: S,
    username: String,
    path: DocPath,
    items: Vec<CartLineItem>,
    selected: HashSet<String>,
    subscription: Subscription,
}

impl<S: DocumentStore> RemoteCart<S> {
    /// Subscribes to `username`'s cart and loads its current contents.
    ///
    /// # Errors
    /// Returns `Error::InvalidPath` for an unusable username, or the store error
    /// raised while subscribing.
    #[instrument(skip(store))]
    pub async fn open(store: S, username: &str) -> Result<Self> {
        let path = paths::cart(username)?;
        let mut subscription = store.subscribe(&path).await?;
        let initial = subscription.next().await?;
        let mut cart = Self {
            store,
            username: username.to_string(),
            path,
            items: Vec::new(),
            selected: HashSet::new(),
            subscription,
        };
        cart.apply(initial);
        debug!("Opened cart with {} line(s)", cart.items.len());
        Ok(cart)
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Mirrored line items, oldest first.
    #[must_use]
    pub fn items(&self) -> &[CartLineItem] {
        &self.items
    }

    #[must_use]
    pub fn line(&self, line_id: &str) -> Option<&CartLineItem> {
        self.items.iter().find(|line| line.id == line_id)
    }

    #[must_use]
    pub fn selected_items(&self) -> Vec<CartLineItem> {
        self.items.iter().filter(|l| l.selected).cloned().collect()
    }

    /// Total of the selected lines.
    #[must_use]
    pub fn total(&self) -> Decimal {
        cart::compute_total(&self.items)
    }

    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        cart::subtotal(&self.items)
    }

    /// Adds `quantity` of `product`. An existing line for the same product grows,
    /// keeping its original unit price; otherwise a new line is stored.
    ///
    /// # Errors
    /// Returns `Error::InvalidQuantity` for zero, before any store call, or the store
    /// error if reading or writing fails. The mirror is unchanged on error.
    #[instrument(skip_all, fields(product_id = %product.id, quantity = quantity))]
    pub async fn add_item(&mut self, product: &Product, quantity: u32) -> Result<CartLineItem> {
        if quantity < 1 {
            return Err(Error::InvalidQuantity { quantity });
        }
        let stored: Vec<(String, CartLineItem)> = read_children(&self.store, &self.path).await?;
        let line = match stored.into_iter().find(|(_, l)| l.product_id == product.id) {
            Some((id, existing)) => {
                let mut line = existing.with_id(id);
                line.set_quantity(line.quantity.saturating_add(quantity));
                line
            }
            None => CartLineItem::for_product(new_key(), product, quantity),
        };

        self.store
            .write(&self.path.child(&line.id)?, serde_json::to_value(&line)?)
            .await?;
        debug!(
            "Cart line {} for {} now has quantity {}",
            line.id, self.username, line.quantity
        );
        self.upsert_local(line.clone());
        Ok(line)
    }

    /// Removes a line. Removing a line that is not there succeeds.
    pub async fn remove_item(&mut self, line_id: &str) -> Result<()> {
        self.store.remove(&self.path.child(line_id)?).await?;
        self.items.retain(|line| line.id != line_id);
        self.selected.remove(line_id);
        Ok(())
    }

    /// Sets a line's quantity, recomputing its total from the stored unit price.
    /// A quantity below one removes the line; an unknown line is left alone.
    pub async fn set_quantity(&mut self, line_id: &str, quantity: u32) -> Result<Option<CartLineItem>> {
        if quantity < 1 {
            self.remove_item(line_id).await?;
            return Ok(None);
        }
        let line_path = self.path.child(line_id)?;
        let stored: Option<CartLineItem> = read_as(&self.store, &line_path).await?;
        let Some(line) = stored else {
            return Ok(None);
        };
        let mut line = line.with_id(line_id);
        line.set_quantity(quantity);

        let batch = UpdateBatch::new()
            .set(line_path.child("quantity")?, Value::from(quantity))
            .set_json(line_path.child("totalAmount")?, &line.total_amount)?;
        self.store.update(batch).await?;
        self.upsert_local(line.clone());
        Ok(Some(line))
    }

    /// Flips the selection of one line. Unknown lines are ignored.
    pub fn toggle_selection(&mut self, line_id: &str) {
        if let Some(line) = self.items.iter_mut().find(|line| line.id == line_id) {
            line.selected = !line.selected;
            if line.selected {
                self.selected.insert(line.id.clone());
            } else {
                self.selected.remove(line_id);
            }
        }
    }

    pub fn select_all(&mut self, selected: bool) {
        self.selected.clear();
        for line in &mut self.items {
            line.selected = selected;
            if selected {
                self.selected.insert(line.id.clone());
            }
        }
    }

    /// Waits for the next change notification and applies it to the mirror.
    ///
    /// # Errors
    /// Returns the store error carried by the notification, or
    /// `Error::SubscriptionClosed` if the store went away.
    pub async fn sync(&mut self) -> Result<()> {
        let snapshot = self.subscription.next().await?;
        self.apply(snapshot);
        Ok(())
    }

    /// Applies every notification already queued without waiting. Returns how many
    /// were applied.
    pub fn try_sync(&mut self) -> Result<usize> {
        let mut applied = 0;
        while let Some(snapshot) = self.subscription.try_next() {
            self.apply(snapshot?);
            applied += 1;
        }
        Ok(applied)
    }

    /// Checks out the selected lines and drops them from the mirror.
    ///
    /// The lines are re-read from the store first, so quantities changed on another
    /// device are honored and lines removed elsewhere are skipped.
    ///
    /// # Errors
    /// See [`checkout::CheckoutSequencer::run`]. The mirror is unchanged on error.
    pub async fn checkout(
        &mut self,
        session: &Session,
        payment_method: PaymentMethod,
        options: &CheckoutOptions,
    ) -> Result<CheckoutReceipt> {
        if session.username != self.username {
            return Err(Error::Forbidden);
        }
        let stored: Vec<(String, CartLineItem)> = read_children(&self.store, &self.path).await?;
        let mut selected: Vec<CartLineItem> = stored
            .into_iter()
            .filter(|(id, _)| self.selected.contains(id))
            .map(|(id, line)| {
                let mut line = line.with_id(id);
                line.selected = true;
                line
            })
            .collect();
        selected.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.id.cmp(&b.id)));
        let receipt =
            checkout::place_order(&self.store, session, &selected, payment_method, options).await?;
        self.items
            .retain(|line| !receipt.cleared_lines.contains(&line.id));
        for id in &receipt.cleared_lines {
            self.selected.remove(id);
        }
        Ok(receipt)
    }

    fn upsert_local(&mut self, mut line: CartLineItem) {
        line.selected = self.selected.contains(&line.id);
        match self.items.iter_mut().find(|l| l.id == line.id) {
            Some(existing) => *existing = line,
            None => self.items.push(line),
        }
    }

    fn apply(&mut self, snapshot: Option<Value>) {
        let mut items: Vec<CartLineItem> = children_of(&self.path, snapshot)
            .into_iter()
            .map(|(id, line): (String, CartLineItem)| line.with_id(id))
            .collect();
        items.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.id.cmp(&b.id)));

        self.selected
            .retain(|id| items.iter().any(|line| &line.id == id));
        for line in &mut items {
            line.selected = self.selected.contains(&line.id);
        }
        self.items = items;
    }
}
