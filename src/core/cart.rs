//! In-memory cart reducer.
//!
//! [`CartState`] holds a customer's line items in process memory and changes only by
//! applying [`CartAction`]s. Lines are keyed by product id, so adding a product that
//! is already in the cart grows the existing line instead of creating a second one.
//! Totals are recomputed from the unit price stored on the line, which is frozen at
//! the moment the product was first added.

use crate::{
    errors::{Error, Result},
    models::{CartLineItem, Product},
};
use rust_decimal::Decimal;

/// A change to apply to a [`CartState`].
#[derive(Debug, Clone, PartialEq)]
pub enum CartAction {
    /// Add `quantity` of `product`, merging into an existing line for the same product.
    Add { product: Product, quantity: u32 },
    /// Remove a line. Removing a missing line does nothing.
    Remove { line_id: String },
    /// Set a line's quantity; anything below 1 removes the line.
    SetQuantity { line_id: String, quantity: u32 },
    /// Flip whether a line takes part in the next checkout.
    ToggleSelection { line_id: String },
    /// Select or deselect every line.
    SelectAll(bool),
    /// Drop the given lines, typically after they were checked out.
    RemoveLines { line_ids: Vec<String> },
    Clear,
}

/// Reducer-driven cart. Line order is insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CartState {
    items: Vec<CartLineItem>,
}

impl CartState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `action` in place.
    ///
    /// # Errors
    /// Returns `Error::InvalidQuantity` when adding fewer than one unit. The cart is
    /// left unchanged in that case.
    pub fn dispatch(&mut self, action: CartAction) -> Result<()> {
        match action {
            CartAction::Add { product, quantity } => self.add(&product, quantity)?,
            CartAction::Remove { line_id } => self.items.retain(|line| line.id != line_id),
            CartAction::SetQuantity { line_id, quantity } => {
                if quantity < 1 {
                    self.items.retain(|line| line.id != line_id);
                } else if let Some(line) = self.line_mut(&line_id) {
                    line.set_quantity(quantity);
                }
            }
            CartAction::ToggleSelection { line_id } => {
                if let Some(line) = self.line_mut(&line_id) {
                    line.selected = !line.selected;
                }
            }
            CartAction::SelectAll(selected) => {
                for line in &mut self.items {
                    line.selected = selected;
                }
            }
            CartAction::RemoveLines { line_ids } => {
                self.items.retain(|line| !line_ids.contains(&line.id));
            }
            CartAction::Clear => self.items.clear(),
        }
        Ok(())
    }

    /// Consuming form of [`CartState::dispatch`].
    pub fn reduce(mut self, action: CartAction) -> Result<Self> {
        self.dispatch(action)?;
        Ok(self)
    }

    fn add(&mut self, product: &Product, quantity: u32) -> Result<()> {
        if quantity < 1 {
            return Err(Error::InvalidQuantity { quantity });
        }
        match self.line_mut(&product.id) {
            Some(line) => line.set_quantity(line.quantity.saturating_add(quantity)),
            None => self
                .items
                .push(CartLineItem::for_product(product.id.clone(), product, quantity)),
        }
        Ok(())
    }

    fn line_mut(&mut self, line_id: &str) -> Option<&mut CartLineItem> {
        self.items.iter_mut().find(|line| line.id == line_id)
    }

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

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total of the selected lines.
    #[must_use]
    pub fn total(&self) -> Decimal {
        compute_total(&self.items)
    }

    /// Total of every line, selected or not.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        subtotal(&self.items)
    }
}

/// Sums `total_amount` over the selected lines. Zero for an empty slice.
#[must_use]
pub fn compute_total(items: &[CartLineItem]) -> Decimal {
    items
        .iter()
        .filter(|line| line.selected)
        .map(|line| line.total_amount)
        .sum()
}

/// Sums `total_amount` over all lines.
#[must_use]
pub fn subtotal(items: &[CartLineItem]) -> Decimal {
    items.iter().map(|line| line.total_amount).sum()
}
