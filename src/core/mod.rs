/// Customer accounts, sessions, and credentials
pub mod accounts;

/// In-memory cart reducer and cart totals
pub mod cart;

/// Product administration, browsing, and catalog seeding
pub mod catalog;

/// Checkout sequencer turning cart lines into orders
pub mod checkout;

/// Order history and status transitions
pub mod orders;

/// Store-backed cart mirrored through a change subscription
pub mod remote_cart;

/// Inventory and sales reporting
pub mod report;
