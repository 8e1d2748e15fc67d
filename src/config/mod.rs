/// Database configuration and connection management
pub mod database;

/// Storefront settings and catalog seeds loaded from config.toml
pub mod storefront;

/// Administrator accounts configured through environment variables
pub mod users;
