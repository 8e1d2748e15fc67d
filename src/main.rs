use bud_of_roses::{
    config::{
        database::{create_connection, create_tables},
        storefront::load_default_config,
    },
    core::{
        catalog::seed_catalog,
        report::{format_report, inventory_report},
    },
    errors::Result,
    store::SqlDocumentStore,
};
use dotenvy::dotenv;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file, env vars can also be set externally
    dotenv().ok();
    info!("Attempted to load .env file.");

    // 3. Load the storefront configuration
    let config = load_default_config()
        .inspect_err(|e| error!("Critical error loading storefront configuration: {}", e))?;
    let checkout = config.checkout_options();
    info!(
        "Loaded storefront configuration ({} seed products, {} admins, {:?} checkout).",
        config.products.len(),
        config.all_admins().len(),
        checkout.commit
    );

    // 4. Connect to the database and make sure the document table exists
    let db = create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    create_tables(&db)
        .await
        .inspect(|()| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;
    let store = SqlDocumentStore::new(db);

    // 5. Seed the catalog when the store is empty
    seed_catalog(&store, &config.products)
        .await
        .inspect(|count| info!("Seeded {} products.", count))
        .inspect_err(|e| error!("Failed to seed catalog: {}", e))?;

    // 6. Report the current state of the shop
    let report = inventory_report(&store, config.low_stock_threshold)
        .await
        .inspect_err(|e| error!("Failed to build inventory report: {}", e))?;
    info!("{}", format_report(&report));

    Ok(())
}
