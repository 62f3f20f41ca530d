use storefront_ledger::infra::config::Config;
use storefront_ledger::infra::logging::init_logging;
use storefront_ledger::storage::{PostgresStore, Store};

fn usage_and_exit() -> ! {
    eprintln!(
        "Usage: cargo run --bin preflight\n\
         \n\
         Requires env vars:\n\
           DATABASE_URL\n\
         Optional:\n\
           BIND_ADDR, DB_MAX_CONNECTIONS, CORS_ORIGIN, PROVIDER_TIMEOUT_SECS,\n\
           PAYMENT_PROVIDERS (name=url,...), WEBHOOK_SECRET\n"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        usage_and_exit();
    }

    let config = Config::from_env()?;

    println!("> Preflight:");
    println!("  BIND_ADDR={}", config.bind_addr);
    println!("  DB_MAX_CONNECTIONS={}", config.max_connections);
    println!("  CORS_ORIGIN={}", config.cors_origin);
    println!("  PROVIDER_TIMEOUT_SECS={}", config.provider_timeout.as_secs());
    let mut providers: Vec<_> = config.payment_providers.iter().collect();
    providers.sort();
    if providers.is_empty() {
        eprintln!("  Warning: no PAYMENT_PROVIDERS configured; payment intents will be rejected.");
    }
    for (name, url) in providers {
        println!("  provider {} -> {}", name, url);
    }
    println!(
        "  WEBHOOK_SECRET={}",
        if config.webhook_secret.is_some() { "set" } else { "unset (signatures not checked)" }
    );

    let store = PostgresStore::connect(&config.database_url, config.max_connections).await?;
    store
        .ping()
        .await
        .map_err(|e| anyhow::anyhow!("Database not reachable: {}", e))?;
    println!("  Database reachable.");

    store
        .init_schema()
        .await
        .map_err(|e| anyhow::anyhow!("Schema initialisation failed: {}", e))?;
    println!("  Schema initialised (tables present).");

    let products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(store.pool())
        .await?;
    println!("  Catalog products: {}", products);
    if products == 0 {
        eprintln!("  Warning: products table is empty; nothing can be purchased or downloaded.");
    }

    println!("> Preflight OK.");
    Ok(())
}
