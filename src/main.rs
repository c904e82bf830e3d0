//! event_store - schema and inspection tool
//!
//! Usage:
//!   event_store migrate                 create tables and indexes (default)
//!   event_store check                   verify the schema exists
//!   event_store tail [--from N] [--to M] print events in global order as JSON lines

use std::sync::Arc;

use event_store::{db, logging, Config, EventStore, EventStoreMetrics};

/// Read the numeric value following `flag`, if present
fn flag_value(args: &[String], flag: &str) -> anyhow::Result<Option<i64>> {
    match args.iter().position(|a| a == flag) {
        Some(i) => {
            let raw = args
                .get(i + 1)
                .ok_or_else(|| anyhow::anyhow!("Missing value for {}", flag))?;
            Ok(Some(raw.parse()?))
        }
        None => Ok(None),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    logging::init_tracing(config.log_format);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("migrate");

    tracing::info!("Connecting to database...");
    let pool = db::connect(&config).await?;
    db::verify_connection(&pool).await?;

    match command {
        "migrate" => {
            db::migrate(&pool).await?;
        }
        "check" => {
            if !db::check_schema(&pool).await? {
                tracing::error!("Event store schema is not complete. Run `event_store migrate`.");
                return Err(anyhow::anyhow!("Event store schema incomplete"));
            }
            tracing::info!("Event store schema verified");
        }
        "tail" => {
            let from = flag_value(&args, "--from")?;
            let to = flag_value(&args, "--to")?;

            let store = EventStore::new(
                pool.clone(),
                config.event_store_config(),
                Arc::new(EventStoreMetrics::new()?),
            );

            for event in store.get_all_events(from, to).await? {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
        other => {
            return Err(anyhow::anyhow!(
                "Unknown command '{}' (expected migrate, check or tail)",
                other
            ));
        }
    }

    pool.close().await;
    Ok(())
}
