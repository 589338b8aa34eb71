// src/bin/enrich_pending.rs
use anyhow::Result;
use log::{error, info, warn};
use std::{path::Path, time::Instant};

use geodedupe::config::Config;
use geodedupe::db;
use geodedupe::enrich;
use geodedupe::pipeline::AppContext;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    info!("Starting re-enrichment of pending groups");
    let start_time = Instant::now();

    // Try to load .env file if it exists
    let env_paths = [".env", ".env.local", "../.env"];
    for path in env_paths.iter() {
        if Path::new(path).exists() {
            if let Err(e) = db::load_env_from_file(path) {
                warn!("Failed to load environment from {}: {}", path, e);
            } else {
                info!("Loaded environment variables from {}", path);
                break;
            }
        }
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    let context = AppContext::initialize(config).await?;
    let enriched = enrich::enrich_pending(&context.pool, &context.resolvers, &context.config).await?;

    info!(
        "Re-enrichment finished in {:.2?}: {} groups gained a canonical name",
        start_time.elapsed(),
        enriched
    );
    Ok(())
}
