// src/main.rs
use anyhow::Result;
use log::{error, info, warn};
use std::{path::Path, time::Instant};

use geodedupe::config::Config;
use geodedupe::db;
use geodedupe::models::{EntityKind, RunStatus};
use geodedupe::pipeline::{self, AppContext};
use geodedupe::results;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    info!("Starting geographic reference deduplication pipeline");
    let start_time = Instant::now();

    // Try to load .env file if it exists
    let env_paths = [".env", ".env.local", "../.env"];
    let mut loaded_env = false;

    for path in env_paths.iter() {
        if Path::new(path).exists() {
            if let Err(e) = db::load_env_from_file(path) {
                warn!("Failed to load environment from {}: {}", path, e);
            } else {
                info!("Loaded environment variables from {}", path);
                loaded_env = true;
                break;
            }
        }
    }

    if !loaded_env {
        info!("No .env file found, using environment variables from system");
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    let context = AppContext::initialize(config).await?;
    info!("Successfully connected to the database");

    // Kinds run parents-first so child enrichment sees canonical parents.
    let outcomes = pipeline::run_detection(&context, &EntityKind::ALL).await;

    let mut total_pairs = 0usize;
    let mut total_groups = 0usize;
    let mut total_discarded = 0usize;
    let mut total_enriched = 0usize;
    let mut failed_kinds = 0usize;

    for (kind, outcome) in &outcomes {
        match outcome {
            Ok(stats) => {
                total_pairs += stats.pairs_analyzed;
                total_groups += stats.groups_created;
                total_discarded += stats.llm_discarded;
                total_enriched += stats.enriched;
            }
            Err(_) => {
                failed_kinds += 1;
                warn!("Kind {} ended in error; see run log", kind.as_str());
            }
        }
    }

    info!(
        "Pipeline completed in {:.2?}. Analyzed: {} pairs, created {} groups ({} LLM-discarded, {} enriched), {} kind(s) failed",
        start_time.elapsed(),
        total_pairs,
        total_groups,
        total_discarded,
        total_enriched,
        failed_kinds
    );

    let history = results::recent_runs(&context.pool, 20).await?;
    let errored = history
        .iter()
        .filter(|run| run.status == RunStatus::Errored)
        .count();
    info!(
        "Run history: {} of the last {} passes ended in error",
        errored,
        history.len()
    );

    Ok(())
}
