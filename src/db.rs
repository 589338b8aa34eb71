// src/db.rs

use anyhow::{Context, Result};
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use log::{debug, info, warn};
use std::time::Duration;
use tokio_postgres::{Config as PgConfig, NoTls};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

/// Initializes the database connection pool from the host DSN.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let mut config: PgConfig = database_url
        .parse()
        .context("Failed to parse DATABASE_URL")?;
    config.application_name("geodedupe");
    config.connect_timeout(Duration::from_secs(10));

    info!("Connecting to PostgreSQL database...");
    let manager = PostgresConnectionManager::new(config, NoTls);

    let pool = Pool::builder()
        .max_size(20)
        .min_idle(Some(2))
        .idle_timeout(Some(Duration::from_secs(90)))
        .connection_timeout(Duration::from_secs(15))
        .build(manager)
        .await
        .context("Failed to build database connection pool")?;

    info!("Testing database connection...");
    {
        let conn = pool
            .get()
            .await
            .context("Failed to get initial test connection from pool")?;

        let row = conn
            .query_one("SELECT 1", &[])
            .await
            .context("Test query 'SELECT 1' failed")?;

        let result: i32 = row.get(0);
        if result != 1 {
            return Err(anyhow::anyhow!(
                "Database connection test failed: unexpected result from SELECT 1"
            ));
        }
        info!("Database connection test successful");
    }

    Ok(pool)
}

/// Loads environment variables from a `.env`-style file without
/// overriding anything already set in the process environment.
pub fn load_env_from_file(file_path: &str) -> Result<()> {
    use std::fs::File;
    use std::io::{BufRead, BufReader};

    info!("Loading environment variables from file: {}", file_path);
    let file = File::open(file_path).context(format!("Failed to open env file: {}", file_path))?;
    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line = line.context("Failed to read line from env file")?;
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        if let Some(idx) = line.find('=') {
            let key = line[..idx].trim();
            let value = line[idx + 1..].trim();
            if std::env::var(key).is_err() {
                debug!("Setting env var from file: {}", key);
                std::env::set_var(key, value);
            } else {
                debug!("Env var already set, skipping: {}", key);
            }
        }
    }
    Ok(())
}

const PIPELINE_DDL: &str = "
    CREATE TABLE IF NOT EXISTS dedup_duplicate_group (
        id TEXT PRIMARY KEY,
        entity_kind TEXT NOT NULL,
        parent_id TEXT,
        normalized_name TEXT NOT NULL,
        member_ids TEXT[] NOT NULL,
        member_names TEXT[] NOT NULL,
        mean_score DOUBLE PRECISION NOT NULL,
        source TEXT NOT NULL,
        llm_details JSONB,
        canonical_name TEXT,
        canonical_source TEXT,
        canonical_address TEXT,
        suggested_canonical_id TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        chosen_canonical_id TEXT,
        chosen_name TEXT,
        executed_at TIMESTAMP,
        executed_by TEXT,
        reverted_at TIMESTAMP,
        decision_context JSONB,
        created_at TIMESTAMP NOT NULL,
        total_fks_redirected BIGINT
    );

    CREATE INDEX IF NOT EXISTS idx_dedup_group_kind_status
        ON dedup_duplicate_group (entity_kind, status);
    CREATE INDEX IF NOT EXISTS idx_dedup_group_normalized_name
        ON dedup_duplicate_group (normalized_name);

    CREATE TABLE IF NOT EXISTS dedup_member_context (
        id TEXT PRIMARY KEY,
        group_id TEXT NOT NULL
            REFERENCES dedup_duplicate_group (id) ON DELETE CASCADE,
        member_id TEXT NOT NULL,
        member_name TEXT NOT NULL,
        state_code TEXT,
        city_id TEXT,
        city_name TEXT,
        neighborhood_id TEXT,
        neighborhood_name TEXT,
        street_id TEXT,
        street_name TEXT,
        postal_codes TEXT[] NOT NULL DEFAULT '{}',
        child_count BIGINT NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_dedup_member_context_group
        ON dedup_member_context (group_id);

    CREATE TABLE IF NOT EXISTS dedup_merge_log (
        id TEXT PRIMARY KEY,
        group_id TEXT NOT NULL
            REFERENCES dedup_duplicate_group (id) ON DELETE CASCADE,
        absorbed_member_id TEXT NOT NULL,
        table_name TEXT NOT NULL,
        column_name TEXT NOT NULL,
        affected_row_pk TEXT NOT NULL,
        old_value TEXT NOT NULL,
        new_value TEXT NOT NULL,
        reverted BOOLEAN NOT NULL DEFAULT FALSE,
        reverted_at TIMESTAMP,
        executed_at TIMESTAMP NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_dedup_merge_log_group
        ON dedup_merge_log (group_id, reverted);

    CREATE TABLE IF NOT EXISTS dedup_run_log (
        id TEXT PRIMARY KEY,
        entity_kind TEXT NOT NULL,
        started_at TIMESTAMP NOT NULL,
        ended_at TIMESTAMP,
        status TEXT NOT NULL,
        total_analyzed BIGINT NOT NULL DEFAULT 0,
        total_groups BIGINT NOT NULL DEFAULT 0,
        error_text TEXT
    );
";

/// Creates the pipeline-owned tables (prefixed `dedup_`) and the trigram
/// extensions the detector depends on. Host tables are never touched.
pub async fn init_pipeline_tables(pool: &PgPool) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for pipeline DDL")?;

    // Extensions need elevated privileges on some hosts; the detector
    // queries fail loudly later if they are genuinely missing.
    for extension in ["pg_trgm", "unaccent"] {
        let ddl = format!("CREATE EXTENSION IF NOT EXISTS {}", extension);
        if let Err(e) = conn.batch_execute(&ddl).await {
            warn!(
                "Could not ensure extension {} (continuing): {}",
                extension, e
            );
        }
    }

    conn.batch_execute(PIPELINE_DDL)
        .await
        .context("Failed to create pipeline tables")?;

    info!("Pipeline tables ready");
    Ok(())
}
