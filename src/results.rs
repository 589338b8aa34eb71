// src/results.rs

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDateTime, Utc};
use uuid::Uuid;

use crate::db::PgPool;
use crate::models::{EntityKind, RunStatus};

/// Statistics for one entity-kind detection pass.
#[derive(Debug, Clone)]
pub struct KindPassStats {
    pub kind: EntityKind,
    /// Similar pairs returned by the scoped trigram query.
    pub pairs_analyzed: usize,
    pub groups_created: usize,
    /// Groups the validator rejected outright.
    pub llm_discarded: usize,
    /// Groups that gained a canonical name during inline enrichment.
    pub enriched: usize,
}

impl KindPassStats {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            pairs_analyzed: 0,
            groups_created: 0,
            llm_discarded: 0,
            enriched: 0,
        }
    }
}

/// One persisted detection-run record.
#[derive(Debug, Clone)]
pub struct RunLog {
    pub id: String,
    pub entity_kind: EntityKind,
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
    pub status: RunStatus,
    pub total_analyzed: i64,
    pub total_groups: i64,
    pub error_text: Option<String>,
}

/// Opens a run-log row in Started state and returns its id.
pub async fn start_run(pool: &PgPool, kind: EntityKind) -> Result<String> {
    let conn = pool
        .get()
        .await
        .context("RunLog: failed to get DB connection")?;

    let run_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO dedup_run_log (id, entity_kind, started_at, status)
         VALUES ($1, $2, $3, $4)",
        &[
            &run_id,
            &kind.as_str(),
            &Utc::now().naive_utc(),
            &RunStatus::Started.as_str(),
        ],
    )
    .await
    .context("RunLog: failed to insert run record")?;

    Ok(run_id)
}

pub async fn complete_run(
    pool: &PgPool,
    run_id: &str,
    total_analyzed: i64,
    total_groups: i64,
) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("RunLog: failed to get DB connection")?;

    conn.execute(
        "UPDATE dedup_run_log
         SET ended_at = $2, status = $3, total_analyzed = $4, total_groups = $5
         WHERE id = $1",
        &[
            &run_id,
            &Utc::now().naive_utc(),
            &RunStatus::Completed.as_str(),
            &total_analyzed,
            &total_groups,
        ],
    )
    .await
    .context("RunLog: failed to complete run record")?;
    Ok(())
}

pub async fn fail_run(pool: &PgPool, run_id: &str, error_text: &str) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("RunLog: failed to get DB connection")?;

    conn.execute(
        "UPDATE dedup_run_log
         SET ended_at = $2, status = $3, error_text = $4
         WHERE id = $1",
        &[
            &run_id,
            &Utc::now().naive_utc(),
            &RunStatus::Errored.as_str(),
            &error_text,
        ],
    )
    .await
    .context("RunLog: failed to mark run errored")?;
    Ok(())
}

/// Most recent runs, newest first.
pub async fn recent_runs(pool: &PgPool, limit: i64) -> Result<Vec<RunLog>> {
    let conn = pool
        .get()
        .await
        .context("RunLog: failed to get DB connection")?;

    let rows = conn
        .query(
            "SELECT id, entity_kind, started_at, ended_at, status,
                    total_analyzed, total_groups, error_text
             FROM dedup_run_log
             ORDER BY started_at DESC
             LIMIT $1",
            &[&limit],
        )
        .await
        .context("RunLog: failed to list runs")?;

    rows.iter()
        .map(|row| {
            let kind_raw: String = row.get("entity_kind");
            let status_raw: String = row.get("status");
            Ok(RunLog {
                id: row.get("id"),
                entity_kind: EntityKind::from_str(&kind_raw)
                    .ok_or_else(|| anyhow!("Unknown entity kind in run log: {}", kind_raw))?,
                started_at: row.get("started_at"),
                ended_at: row.get("ended_at"),
                status: RunStatus::from_str(&status_raw)
                    .ok_or_else(|| anyhow!("Unknown run status in run log: {}", status_raw))?,
                total_analyzed: row.get("total_analyzed"),
                total_groups: row.get("total_groups"),
                error_text: row.get("error_text"),
            })
        })
        .collect()
}
