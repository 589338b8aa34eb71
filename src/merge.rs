// src/merge.rs

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{info, warn};
use std::collections::BTreeSet;
use std::time::Instant;
use tokio_postgres::Transaction;
use uuid::Uuid;

use crate::config::TRANSACTION_TIMEOUT_MS;
use crate::db::PgPool;
use crate::fk_map::{cast_param, find_ref, inbound_refs};
use crate::models::{GroupId, GroupStatus, MemberId, MergeLogEntry};
use crate::persist;

/// Operator request to merge one group onto a chosen canonical member.
#[derive(Debug, Clone)]
pub struct UnifyRequest {
    pub group_id: GroupId,
    pub chosen_canonical_id: MemberId,
    /// Optional rename applied to the canonical row.
    pub chosen_name: Option<String>,
    pub executed_by: Option<String>,
    /// Opaque audit blob, stored verbatim on the group.
    pub decision_context: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub group_id: GroupId,
    pub fks_redirected: i64,
}

#[derive(Debug, Clone)]
pub struct RevertOutcome {
    pub group_id: GroupId,
    pub rows_restored: i64,
    pub members_restored: usize,
}

const INSERT_LOG_SQL: &str = "
    INSERT INTO dedup_merge_log
        (id, group_id, absorbed_member_id, table_name, column_name,
         affected_row_pk, old_value, new_value, reverted, executed_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9)";

/// Loads the change log still awaiting reversal, oldest first.
async fn load_unreverted_log(
    tx: &Transaction<'_>,
    group_id: &GroupId,
) -> Result<Vec<MergeLogEntry>> {
    let rows = tx
        .query(
            "SELECT id, group_id, absorbed_member_id, table_name, column_name,
                    affected_row_pk, old_value, new_value, reverted, reverted_at,
                    executed_at
             FROM dedup_merge_log
             WHERE group_id = $1 AND reverted = FALSE
             ORDER BY executed_at, id",
            &[&group_id.0],
        )
        .await
        .context("Revert: failed to load merge log")?;

    Ok(rows
        .iter()
        .map(|row| MergeLogEntry {
            id: row.get("id"),
            group_id: GroupId(row.get("group_id")),
            absorbed_member_id: MemberId(row.get("absorbed_member_id")),
            table_name: row.get("table_name"),
            column_name: row.get("column_name"),
            affected_row_pk: row.get("affected_row_pk"),
            old_value: row.get("old_value"),
            new_value: row.get("new_value"),
            reverted: row.get("reverted"),
            reverted_at: row.get("reverted_at"),
            executed_at: row.get("executed_at"),
        })
        .collect())
}

async fn apply_transaction_timeout(tx: &Transaction<'_>) -> Result<()> {
    tx.batch_execute(&format!(
        "SET LOCAL statement_timeout = {}",
        TRANSACTION_TIMEOUT_MS
    ))
    .await
    .context("Merge: failed to set transaction timeout")?;
    Ok(())
}

fn precondition(check: bool, message: String) -> Result<()> {
    if check {
        Ok(())
    } else {
        Err(anyhow!(message))
    }
}

/// Executes a merge: every inbound FK row of every absorbed member is
/// redirected to the chosen canonical member inside one transaction,
/// with a per-row change log enabling byte-exact rollback. Absorbed rows
/// are soft-deleted where the host table carries an `excluded` flag.
pub async fn unify(pool: &PgPool, request: UnifyRequest) -> Result<MergeOutcome> {
    let group = persist::fetch_group(pool, &request.group_id)
        .await?
        .ok_or_else(|| anyhow!("Group {} not found", request.group_id.0))?;

    precondition(
        matches!(group.status, GroupStatus::Pending | GroupStatus::Reverted),
        format!(
            "Group {} has status {}; only pending or reverted groups can be merged",
            group.id.0,
            group.status.as_str()
        ),
    )?;
    precondition(
        group.member_ids.contains(&request.chosen_canonical_id),
        format!(
            "Canonical {} is not a member of group {}",
            request.chosen_canonical_id.0, group.id.0
        ),
    )?;

    let start = Instant::now();
    let mut conn = pool
        .get()
        .await
        .context("Merge: failed to get dedicated DB connection")?;
    let tx = conn
        .transaction()
        .await
        .context("Merge: failed to open transaction")?;
    apply_transaction_timeout(&tx).await?;

    let now = Utc::now().naive_utc();
    let kind = group.entity_kind;
    let mut fks_redirected = 0i64;

    let absorbed: Vec<&MemberId> = group
        .member_ids
        .iter()
        .filter(|id| **id != request.chosen_canonical_id)
        .collect();

    for member in &absorbed {
        for fk in inbound_refs(kind) {
            let select_sql = format!(
                "SELECT {}::text AS pk FROM {} WHERE {} = {}",
                fk.pk_column,
                fk.table,
                fk.column,
                cast_param(fk.id_kind, 1)
            );
            let rows = tx
                .query(&select_sql, &[&member.0])
                .await
                .with_context(|| {
                    format!("Merge: failed to list {}.{} rows", fk.table, fk.column)
                })?;

            if rows.is_empty() {
                continue;
            }

            let update_sql = format!(
                "UPDATE {} SET {} = {} WHERE {} = {}",
                fk.table,
                fk.column,
                cast_param(fk.id_kind, 1),
                fk.column,
                cast_param(fk.id_kind, 2)
            );
            tx.execute(&update_sql, &[&request.chosen_canonical_id.0, &member.0])
                .await
                .with_context(|| {
                    format!("Merge: failed to redirect {}.{}", fk.table, fk.column)
                })?;

            for row in &rows {
                let pk: String = row.get("pk");
                tx.execute(
                    INSERT_LOG_SQL,
                    &[
                        &Uuid::new_v4().to_string(),
                        &group.id.0,
                        &member.0,
                        &fk.table,
                        &fk.column,
                        &pk,
                        &member.0,
                        &request.chosen_canonical_id.0,
                        &now,
                    ],
                )
                .await
                .context("Merge: failed to append merge log entry")?;
                fks_redirected += 1;
            }
        }
    }

    if kind.has_excluded_flag() {
        for member in &absorbed {
            let sql = format!(
                "UPDATE {} SET excluded = TRUE WHERE id = {}",
                kind.table(),
                cast_param(kind.id_kind(), 1)
            );
            tx.execute(&sql, &[&member.0])
                .await
                .context("Merge: failed to soft-delete absorbed member")?;
        }
    }

    if let Some(chosen_name) = &request.chosen_name {
        let sql = format!(
            "UPDATE {} SET name = $2 WHERE id = {}",
            kind.table(),
            cast_param(kind.id_kind(), 1)
        );
        tx.execute(&sql, &[&request.chosen_canonical_id.0, chosen_name])
            .await
            .context("Merge: failed to rename canonical member")?;
    }

    let updated = tx
        .execute(
            "UPDATE dedup_duplicate_group
             SET status = $2, chosen_canonical_id = $3, chosen_name = $4,
                 executed_at = $5, executed_by = $6,
                 total_fks_redirected = $7, decision_context = $8
             WHERE id = $1 AND status IN ('pending', 'reverted')",
            &[
                &group.id.0,
                &GroupStatus::Executed.as_str(),
                &request.chosen_canonical_id.0,
                &request.chosen_name,
                &now,
                &request.executed_by,
                &fks_redirected,
                &request.decision_context,
            ],
        )
        .await
        .context("Merge: failed to mark group executed")?;

    // A concurrent merge already flipped the status; roll back ours.
    precondition(
        updated == 1,
        format!("Group {} was modified concurrently; merge aborted", group.id.0),
    )?;

    tx.commit().await.context("Merge: commit failed")?;

    info!(
        "Merge: group {} executed onto {} ({} FK rows redirected) in {:.2?}",
        group.id.0,
        request.chosen_canonical_id.0,
        fks_redirected,
        start.elapsed()
    );
    Ok(MergeOutcome {
        group_id: group.id,
        fks_redirected,
    })
}

/// Rolls one executed merge back from its change log: every logged row
/// gets its old value restored, absorbed members are un-excluded, log
/// entries are flagged reverted, and the group returns to Reverted.
pub async fn revert(pool: &PgPool, group_id: &GroupId) -> Result<RevertOutcome> {
    let group = persist::fetch_group(pool, group_id)
        .await?
        .ok_or_else(|| anyhow!("Group {} not found", group_id.0))?;

    precondition(
        group.status == GroupStatus::Executed,
        format!(
            "Group {} has status {}; only executed groups can be reverted",
            group.id.0,
            group.status.as_str()
        ),
    )?;

    let start = Instant::now();
    let mut conn = pool
        .get()
        .await
        .context("Revert: failed to get dedicated DB connection")?;
    let tx = conn
        .transaction()
        .await
        .context("Revert: failed to open transaction")?;
    apply_transaction_timeout(&tx).await?;

    let entries = load_unreverted_log(&tx, &group.id).await?;

    if entries.is_empty() {
        // Nothing was logged for this merge; leave all state untouched.
        warn!("Revert: group {} has no unreverted log entries", group.id.0);
        return Ok(RevertOutcome {
            group_id: group.id,
            rows_restored: 0,
            members_restored: 0,
        });
    }

    let mut rows_restored = 0i64;
    let mut absorbed_members: BTreeSet<String> = BTreeSet::new();

    for entry in &entries {
        absorbed_members.insert(entry.absorbed_member_id.0.clone());

        let fk = find_ref(&entry.table_name, &entry.column_name).ok_or_else(|| {
            anyhow!(
                "Revert: no FK map entry for {}.{}; refusing partial rollback",
                entry.table_name,
                entry.column_name
            )
        })?;

        let sql = format!(
            "UPDATE {} SET {} = {} WHERE {}::text = $2",
            entry.table_name,
            entry.column_name,
            cast_param(fk.id_kind, 1),
            fk.pk_column
        );
        rows_restored += tx
            .execute(&sql, &[&entry.old_value, &entry.affected_row_pk])
            .await
            .with_context(|| {
                format!(
                    "Revert: failed to restore {}.{}",
                    entry.table_name, entry.column_name
                )
            })? as i64;
    }

    let now = Utc::now().naive_utc();
    let kind = group.entity_kind;

    if kind.has_excluded_flag() {
        for member in &absorbed_members {
            let sql = format!(
                "UPDATE {} SET excluded = FALSE WHERE id = {}",
                kind.table(),
                cast_param(kind.id_kind(), 1)
            );
            tx.execute(&sql, &[member])
                .await
                .context("Revert: failed to restore excluded flag")?;
        }
    }

    tx.execute(
        "UPDATE dedup_merge_log
         SET reverted = TRUE, reverted_at = $2
         WHERE group_id = $1 AND reverted = FALSE",
        &[&group.id.0, &now],
    )
    .await
    .context("Revert: failed to flag log entries")?;

    let updated = tx
        .execute(
            "UPDATE dedup_duplicate_group
             SET status = $2, reverted_at = $3
             WHERE id = $1 AND status = 'executed'",
            &[&group.id.0, &GroupStatus::Reverted.as_str(), &now],
        )
        .await
        .context("Revert: failed to mark group reverted")?;

    precondition(
        updated == 1,
        format!(
            "Group {} was modified concurrently; revert aborted",
            group.id.0
        ),
    )?;

    tx.commit().await.context("Revert: commit failed")?;

    info!(
        "Revert: group {} restored {} rows across {} absorbed members in {:.2?}",
        group.id.0,
        rows_restored,
        absorbed_members.len(),
        start.elapsed()
    );
    Ok(RevertOutcome {
        group_id: group.id,
        rows_restored,
        members_restored: absorbed_members.len(),
    })
}

/// Convenience path for the operator UI: merge a group onto its
/// enrichment suggestion under its authoritative name.
pub async fn approve_suggestion(
    pool: &PgPool,
    group_id: &GroupId,
    executed_by: Option<String>,
) -> Result<MergeOutcome> {
    let group = persist::fetch_group(pool, group_id)
        .await?
        .ok_or_else(|| anyhow!("Group {} not found", group_id.0))?;

    let suggested = group.suggested_canonical_id.clone().ok_or_else(|| {
        anyhow!("Group {} has no suggested canonical member", group_id.0)
    })?;

    unify(
        pool,
        UnifyRequest {
            group_id: group.id.clone(),
            chosen_canonical_id: suggested,
            chosen_name: group.canonical_name.clone(),
            executed_by,
            decision_context: None,
        },
    )
    .await
}

/// Sequential batch merge; each group gets its own transaction and its
/// own per-id result.
pub async fn approve_suggestions_batch(
    pool: &PgPool,
    group_ids: &[GroupId],
    executed_by: Option<String>,
) -> Vec<(GroupId, Result<MergeOutcome>)> {
    let mut results = Vec::with_capacity(group_ids.len());
    for group_id in group_ids {
        let outcome = approve_suggestion(pool, group_id, executed_by.clone()).await;
        if let Err(e) = &outcome {
            warn!("Merge: batch approval failed for {}: {:#}", group_id.0, e);
        }
        results.push((group_id.clone(), outcome));
    }
    results
}
