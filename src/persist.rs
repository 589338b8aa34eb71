// src/persist.rs

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{debug, info};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::db::PgPool;
use crate::llm::ValidatedGroup;
use crate::models::{
    CanonicalResolution, CanonicalSource, DuplicateGroup, EntityKind, GroupId, GroupSource,
    GroupStatus, MemberContext, MemberId,
};

const INSERT_GROUP_SQL: &str = "
    INSERT INTO dedup_duplicate_group
        (id, entity_kind, parent_id, normalized_name, member_ids, member_names,
         mean_score, source, llm_details, status, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

const INSERT_CONTEXT_SQL: &str = "
    INSERT INTO dedup_member_context
        (id, group_id, member_id, member_name, state_code, city_id, city_name,
         neighborhood_id, neighborhood_name, street_id, street_name,
         postal_codes, child_count)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)";

const GROUP_COLUMNS: &str = "
    id, entity_kind, parent_id, normalized_name, member_ids, member_names,
    mean_score, source, llm_details, canonical_name, canonical_source,
    canonical_address, suggested_canonical_id, status, chosen_canonical_id,
    chosen_name, executed_at, executed_by, reverted_at, decision_context,
    created_at, total_fks_redirected";

pub(crate) fn group_from_row(row: &Row) -> Result<DuplicateGroup> {
    let kind_raw: String = row.get("entity_kind");
    let entity_kind = EntityKind::from_str(&kind_raw)
        .ok_or_else(|| anyhow!("Unknown entity kind in group row: {}", kind_raw))?;

    let status_raw: String = row.get("status");
    let status = GroupStatus::from_str(&status_raw)
        .ok_or_else(|| anyhow!("Unknown group status in group row: {}", status_raw))?;

    let source_raw: String = row.get("source");
    let source = GroupSource::from_str(&source_raw)
        .ok_or_else(|| anyhow!("Unknown group source in group row: {}", source_raw))?;

    let member_ids: Vec<String> = row.get("member_ids");
    let member_names: Vec<String> = row.get("member_names");
    let canonical_source: Option<String> = row.get("canonical_source");

    Ok(DuplicateGroup {
        id: GroupId(row.get("id")),
        entity_kind,
        parent_id: row.get("parent_id"),
        normalized_name: row.get("normalized_name"),
        member_ids: member_ids.into_iter().map(MemberId).collect(),
        member_names,
        mean_score: row.get("mean_score"),
        source,
        llm_details: row.get("llm_details"),
        canonical_name: row.get("canonical_name"),
        canonical_source: canonical_source.as_deref().and_then(CanonicalSource::from_str),
        canonical_address: row.get("canonical_address"),
        suggested_canonical_id: row
            .get::<_, Option<String>>("suggested_canonical_id")
            .map(MemberId),
        status,
        chosen_canonical_id: row
            .get::<_, Option<String>>("chosen_canonical_id")
            .map(MemberId),
        chosen_name: row.get("chosen_name"),
        executed_at: row.get("executed_at"),
        executed_by: row.get("executed_by"),
        reverted_at: row.get("reverted_at"),
        decision_context: row.get("decision_context"),
        created_at: row.get("created_at"),
        total_fks_redirected: row.get("total_fks_redirected"),
    })
}

/// Persists one validated group with status Pending. LLM-confirmed
/// groups carry `source = "trigram+llm"` and the raw decision blob.
pub async fn insert_group(pool: &PgPool, validated: &ValidatedGroup) -> Result<GroupId> {
    let conn = pool
        .get()
        .await
        .context("Persist: failed to get DB connection for group insert")?;

    let group = &validated.group;
    let group_id = GroupId(Uuid::new_v4().to_string());
    let source = if validated.decision.is_some() {
        GroupSource::TrigramLlm
    } else {
        GroupSource::Trigram
    };

    let member_ids: Vec<&str> = group.member_ids.iter().map(|id| id.0.as_str()).collect();
    let member_names: Vec<&str> = group.member_names.iter().map(String::as_str).collect();

    conn.execute(
        INSERT_GROUP_SQL,
        &[
            &group_id.0,
            &group.entity_kind.as_str(),
            &group.parent_id,
            &group.normalized_name,
            &member_ids,
            &member_names,
            &group.mean_score,
            &source.as_str(),
            &validated.details,
            &GroupStatus::Pending.as_str(),
            &Utc::now().naive_utc(),
        ],
    )
    .await
    .context("Persist: failed to insert duplicate group")?;

    debug!(
        "Persist: created group {} ({} members, source {})",
        group_id.0,
        group.member_ids.len(),
        source.as_str()
    );
    Ok(group_id)
}

/// Replaces the stored member contexts of a group.
pub async fn replace_member_contexts(
    pool: &PgPool,
    group_id: &GroupId,
    contexts: &[MemberContext],
) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Persist: failed to get DB connection for member contexts")?;

    conn.execute(
        "DELETE FROM dedup_member_context WHERE group_id = $1",
        &[&group_id.0],
    )
    .await
    .context("Persist: failed to clear member contexts")?;

    for context in contexts {
        conn.execute(
            INSERT_CONTEXT_SQL,
            &[
                &Uuid::new_v4().to_string(),
                &group_id.0,
                &context.member_id,
                &context.member_name,
                &context.state_code,
                &context.city_id,
                &context.city_name,
                &context.neighborhood_id,
                &context.neighborhood_name,
                &context.street_id,
                &context.street_name,
                &context.postal_codes,
                &context.child_count,
            ],
        )
        .await
        .context("Persist: failed to insert member context")?;
    }
    Ok(())
}

/// Records the enricher's outcome on a group.
pub async fn set_canonical(
    pool: &PgPool,
    group_id: &GroupId,
    resolution: &CanonicalResolution,
    suggested: Option<&MemberId>,
) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Persist: failed to get DB connection for canonical update")?;

    conn.execute(
        "UPDATE dedup_duplicate_group
         SET canonical_name = $2, canonical_source = $3,
             canonical_address = $4, suggested_canonical_id = $5
         WHERE id = $1",
        &[
            &group_id.0,
            &resolution.name,
            &resolution.source.as_str(),
            &resolution.address,
            &suggested.map(|id| id.0.as_str()),
        ],
    )
    .await
    .context("Persist: failed to store canonical resolution")?;
    Ok(())
}

/// Loads one group by id.
pub async fn fetch_group(pool: &PgPool, group_id: &GroupId) -> Result<Option<DuplicateGroup>> {
    let conn = pool
        .get()
        .await
        .context("Persist: failed to get DB connection for group fetch")?;

    let sql = format!(
        "SELECT {} FROM dedup_duplicate_group WHERE id = $1",
        GROUP_COLUMNS
    );
    let row = conn
        .query_opt(&sql, &[&group_id.0])
        .await
        .context("Persist: failed to fetch group")?;

    row.as_ref().map(group_from_row).transpose()
}

/// Pending -> Discarded by explicit operator action.
pub async fn discard_group(pool: &PgPool, group_id: &GroupId) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Persist: failed to get DB connection for discard")?;

    let updated = conn
        .execute(
            "UPDATE dedup_duplicate_group
             SET status = $2
             WHERE id = $1 AND status = $3",
            &[
                &group_id.0,
                &GroupStatus::Discarded.as_str(),
                &GroupStatus::Pending.as_str(),
            ],
        )
        .await
        .context("Persist: failed to discard group")?;

    if updated == 0 {
        return Err(anyhow!(
            "Group {} is not pending (or does not exist); cannot discard",
            group_id.0
        ));
    }
    info!("Persist: group {} discarded", group_id.0);
    Ok(())
}

/// Pending groups ready for unattended approval: an authoritative name,
/// a suggested canonical member, and validator confidence at or above
/// the threshold.
pub async fn auto_approvable_group_ids(
    pool: &PgPool,
    min_confidence: f64,
) -> Result<Vec<GroupId>> {
    let conn = pool
        .get()
        .await
        .context("Persist: failed to get DB connection for auto-approvable query")?;

    let rows = conn
        .query(
            "SELECT id FROM dedup_duplicate_group
             WHERE status = 'pending'
               AND suggested_canonical_id IS NOT NULL
               AND canonical_name IS NOT NULL
               AND (llm_details ->> 'confidence')::float8 >= $1
             ORDER BY created_at",
            &[&min_confidence],
        )
        .await
        .context("Persist: failed to list auto-approvable groups")?;

    Ok(rows.iter().map(|row| GroupId(row.get("id"))).collect())
}

/// Pending groups still lacking an authoritative name, oldest first.
pub async fn pending_without_canonical(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<DuplicateGroup>> {
    let conn = pool
        .get()
        .await
        .context("Persist: failed to get DB connection for enrichment backlog")?;

    let sql = format!(
        "SELECT {} FROM dedup_duplicate_group
         WHERE status = 'pending' AND canonical_name IS NULL
         ORDER BY created_at
         LIMIT $1",
        GROUP_COLUMNS
    );
    let rows = conn
        .query(&sql, &[&limit])
        .await
        .context("Persist: failed to list groups lacking canonical names")?;

    rows.iter().map(group_from_row).collect()
}
