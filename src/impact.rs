// src/impact.rs

use anyhow::{Context, Result};
use log::debug;

use crate::db::PgPool;
use crate::fk_map::{cast_param, inbound_refs};
use crate::models::{DuplicateGroup, MemberId};

/// Inbound-reference counts for one group member, used by the operator
/// UI to propose the most-referenced member as canonical when no
/// authoritative suggestion exists.
#[derive(Debug, Clone)]
pub struct MemberImpact {
    pub member_id: MemberId,
    pub member_name: String,
    /// (table.column, row count) per FK-map entry.
    pub per_table_counts: Vec<(String, i64)>,
    pub total_references: i64,
}

/// Counts inbound FK rows per member across every edge in the FK map,
/// sorted by total references descending.
pub async fn analyze_group(pool: &PgPool, group: &DuplicateGroup) -> Result<Vec<MemberImpact>> {
    let conn = pool
        .get()
        .await
        .context("Impact: failed to get DB connection")?;

    let mut impacts = Vec::with_capacity(group.member_ids.len());

    for (member_id, member_name) in group.member_ids.iter().zip(&group.member_names) {
        let mut per_table_counts = Vec::new();
        let mut total_references = 0i64;

        for fk in inbound_refs(group.entity_kind) {
            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE {} = {}",
                fk.table,
                fk.column,
                cast_param(fk.id_kind, 1)
            );
            let row = conn
                .query_one(&sql, &[&member_id.0])
                .await
                .with_context(|| {
                    format!("Impact: count failed for {}.{}", fk.table, fk.column)
                })?;
            let count: i64 = row.get(0);

            per_table_counts.push((format!("{}.{}", fk.table, fk.column), count));
            total_references += count;
        }

        debug!(
            "Impact: member {} has {} inbound references",
            member_id.0, total_references
        );
        impacts.push(MemberImpact {
            member_id: member_id.clone(),
            member_name: member_name.clone(),
            per_table_counts,
            total_references,
        });
    }

    impacts.sort_by(|a, b| b.total_references.cmp(&a.total_references));
    Ok(impacts)
}
