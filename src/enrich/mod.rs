// src/enrich/mod.rs

pub mod canonical;
pub mod context;

pub use canonical::{majority_vote, resolve_canonical, suggest_canonical};
pub use context::resolve_member_context;

use anyhow::Result;
use log::{debug, info, warn};
use std::time::Instant;

use crate::config::{Config, ENRICH_BATCH_SIZE};
use crate::db::PgPool;
use crate::models::{DuplicateGroup, MemberContext};
use crate::persist;
use crate::resolvers::Resolvers;

/// Backlog bound for a single re-enrichment pass.
const MAX_ENRICH_BACKLOG: i64 = 10_000;

/// Resolves member contexts and the authoritative name for one group,
/// storing both. Resolver misses leave the group without a canonical
/// name; only database failures propagate.
pub async fn enrich_group(
    pool: &PgPool,
    resolvers: &Resolvers,
    config: &Config,
    group: &DuplicateGroup,
) -> Result<bool> {
    let mut contexts: Vec<MemberContext> = Vec::with_capacity(group.member_ids.len());
    for (member_id, member_name) in group.member_ids.iter().zip(&group.member_names) {
        let context = resolve_member_context(
            pool,
            group.entity_kind,
            member_id,
            member_name,
            config.max_ceps_per_member,
        )
        .await?;
        contexts.push(context);
    }

    persist::replace_member_contexts(pool, &group.id, &contexts).await?;

    let resolution =
        resolve_canonical(resolvers, group.entity_kind, &group.member_names, &contexts).await;

    match resolution {
        Some(resolution) => {
            let suggested =
                suggest_canonical(&group.member_ids, &group.member_names, &resolution.name);
            persist::set_canonical(pool, &group.id, &resolution, suggested.as_ref()).await?;
            info!(
                "Enrichment: group {} -> {:?} via {} ({:.2})",
                group.id.0,
                resolution.name,
                resolution.source.as_str(),
                resolution.score
            );
            Ok(true)
        }
        None => {
            warn!(
                "Enrichment: no source resolved a canonical name for group {}",
                group.id.0
            );
            Ok(false)
        }
    }
}

/// Re-enriches every Pending group still lacking a canonical name, in
/// fixed-size batches. Returns the number of groups that gained one.
pub async fn enrich_pending(
    pool: &PgPool,
    resolvers: &Resolvers,
    config: &Config,
) -> Result<usize> {
    let backlog = persist::pending_without_canonical(pool, MAX_ENRICH_BACKLOG).await?;
    if backlog.is_empty() {
        info!("Enrichment: nothing pending without a canonical name");
        return Ok(0);
    }

    info!(
        "Enrichment: {} pending groups lacking canonical names",
        backlog.len()
    );
    let start = Instant::now();
    let mut enriched = 0usize;

    for (number, batch) in backlog.chunks(ENRICH_BATCH_SIZE as usize).enumerate() {
        debug!(
            "Enrichment: batch {} ({} groups)",
            number + 1,
            batch.len()
        );
        for group in batch {
            if enrich_group(pool, resolvers, config, group).await? {
                enriched += 1;
            }
        }
    }

    info!(
        "Enrichment: resolved {} of {} groups in {:.2?}",
        enriched,
        backlog.len(),
        start.elapsed()
    );
    Ok(enriched)
}
