// src/detection/mod.rs

pub mod cluster;

use anyhow::{Context, Result};
use log::{debug, info};
use std::collections::HashSet;
use std::time::Instant;

use crate::db::PgPool;
use crate::models::{EntityKind, MemberId, SimilarPair};

// Scoped trigram pairing: same parent scope, a.id < b.id, folded
// similarity above the runtime threshold, score-descending, capped.
// The folding must match the normalizer's case/accent behavior so SQL
// and Rust agree on what "the same name" means.

const CITY_PAIRS_SQL: &str = "
    SELECT a.id::text AS id_a, b.id::text AS id_b,
           a.name AS name_a, b.name AS name_b,
           a.state_code AS parent_id,
           similarity(lower(unaccent(a.name)), lower(unaccent(b.name)))::float8 AS score
    FROM city a
    JOIN city b
      ON b.state_code = a.state_code
     AND a.id < b.id
    WHERE similarity(lower(unaccent(a.name)), lower(unaccent(b.name))) > $1
    ORDER BY score DESC
    LIMIT $2";

const NEIGHBORHOOD_PAIRS_SQL: &str = "
    SELECT a.id::text AS id_a, b.id::text AS id_b,
           a.name AS name_a, b.name AS name_b,
           a.city_id::text AS parent_id,
           similarity(lower(unaccent(a.name)), lower(unaccent(b.name)))::float8 AS score
    FROM neighborhood a
    JOIN neighborhood b
      ON b.city_id = a.city_id
     AND a.id < b.id
    WHERE a.excluded = FALSE
      AND b.excluded = FALSE
      AND similarity(lower(unaccent(a.name)), lower(unaccent(b.name))) > $1
    ORDER BY score DESC
    LIMIT $2";

const STREET_PAIRS_SQL: &str = "
    SELECT a.id::text AS id_a, b.id::text AS id_b,
           a.name AS name_a, b.name AS name_b,
           a.neighborhood_id::text AS parent_id,
           similarity(lower(unaccent(a.name)), lower(unaccent(b.name)))::float8 AS score
    FROM street a
    JOIN street b
      ON b.neighborhood_id = a.neighborhood_id
     AND a.id < b.id
    WHERE a.excluded = FALSE
      AND b.excluded = FALSE
      AND similarity(lower(unaccent(a.name)), lower(unaccent(b.name))) > $1
    ORDER BY score DESC
    LIMIT $2";

// Condo pairs share a street, but the group is labeled with the
// enclosing city: street-level scope is too narrow for display, and
// nearly every condo duplicate sits on the same street anyway.
const CONDO_PAIRS_SQL: &str = "
    SELECT a.id::text AS id_a, b.id::text AS id_b,
           a.name AS name_a, b.name AS name_b,
           n.city_id::text AS parent_id,
           similarity(lower(unaccent(a.name)), lower(unaccent(b.name)))::float8 AS score
    FROM condo a
    JOIN condo b
      ON b.street_id = a.street_id
     AND a.id < b.id
    JOIN street s ON s.id = a.street_id
    JOIN neighborhood n ON n.id = s.neighborhood_id
    WHERE a.excluded = FALSE
      AND b.excluded = FALSE
      AND similarity(lower(unaccent(a.name)), lower(unaccent(b.name))) > $1
    ORDER BY score DESC
    LIMIT $2";

fn pairs_query(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::City => CITY_PAIRS_SQL,
        EntityKind::Neighborhood => NEIGHBORHOOD_PAIRS_SQL,
        EntityKind::Street => STREET_PAIRS_SQL,
        EntityKind::Condo => CONDO_PAIRS_SQL,
    }
}

/// Runs the scoped trigram query for one kind. Failure aborts the whole
/// kind pass: the caller gets all pairs or none.
pub async fn find_similar_pairs(
    pool: &PgPool,
    kind: EntityKind,
    threshold: f32,
    limit: i64,
) -> Result<Vec<SimilarPair>> {
    let start = Instant::now();
    let conn = pool
        .get()
        .await
        .context("Detection: failed to get DB connection")?;

    let rows = conn
        .query(pairs_query(kind), &[&threshold, &limit])
        .await
        .with_context(|| format!("Detection: trigram query failed for kind {}", kind.as_str()))?;

    let pairs: Vec<SimilarPair> = rows
        .iter()
        .map(|row| SimilarPair {
            id_a: MemberId(row.get("id_a")),
            id_b: MemberId(row.get("id_b")),
            name_a: row.get("name_a"),
            name_b: row.get("name_b"),
            parent_id: row.get("parent_id"),
            score: row.get("score"),
        })
        .collect();

    info!(
        "Detection: {} candidate pairs for kind {} (threshold {:.2}) in {:.2?}",
        pairs.len(),
        kind.as_str(),
        threshold,
        start.elapsed()
    );
    Ok(pairs)
}

const EXISTING_MEMBERS_SQL: &str = "
    SELECT member_ids
    FROM dedup_duplicate_group
    WHERE entity_kind = $1
      AND status IN ('pending', 'executed')";

/// Drops pairs whose endpoints are both already members of a live
/// (Pending or Executed) group of the same kind, so detection does not
/// regenerate groups that exist. Pairs with one new endpoint survive so
/// a newcomer can attach to a fresh group.
pub async fn filter_known_pairs(
    pool: &PgPool,
    kind: EntityKind,
    pairs: Vec<SimilarPair>,
) -> Result<Vec<SimilarPair>> {
    if pairs.is_empty() {
        return Ok(pairs);
    }

    let conn = pool
        .get()
        .await
        .context("Detection: failed to get DB connection for group de-dup")?;

    let rows = conn
        .query(EXISTING_MEMBERS_SQL, &[&kind.as_str()])
        .await
        .context("Detection: failed to read existing group members")?;

    let mut known: HashSet<String> = HashSet::new();
    for row in rows {
        let member_ids: Vec<String> = row.get("member_ids");
        known.extend(member_ids);
    }

    let before = pairs.len();
    let survivors: Vec<SimilarPair> = pairs
        .into_iter()
        .filter(|pair| !(known.contains(&pair.id_a.0) && known.contains(&pair.id_b.0)))
        .collect();

    debug!(
        "Detection: de-dup against {} known members dropped {} of {} pairs",
        known.len(),
        before - survivors.len(),
        before
    );
    Ok(survivors)
}
