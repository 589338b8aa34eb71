// src/enrich/context.rs

use anyhow::{Context, Result};
use log::debug;

use crate::db::PgPool;
use crate::models::{EntityKind, MemberContext, MemberId};

// Context queries are anchored on the member row and walk the hierarchy
// upward; descendant counters feed the operator UI.

const CITY_CONTEXT_SQL: &str = "
    SELECT c.state_code,
           (SELECT COUNT(*) FROM neighborhood n WHERE n.city_id = c.id) AS child_count
    FROM city c
    WHERE c.id = $1::text::bigint";

const NEIGHBORHOOD_CONTEXT_SQL: &str = "
    SELECT n.city_id::text AS city_id, c.name AS city_name, c.state_code,
           (SELECT COUNT(*) FROM street s WHERE s.neighborhood_id = n.id) AS child_count
    FROM neighborhood n
    JOIN city c ON c.id = n.city_id
    WHERE n.id = $1::text::uuid";

const NEIGHBORHOOD_CEPS_SQL: &str = "
    SELECT DISTINCT s.postal_code
    FROM street s
    WHERE s.neighborhood_id = $1::text::uuid
      AND s.postal_code IS NOT NULL
      AND s.postal_code <> ''
    ORDER BY s.postal_code
    LIMIT $2";

const STREET_CONTEXT_SQL: &str = "
    SELECT st.neighborhood_id::text AS neighborhood_id, n.name AS neighborhood_name,
           n.city_id::text AS city_id, c.name AS city_name, c.state_code,
           st.postal_code,
           (SELECT COUNT(*) FROM condo k WHERE k.street_id = st.id) AS child_count
    FROM street st
    JOIN neighborhood n ON n.id = st.neighborhood_id
    JOIN city c ON c.id = n.city_id
    WHERE st.id = $1::text::uuid";

const CONDO_CONTEXT_SQL: &str = "
    SELECT k.street_id::text AS street_id, st.name AS street_name, st.postal_code,
           st.neighborhood_id::text AS neighborhood_id, n.name AS neighborhood_name,
           n.city_id::text AS city_id, c.name AS city_name, c.state_code
    FROM condo k
    JOIN street st ON st.id = k.street_id
    JOIN neighborhood n ON n.id = st.neighborhood_id
    JOIN city c ON c.id = n.city_id
    WHERE k.id = $1::text::uuid";

/// Resolves the hierarchy context for one member from the host schema.
/// A vanished member row yields an empty context rather than an error.
pub async fn resolve_member_context(
    pool: &PgPool,
    kind: EntityKind,
    member_id: &MemberId,
    member_name: &str,
    max_ceps: i64,
) -> Result<MemberContext> {
    let conn = pool
        .get()
        .await
        .context("Enrichment: failed to get DB connection for member context")?;

    let mut context = MemberContext {
        member_id: member_id.0.clone(),
        member_name: member_name.to_string(),
        ..Default::default()
    };

    match kind {
        EntityKind::City => {
            if let Some(row) = conn
                .query_opt(CITY_CONTEXT_SQL, &[&member_id.0])
                .await
                .context("Enrichment: city context query failed")?
            {
                context.state_code = row.get("state_code");
                context.child_count = row.get("child_count");
            }
        }
        EntityKind::Neighborhood => {
            if let Some(row) = conn
                .query_opt(NEIGHBORHOOD_CONTEXT_SQL, &[&member_id.0])
                .await
                .context("Enrichment: neighborhood context query failed")?
            {
                context.city_id = row.get("city_id");
                context.city_name = row.get("city_name");
                context.state_code = row.get("state_code");
                context.child_count = row.get("child_count");

                let cep_rows = conn
                    .query(NEIGHBORHOOD_CEPS_SQL, &[&member_id.0, &max_ceps])
                    .await
                    .context("Enrichment: neighborhood CEP query failed")?;
                context.postal_codes = cep_rows
                    .iter()
                    .map(|row| row.get::<_, String>("postal_code"))
                    .collect();
            }
        }
        EntityKind::Street => {
            if let Some(row) = conn
                .query_opt(STREET_CONTEXT_SQL, &[&member_id.0])
                .await
                .context("Enrichment: street context query failed")?
            {
                context.neighborhood_id = row.get("neighborhood_id");
                context.neighborhood_name = row.get("neighborhood_name");
                context.city_id = row.get("city_id");
                context.city_name = row.get("city_name");
                context.state_code = row.get("state_code");
                context.child_count = row.get("child_count");
                if let Some(cep) = row.get::<_, Option<String>>("postal_code") {
                    if !cep.is_empty() {
                        context.postal_codes.push(cep);
                    }
                }
            }
        }
        EntityKind::Condo => {
            if let Some(row) = conn
                .query_opt(CONDO_CONTEXT_SQL, &[&member_id.0])
                .await
                .context("Enrichment: condo context query failed")?
            {
                context.street_id = row.get("street_id");
                context.street_name = row.get("street_name");
                context.neighborhood_id = row.get("neighborhood_id");
                context.neighborhood_name = row.get("neighborhood_name");
                context.city_id = row.get("city_id");
                context.city_name = row.get("city_name");
                context.state_code = row.get("state_code");
                if let Some(cep) = row.get::<_, Option<String>>("postal_code") {
                    if !cep.is_empty() {
                        context.postal_codes.push(cep);
                    }
                }
            }
        }
    }

    debug!(
        "Enrichment: resolved context for {} member {} ({} CEPs)",
        kind.as_str(),
        member_id.0,
        context.postal_codes.len()
    );
    Ok(context)
}
