// src/pipeline.rs

use anyhow::{Context, Result};
use log::{info, warn};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::{Cache, MemoryCache};
use crate::config::Config;
use crate::db::{self, PgPool};
use crate::detection::{self, cluster::cluster_pairs};
use crate::enrich;
use crate::llm::{self, LlmClient};
use crate::models::{EntityKind, MemberContext};
use crate::persist;
use crate::resolvers::Resolvers;
use crate::results::{self, KindPassStats};

/// Explicitly constructed application context: the pool, cache, resolver
/// adapters and validator client every component receives instead of
/// process-wide globals.
pub struct AppContext {
    pub pool: PgPool,
    pub config: Config,
    pub cache: Arc<dyn Cache>,
    pub resolvers: Resolvers,
    pub llm: Option<LlmClient>,
}

impl AppContext {
    pub async fn initialize(config: Config) -> Result<Self> {
        let pool = db::connect(&config.database_url)
            .await
            .context("Failed to connect to database")?;
        db::init_pipeline_tables(&pool).await?;

        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let resolvers = Resolvers::new(&config, cache.clone());
        let llm = LlmClient::from_config(&config);

        Ok(Self {
            pool,
            config,
            cache,
            resolvers,
            llm,
        })
    }
}

/// One detection pass over a single entity kind: discover, cluster,
/// validate, persist, enrich. The run log brackets the pass; any
/// database failure inside marks it Errored.
pub async fn run_kind_pass(context: &AppContext, kind: EntityKind) -> Result<KindPassStats> {
    let run_id = results::start_run(&context.pool, kind).await?;

    match kind_pass_inner(context, kind).await {
        Ok(stats) => {
            results::complete_run(
                &context.pool,
                &run_id,
                stats.pairs_analyzed as i64,
                stats.groups_created as i64,
            )
            .await?;
            Ok(stats)
        }
        Err(e) => {
            if let Err(log_err) =
                results::fail_run(&context.pool, &run_id, &format!("{:#}", e)).await
            {
                warn!("RunLog: could not record failure: {:#}", log_err);
            }
            Err(e)
        }
    }
}

async fn kind_pass_inner(context: &AppContext, kind: EntityKind) -> Result<KindPassStats> {
    let mut stats = KindPassStats::new(kind);

    let pairs = detection::find_similar_pairs(
        &context.pool,
        kind,
        context.config.similarity_threshold,
        context.config.max_pairs_per_run,
    )
    .await?;
    stats.pairs_analyzed = pairs.len();

    let pairs = detection::filter_known_pairs(&context.pool, kind, pairs).await?;
    let candidates = cluster_pairs(kind, &pairs);
    if candidates.is_empty() {
        info!("Pipeline: no new candidate groups for kind {}", kind.as_str());
        return Ok(stats);
    }

    // The validator wants each group's geographic context; the first
    // member stands for the group at this stage.
    let mut with_context = Vec::with_capacity(candidates.len());
    for group in candidates {
        let context_for_prompt = if context.llm.is_some() {
            enrich::resolve_member_context(
                &context.pool,
                kind,
                &group.member_ids[0],
                &group.member_names[0],
                context.config.max_ceps_per_member,
            )
            .await?
        } else {
            MemberContext::default()
        };
        with_context.push((group, context_for_prompt));
    }

    let outcome =
        llm::validate_groups(context.llm.as_ref(), context.cache.as_ref(), with_context).await;
    stats.llm_discarded = outcome.discarded;

    for validated in outcome.accepted {
        let group_id = persist::insert_group(&context.pool, &validated).await?;
        stats.groups_created += 1;

        if context.config.enrichment_enabled {
            if let Some(group) = persist::fetch_group(&context.pool, &group_id).await? {
                if enrich::enrich_group(&context.pool, &context.resolvers, &context.config, &group)
                    .await?
                {
                    stats.enriched += 1;
                }
            }
        }
    }

    Ok(stats)
}

/// Full detection run, kinds in parents-first order. A failing kind is
/// logged and skipped; the remaining kinds still run.
pub async fn run_detection(
    context: &AppContext,
    kinds: &[EntityKind],
) -> Vec<(EntityKind, Result<KindPassStats>)> {
    let mut outcomes = Vec::with_capacity(kinds.len());

    for &kind in kinds {
        info!("Pipeline: starting pass for kind {}", kind.as_str());
        let start = Instant::now();
        let outcome = run_kind_pass(context, kind).await;

        match &outcome {
            Ok(stats) => info!(
                "Pipeline: kind {} done in {:.2?} ({} pairs, {} groups, {} LLM-discarded, {} enriched)",
                kind.as_str(),
                start.elapsed(),
                stats.pairs_analyzed,
                stats.groups_created,
                stats.llm_discarded,
                stats.enriched
            ),
            Err(e) => warn!(
                "Pipeline: kind {} failed after {:.2?}: {:#}",
                kind.as_str(),
                start.elapsed(),
                e
            ),
        }
        outcomes.push((kind, outcome));
    }

    outcomes
}
