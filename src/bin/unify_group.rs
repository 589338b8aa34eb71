// src/bin/unify_group.rs
//
// Operator CLI for the merge lifecycle:
//   unify_group unify <group-id> <canonical-member-id> [--name <final name>] [--by <operator>]
//   unify_group approve <group-id> [--by <operator>]
//   unify_group auto [--by <operator>]
//   unify_group impact <group-id>
//   unify_group revert <group-id>
//   unify_group discard <group-id>

use anyhow::{anyhow, Result};
use log::{error, info, warn};
use std::path::Path;

use geodedupe::config::Config;
use geodedupe::db;
use geodedupe::impact;
use geodedupe::merge::{self, UnifyRequest};
use geodedupe::models::{GroupId, MemberId};
use geodedupe::persist;
use geodedupe::pipeline::AppContext;

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|index| args.get(index + 1))
        .cloned()
}

fn required_group_id(args: &[String]) -> Result<GroupId> {
    args.get(1)
        .map(|raw| GroupId(raw.clone()))
        .ok_or_else(|| anyhow!("Missing group id"))
}

async fn fetch_required(
    context: &AppContext,
    group_id: &GroupId,
) -> Result<geodedupe::DuplicateGroup> {
    persist::fetch_group(&context.pool, group_id)
        .await?
        .ok_or_else(|| anyhow!("Group {} not found", group_id.0))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let env_paths = [".env", ".env.local", "../.env"];
    for path in env_paths.iter() {
        if Path::new(path).exists() {
            if let Err(e) = db::load_env_from_file(path) {
                warn!("Failed to load environment from {}: {}", path, e);
            } else {
                break;
            }
        }
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args
        .first()
        .ok_or_else(|| {
            anyhow!("Usage: unify_group <unify|approve|auto|impact|revert|discard> ...")
        })?
        .clone();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };
    let context = AppContext::initialize(config).await?;

    match command.as_str() {
        "unify" => {
            let group_id = required_group_id(&args)?;
            let canonical = MemberId(
                args.get(2)
                    .ok_or_else(|| anyhow!("Missing canonical member id"))?
                    .clone(),
            );
            let outcome = merge::unify(
                &context.pool,
                UnifyRequest {
                    group_id,
                    chosen_canonical_id: canonical,
                    chosen_name: flag_value(&args, "--name"),
                    executed_by: flag_value(&args, "--by"),
                    decision_context: None,
                },
            )
            .await?;
            info!(
                "Merged group {}: {} FK rows redirected",
                outcome.group_id.0, outcome.fks_redirected
            );
        }
        "approve" => {
            let group_id = required_group_id(&args)?;
            let outcome =
                merge::approve_suggestion(&context.pool, &group_id, flag_value(&args, "--by"))
                    .await?;
            info!(
                "Approved suggestion for group {}: {} FK rows redirected",
                outcome.group_id.0, outcome.fks_redirected
            );
        }
        "auto" => {
            let ids = persist::auto_approvable_group_ids(
                &context.pool,
                context.config.llm_confidence_threshold,
            )
            .await?;
            info!("{} groups are auto-approvable", ids.len());

            let results =
                merge::approve_suggestions_batch(&context.pool, &ids, flag_value(&args, "--by"))
                    .await;
            let merged = results.iter().filter(|(_, r)| r.is_ok()).count();
            info!("Auto-approval merged {} of {} groups", merged, results.len());
        }
        "impact" => {
            let group_id = required_group_id(&args)?;
            let group = fetch_required(&context, &group_id).await?;
            let impacts = impact::analyze_group(&context.pool, &group).await?;
            for member in &impacts {
                info!(
                    "{} ({}) -> {} inbound references",
                    member.member_id.0, member.member_name, member.total_references
                );
                for (table, count) in &member.per_table_counts {
                    if *count > 0 {
                        info!("    {}: {}", table, count);
                    }
                }
            }
        }
        "revert" => {
            let group_id = required_group_id(&args)?;
            let outcome = merge::revert(&context.pool, &group_id).await?;
            info!(
                "Reverted group {}: {} rows restored, {} members un-excluded",
                outcome.group_id.0, outcome.rows_restored, outcome.members_restored
            );
        }
        "discard" => {
            let group_id = required_group_id(&args)?;
            persist::discard_group(&context.pool, &group_id).await?;
            info!("Discarded group {}", group_id.0);
        }
        other => {
            return Err(anyhow!(
                "Unknown command {:?}; expected unify, approve, auto, impact, revert or discard",
                other
            ));
        }
    }

    Ok(())
}
