// src/llm/validator.rs

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use crate::cache::Cache;
use crate::config::{Config, HTTP_TIMEOUT, LLM_BATCH_SIZE, LLM_CACHE_TTL};
use crate::llm::prompt::build_batch_prompt;
use crate::models::{CandidateGroup, LlmDecision, MemberContext};
use crate::normalize::fold;

/// OpenAI-compatible chat-completions adapter. Constructed only when the
/// credential is present; callers treat `None` as "validation disabled".
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl LlmClient {
    pub fn from_config(config: &Config) -> Option<Self> {
        let Some(api_key) = config.openai_api_key.clone() else {
            info!("Validator: no LLM credential configured, validation disabled");
            return None;
        };
        Some(Self {
            http: reqwest::Client::new(),
            api_key,
            model: config.openai_model.clone(),
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn chat(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(HTTP_TIMEOUT * 6)
            .json(&body)
            .send()
            .await
            .context("Validator: chat request failed")?
            .error_for_status()
            .context("Validator: chat endpoint returned an error status")?;

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Validator: failed to parse chat response")?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("Validator: chat response had no choices"))
    }
}

/// A group that survived validation, possibly trimmed, carrying the raw
/// decision for audit.
#[derive(Debug, Clone)]
pub struct ValidatedGroup {
    pub group: CandidateGroup,
    pub decision: Option<LlmDecision>,
    /// Raw validator response for this group, stored in `llm_details`.
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub accepted: Vec<ValidatedGroup>,
    pub discarded: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct BatchDecision {
    group_index: usize,
    #[serde(flatten)]
    decision: LlmDecision,
}

fn decision_cache_key(group: &CandidateGroup) -> String {
    format!("llm:{}", fold(&group.member_names.join("|")))
}

/// Chat models love fencing JSON; accept both fenced and bare output.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

/// Applies one decision to one group. Returns None when the group is
/// rejected (entirely, or trimmed below two members).
fn apply_decision(mut group: CandidateGroup, decision: &LlmDecision) -> Option<CandidateGroup> {
    if !decision.confirmed {
        return None;
    }

    if !decision.valid_member_ids.is_empty() {
        let keep: Vec<usize> = group
            .member_ids
            .iter()
            .enumerate()
            .filter(|(_, id)| decision.valid_member_ids.contains(&id.0))
            .map(|(index, _)| index)
            .collect();

        if keep.len() < 2 {
            return None;
        }

        if keep.len() < group.member_ids.len() {
            group.member_ids = keep.iter().map(|&i| group.member_ids[i].clone()).collect();
            group.member_names = keep.iter().map(|&i| group.member_names[i].clone()).collect();
        }
    }

    if !decision.canonical_name.trim().is_empty() {
        group.normalized_name = decision.canonical_name.trim().to_string();
    }

    Some(group)
}

/// Adjudicates candidate groups in fixed-size batches, consulting and
/// populating the decision cache. Batch-level failures are non-fatal:
/// the affected groups pass through unvalidated and are persisted with
/// `source = "trigram"`. Output order equals input order, so downstream
/// persistence keeps the detector's score-descending ordering.
pub async fn validate_groups(
    client: Option<&LlmClient>,
    cache: &dyn Cache,
    groups: Vec<(CandidateGroup, MemberContext)>,
) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();

    let Some(client) = client else {
        outcome.accepted = groups
            .into_iter()
            .map(|(group, _)| ValidatedGroup {
                group,
                decision: None,
                details: None,
            })
            .collect();
        return outcome;
    };

    // Phase 1: gather a decision per group (cache first, then batches),
    // keyed by original position.
    let mut decisions: Vec<Option<LlmDecision>> = vec![None; groups.len()];
    let mut uncached: Vec<usize> = Vec::new();

    for (index, (group, _)) in groups.iter().enumerate() {
        let key = decision_cache_key(group);
        match cache.get(&key).await {
            Some(raw) => match serde_json::from_str::<LlmDecision>(&raw) {
                Ok(decision) => {
                    debug!("Validator: cache hit for group {:?}", group.normalized_name);
                    decisions[index] = Some(decision);
                }
                Err(_) => uncached.push(index),
            },
            None => uncached.push(index),
        }
    }

    for chunk in uncached.chunks(LLM_BATCH_SIZE) {
        let batch: Vec<(&CandidateGroup, &MemberContext)> = chunk
            .iter()
            .map(|&index| (&groups[index].0, &groups[index].1))
            .collect();

        match adjudicate_batch(client, &batch).await {
            Ok(mut batch_decisions) => {
                for (position, &index) in chunk.iter().enumerate() {
                    match batch_decisions.remove(&position) {
                        Some(decision) => {
                            let key = decision_cache_key(&groups[index].0);
                            if let Ok(raw) = serde_json::to_string(&decision) {
                                cache.set(&key, &raw, LLM_CACHE_TTL).await;
                            }
                            decisions[index] = Some(decision);
                        }
                        None => warn!(
                            "Validator: no decision for group {:?}, keeping unvalidated",
                            groups[index].0.normalized_name
                        ),
                    }
                }
            }
            Err(e) => {
                warn!(
                    "Validator: batch of {} groups failed ({:#}); persisting unvalidated",
                    chunk.len(),
                    e
                );
            }
        }
    }

    // Phase 2: apply decisions in original order.
    for ((group, _), decision) in groups.into_iter().zip(decisions) {
        match decision {
            Some(decision) => {
                let details = serde_json::to_value(&decision).ok();
                match apply_decision(group, &decision) {
                    Some(group) => outcome.accepted.push(ValidatedGroup {
                        group,
                        decision: Some(decision),
                        details,
                    }),
                    None => outcome.discarded += 1,
                }
            }
            None => outcome.accepted.push(ValidatedGroup {
                group,
                decision: None,
                details: None,
            }),
        }
    }

    outcome
}

async fn adjudicate_batch(
    client: &LlmClient,
    batch: &[(&CandidateGroup, &MemberContext)],
) -> Result<HashMap<usize, LlmDecision>> {
    let prompt = build_batch_prompt(batch);
    let content = client.chat(&prompt).await?;

    let decisions: Vec<BatchDecision> = serde_json::from_str(strip_code_fences(&content))
        .context("Validator: response was not a valid decision array")?;

    Ok(decisions
        .into_iter()
        .map(|entry| (entry.group_index, entry.decision))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, MemberId};

    fn group(names: &[&str]) -> CandidateGroup {
        CandidateGroup {
            entity_kind: EntityKind::Neighborhood,
            parent_id: Some("100".to_string()),
            normalized_name: fold(names[0]),
            member_ids: (0..names.len())
                .map(|i| MemberId(format!("m{}", i)))
                .collect(),
            member_names: names.iter().map(|s| s.to_string()).collect(),
            mean_score: 0.8,
        }
    }

    fn decision(confirmed: bool, valid: &[&str], canonical: &str) -> LlmDecision {
        LlmDecision {
            confirmed,
            confidence: 0.9,
            canonical_name: canonical.to_string(),
            rationale: String::new(),
            valid_member_ids: valid.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn rejection_drops_the_group() {
        let g = group(&["Parque Industrial I", "Parque Industrial II"]);
        assert!(apply_decision(g, &decision(false, &[], "")).is_none());
    }

    #[test]
    fn strict_subset_trims_preserving_order() {
        let g = group(&["Jardim Aurora", "Jd Aurora", "Aurora Sul"]);
        let trimmed = apply_decision(g, &decision(true, &["m2", "m0"], "")).unwrap();
        assert_eq!(
            trimmed.member_ids,
            vec![MemberId("m0".into()), MemberId("m2".into())]
        );
        assert_eq!(trimmed.member_names, vec!["Jardim Aurora", "Aurora Sul"]);
    }

    #[test]
    fn subset_below_two_members_rejects() {
        let g = group(&["Jardim Aurora", "Jd Aurora"]);
        assert!(apply_decision(g, &decision(true, &["m0"], "")).is_none());
    }

    #[test]
    fn canonical_name_replaces_normalized_name() {
        let g = group(&["Jd América", "Jardim America"]);
        let validated = apply_decision(g, &decision(true, &[], "Jardim América")).unwrap();
        assert_eq!(validated.normalized_name, "Jardim América");
    }

    #[test]
    fn empty_valid_list_keeps_full_membership() {
        let g = group(&["Jardim Aurora", "Jd Aurora"]);
        let validated = apply_decision(g.clone(), &decision(true, &[], "")).unwrap();
        assert_eq!(validated.member_ids, g.member_ids);
    }

    #[test]
    fn unknown_ids_in_valid_list_are_ignored() {
        let g = group(&["Jardim Aurora", "Jd Aurora"]);
        let validated =
            apply_decision(g, &decision(true, &["m0", "m1", "ghost"], "")).unwrap();
        assert_eq!(validated.member_ids.len(), 2);
    }

    #[test]
    fn fenced_json_is_accepted() {
        let fenced = "```json\n[{\"group_index\":0,\"confirmed\":true}]\n```";
        let bare = strip_code_fences(fenced);
        let parsed: Vec<BatchDecision> = serde_json::from_str(bare).unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].decision.confirmed);
    }

    #[tokio::test]
    async fn disabled_client_passes_groups_through() {
        let cache = crate::cache::MemoryCache::new();
        let outcome = validate_groups(
            None,
            &cache,
            vec![(group(&["Jardim Aurora", "Jd Aurora"]), MemberContext::default())],
        )
        .await;
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.discarded, 0);
        assert!(outcome.accepted[0].decision.is_none());
    }
}
