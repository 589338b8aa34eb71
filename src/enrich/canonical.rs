// src/enrich/canonical.rs

use futures::future::join_all;
use log::{debug, info};
use std::collections::HashMap;

use crate::models::{CanonicalResolution, CanonicalSource, EntityKind, MemberContext, MemberId};
use crate::normalize::fold;
use crate::resolvers::Resolvers;
use crate::similarity::dice_bigram;

/// Minimum Dice score for a registry hit to count as a match.
const REGISTRY_MATCH_THRESHOLD: f64 = 0.5;

/// Picks the most frequent value. Score is wins over total votes; ties
/// break toward the first-seen value so the tally is deterministic for a
/// given input order.
pub fn majority_vote(votes: &[String]) -> Option<(String, f64)> {
    if votes.is_empty() {
        return None;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for vote in votes {
        *counts.entry(vote.as_str()).or_insert(0) += 1;
    }

    let mut winner: Option<(&str, usize)> = None;
    for vote in votes {
        let count = counts[vote.as_str()];
        match winner {
            Some((_, best)) if count <= best => {}
            _ => winner = Some((vote.as_str(), count)),
        }
    }

    winner.map(|(value, wins)| (value.to_string(), wins as f64 / votes.len() as f64))
}

/// Arg-max member by bigram-Dice similarity against the canonical name;
/// first-seen member wins ties.
pub fn suggest_canonical(
    member_ids: &[MemberId],
    member_names: &[String],
    canonical_name: &str,
) -> Option<MemberId> {
    let folded_canonical = fold(canonical_name);
    let mut best: Option<(usize, f64)> = None;

    for (index, name) in member_names.iter().enumerate() {
        let score = dice_bigram(&fold(name), &folded_canonical);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((index, score)),
        }
    }

    best.and_then(|(index, _)| member_ids.get(index).cloned())
}

fn first_context_value<'a>(
    contexts: &'a [MemberContext],
    pick: impl Fn(&'a MemberContext) -> Option<&'a str>,
) -> Option<&'a str> {
    contexts.iter().find_map(pick)
}

/// Runs the per-kind authoritative-name cascade. A `None` means every
/// source missed; the group stays usable without a canonical name.
pub async fn resolve_canonical(
    resolvers: &Resolvers,
    kind: EntityKind,
    member_names: &[String],
    contexts: &[MemberContext],
) -> Option<CanonicalResolution> {
    if member_names.is_empty() {
        return None;
    }

    match kind {
        EntityKind::City => resolve_city(resolvers, member_names, contexts).await,
        EntityKind::Neighborhood => resolve_neighborhood(resolvers, member_names, contexts).await,
        EntityKind::Street => resolve_street(resolvers, member_names, contexts).await,
        EntityKind::Condo => resolve_condo(resolvers, member_names, contexts).await,
    }
}

async fn resolve_city(
    resolvers: &Resolvers,
    member_names: &[String],
    contexts: &[MemberContext],
) -> Option<CanonicalResolution> {
    let state = first_context_value(contexts, |c| c.state_code.as_deref())?;
    let folded_member = fold(&member_names[0]);

    let municipalities = resolvers.registry.municipalities(state).await;
    let mut best: Option<(&str, f64)> = None;
    for municipality in &municipalities {
        let score = dice_bigram(&folded_member, &fold(&municipality.name));
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((municipality.name.as_str(), score)),
        }
    }

    if let Some((name, score)) = best {
        if score >= REGISTRY_MATCH_THRESHOLD {
            debug!(
                "Enrichment: registry matched {:?} -> {:?} ({:.2})",
                member_names[0], name, score
            );
            return Some(CanonicalResolution {
                name: name.to_string(),
                source: CanonicalSource::Registry,
                score,
                address: None,
            });
        }
    }

    let query = format!("{}, {}", member_names[0], state);
    let geocoded = resolvers.google.geocode(&query).await?;
    let name = geocoded.city?;
    Some(CanonicalResolution {
        name,
        source: CanonicalSource::Geocoder,
        score: 0.8,
        address: geocoded.formatted_address,
    })
}

async fn resolve_neighborhood(
    resolvers: &Resolvers,
    member_names: &[String],
    contexts: &[MemberContext],
) -> Option<CanonicalResolution> {
    // Every context CEP across all members, in member order, de-duplicated.
    let mut codes: Vec<&str> = Vec::new();
    for context in contexts {
        for code in &context.postal_codes {
            if !codes.contains(&code.as_str()) {
                codes.push(code);
            }
        }
    }

    if !codes.is_empty() {
        // Lookups fan out concurrently; the tally waits for every outcome
        // so one slow or failing code never skews the vote.
        let lookups = join_all(codes.iter().map(|code| resolvers.postal.lookup(code))).await;

        let votes: Vec<String> = lookups
            .into_iter()
            .filter_map(|address| address.and_then(|a| a.neighborhood))
            .collect();

        if let Some((name, score)) = majority_vote(&votes) {
            info!(
                "Enrichment: CEP vote elected {:?} with {:.4} over {} resolved codes",
                name,
                score,
                votes.len()
            );
            return Some(CanonicalResolution {
                name,
                source: CanonicalSource::PostalCep,
                score,
                address: None,
            });
        }
    }

    let city = first_context_value(contexts, |c| c.city_name.as_deref()).unwrap_or("");
    let state = first_context_value(contexts, |c| c.state_code.as_deref()).unwrap_or("");
    let query = format!("{}, {}, {}", member_names[0], city, state);
    let geocoded = resolvers.google.geocode(&query).await?;
    let name = geocoded.neighborhood?;
    Some(CanonicalResolution {
        name,
        source: CanonicalSource::Geocoder,
        score: 0.8,
        address: geocoded.formatted_address,
    })
}

async fn resolve_street(
    resolvers: &Resolvers,
    member_names: &[String],
    contexts: &[MemberContext],
) -> Option<CanonicalResolution> {
    // First member with a CEP that resolves to a named street wins.
    for context in contexts {
        for code in &context.postal_codes {
            if let Some(address) = resolvers.postal.lookup(code).await {
                if let Some(street) = address.street {
                    return Some(CanonicalResolution {
                        name: street,
                        source: CanonicalSource::PostalCep,
                        score: 1.0,
                        address: None,
                    });
                }
            }
        }
    }

    let city = first_context_value(contexts, |c| c.city_name.as_deref()).unwrap_or("");
    let state = first_context_value(contexts, |c| c.state_code.as_deref()).unwrap_or("");
    let query = format!("{}, {}, {}", member_names[0], city, state);
    let geocoded = resolvers.google.geocode(&query).await?;
    let name = geocoded.street?;
    Some(CanonicalResolution {
        name,
        source: CanonicalSource::Geocoder,
        score: 0.8,
        address: geocoded.formatted_address,
    })
}

async fn resolve_condo(
    resolvers: &Resolvers,
    member_names: &[String],
    contexts: &[MemberContext],
) -> Option<CanonicalResolution> {
    let city = first_context_value(contexts, |c| c.city_name.as_deref()).unwrap_or("");
    let state = first_context_value(contexts, |c| c.state_code.as_deref()).unwrap_or("");

    for name in member_names {
        let query = format!("{}, {}, {}", name, city, state);
        if let Some(place) = resolvers.google.find_place(&query).await {
            return Some(CanonicalResolution {
                name: place.name,
                source: CanonicalSource::Places,
                score: 0.9,
                address: Some(place.formatted_address),
            });
        }
    }

    // The geocoder confirms the location, not the name: keep the first
    // member's spelling and attach the geocoded address.
    let street = first_context_value(contexts, |c| c.street_name.as_deref()).unwrap_or("");
    let neighborhood =
        first_context_value(contexts, |c| c.neighborhood_name.as_deref()).unwrap_or("");
    let query = format!(
        "{}, {}, {}, {}, {}",
        member_names[0], street, neighborhood, city, state
    );
    let geocoded = resolvers.google.geocode(&query).await?;
    Some(CanonicalResolution {
        name: member_names[0].clone(),
        source: CanonicalSource::Geocoder,
        score: 0.7,
        address: geocoded.formatted_address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_elects_the_most_frequent_value() {
        let mut votes: Vec<String> = Vec::new();
        votes.extend(std::iter::repeat("Jardim América".to_string()).take(7));
        votes.extend(std::iter::repeat("Jardim America".to_string()).take(2));

        let (winner, score) = majority_vote(&votes).unwrap();
        assert_eq!(winner, "Jardim América");
        assert!((score - 7.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn vote_ties_break_toward_first_seen() {
        let votes = vec![
            "Setor Oeste".to_string(),
            "Setor Leste".to_string(),
            "Setor Leste".to_string(),
            "Setor Oeste".to_string(),
        ];
        let (winner, score) = majority_vote(&votes).unwrap();
        assert_eq!(winner, "Setor Oeste");
        assert_eq!(score, 0.5);
    }

    #[test]
    fn empty_votes_mean_no_winner() {
        assert!(majority_vote(&[]).is_none());
    }

    #[test]
    fn suggestion_picks_closest_member() {
        let ids = vec![
            MemberId("a".into()),
            MemberId("b".into()),
            MemberId("c".into()),
        ];
        let names = vec![
            "Jd America".to_string(),
            "Jardim América".to_string(),
            "J. America".to_string(),
        ];
        let suggested = suggest_canonical(&ids, &names, "Jardim América").unwrap();
        assert_eq!(suggested, MemberId("b".into()));
    }

    #[test]
    fn suggestion_ties_break_toward_first_member() {
        let ids = vec![MemberId("a".into()), MemberId("b".into())];
        let names = vec!["Centro".to_string(), "Centro".to_string()];
        let suggested = suggest_canonical(&ids, &names, "Centro").unwrap();
        assert_eq!(suggested, MemberId("a".into()));
    }

    #[test]
    fn exact_registry_spelling_scores_one() {
        assert_eq!(dice_bigram(&fold("Sao Paulo"), &fold("São Paulo")), 1.0);
    }
}
