// tests/detection_scenarios.rs
//
// End-to-end shapes of the pure pipeline stages: discovery output
// through clustering, normalization and canonical suggestion, driven
// through the crate's public API.

use geodedupe::detection::cluster::cluster_pairs;
use geodedupe::enrich::{majority_vote, suggest_canonical};
use geodedupe::models::{EntityKind, MemberId, SimilarPair};
use geodedupe::normalize::{fold, fold_with_prefixes};
use geodedupe::similarity::dice_bigram;

fn pair(
    a: &str,
    b: &str,
    name_a: &str,
    name_b: &str,
    score: f64,
    parent: &str,
) -> SimilarPair {
    SimilarPair {
        id_a: MemberId(a.to_string()),
        id_b: MemberId(b.to_string()),
        name_a: name_a.to_string(),
        name_b: name_b.to_string(),
        parent_id: Some(parent.to_string()),
        score,
    }
}

#[test]
fn neighborhood_variants_cluster_into_one_normalized_group() {
    let pairs = vec![
        pair("a", "b", "Jardim Aurora", "Jd Aurora", 0.85, "100"),
        pair("b", "c", "Jd Aurora", "JARDIM AURORA", 0.90, "100"),
    ];

    let groups = cluster_pairs(EntityKind::Neighborhood, &pairs);
    assert_eq!(groups.len(), 1);

    let group = &groups[0];
    assert_eq!(group.member_ids.len(), 3);
    assert_eq!(group.mean_score, 0.88);
    assert_eq!(group.parent_id.as_deref(), Some("100"));
    assert_eq!(group.normalized_name, "aurora");
}

#[test]
fn identical_names_in_different_cities_never_share_a_group() {
    let pairs = vec![
        pair("1a", "1b", "Centro", "Centro Histórico", 0.70, "100"),
        pair("2a", "2b", "Centro", "Centro Histórico", 0.70, "200"),
    ];

    let groups = cluster_pairs(EntityKind::Neighborhood, &pairs);
    assert_eq!(groups.len(), 2);

    for group in &groups {
        let parents: Vec<_> = group.member_ids.iter().map(|id| &id.0[..1]).collect();
        assert!(
            parents.windows(2).all(|w| w[0] == w[1]),
            "group mixed members across scopes: {:?}",
            group.member_ids
        );
    }
    assert_eq!(groups[0].parent_id.as_deref(), Some("100"));
    assert_eq!(groups[1].parent_id.as_deref(), Some("200"));
}

#[test]
fn postal_vote_elects_the_dominant_spelling() {
    // Ten codes: seven accented hits, two unaccented, one miss upstream.
    let mut votes = Vec::new();
    votes.extend(std::iter::repeat("Jardim América".to_string()).take(7));
    votes.extend(std::iter::repeat("Jardim America".to_string()).take(2));

    let (winner, score) = majority_vote(&votes).unwrap();
    assert_eq!(winner, "Jardim América");
    assert!((score - 0.7778).abs() < 1e-4);
}

#[test]
fn suggestion_matches_the_registry_spelling() {
    let ids = vec![MemberId("x".into()), MemberId("y".into())];
    let names = vec!["Sao Paulo".to_string(), "S. Paulo".to_string()];

    assert_eq!(dice_bigram(&fold("Sao Paulo"), &fold("São Paulo")), 1.0);
    let suggested = suggest_canonical(&ids, &names, "São Paulo").unwrap();
    assert_eq!(suggested, MemberId("x".into()));
}

#[test]
fn folding_agrees_between_kinds_only_where_prefixes_allow() {
    // Same spelling, different kind registries.
    assert_eq!(
        fold_with_prefixes("Residencial Aurora", EntityKind::Neighborhood),
        "aurora"
    );
    assert_eq!(
        fold_with_prefixes("Residencial Aurora", EntityKind::Condo),
        "aurora"
    );
    assert_eq!(
        fold_with_prefixes("Residencial Aurora", EntityKind::Street),
        "residencial aurora"
    );
}
