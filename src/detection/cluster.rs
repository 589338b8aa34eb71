// src/detection/cluster.rs

use log::debug;
use petgraph::unionfind::UnionFind;
use std::collections::HashMap;

use crate::models::{CandidateGroup, EntityKind, MemberId, SimilarPair};
use crate::normalize::fold_with_prefixes;

/// Clusters similar pairs into candidate groups: one group per connected
/// component of size >= 2, members in discovery order, mean edge score
/// rounded to 2 decimals.
///
/// Parents are uniform inside a component by construction (pairs are
/// scoped), so the first-seen parent labels the whole group.
pub fn cluster_pairs(kind: EntityKind, pairs: &[SimilarPair]) -> Vec<CandidateGroup> {
    if pairs.is_empty() {
        return Vec::new();
    }

    // Member ids indexed in discovery order.
    let mut index_of: HashMap<&str, usize> = HashMap::new();
    let mut ids: Vec<&MemberId> = Vec::new();
    let mut names: Vec<&str> = Vec::new();
    let mut parents: Vec<Option<&str>> = Vec::new();

    for pair in pairs {
        for (id, name) in [(&pair.id_a, &pair.name_a), (&pair.id_b, &pair.name_b)] {
            if !index_of.contains_key(id.0.as_str()) {
                index_of.insert(id.0.as_str(), ids.len());
                ids.push(id);
                names.push(name.as_str());
                parents.push(pair.parent_id.as_deref());
            }
        }
    }

    let mut union_find: UnionFind<usize> = UnionFind::new(ids.len());
    for pair in pairs {
        let a = index_of[pair.id_a.0.as_str()];
        let b = index_of[pair.id_b.0.as_str()];
        union_find.union(a, b);
    }

    // Component members, keyed by representative, in discovery order.
    let mut members_of: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut component_order: Vec<usize> = Vec::new();
    for idx in 0..ids.len() {
        let root = union_find.find(idx);
        let entry = members_of.entry(root).or_default();
        if entry.is_empty() {
            component_order.push(root);
        }
        entry.push(idx);
    }

    // Edge-score sums per component.
    let mut score_sums: HashMap<usize, (f64, usize)> = HashMap::new();
    for pair in pairs {
        let root = union_find.find(index_of[pair.id_a.0.as_str()]);
        let entry = score_sums.entry(root).or_insert((0.0, 0));
        entry.0 += pair.score;
        entry.1 += 1;
    }

    let mut groups = Vec::new();
    for root in component_order {
        let members = &members_of[&root];
        if members.len() < 2 {
            continue;
        }

        let (score_sum, edge_count) = score_sums.get(&root).copied().unwrap_or((0.0, 0));
        let mean_score = if edge_count > 0 {
            round2(score_sum / edge_count as f64)
        } else {
            0.0
        };

        let member_ids: Vec<MemberId> = members.iter().map(|&i| ids[i].clone()).collect();
        let member_names: Vec<String> = members.iter().map(|&i| names[i].to_string()).collect();
        let parent_id = members
            .iter()
            .find_map(|&i| parents[i])
            .map(|p| p.to_string());
        let normalized_name = fold_with_prefixes(&member_names[0], kind);

        groups.push(CandidateGroup {
            entity_kind: kind,
            parent_id,
            normalized_name,
            member_ids,
            member_names,
            mean_score,
        });
    }

    debug!(
        "Clustering: {} pairs -> {} groups for kind {}",
        pairs.len(),
        groups.len(),
        kind.as_str()
    );
    groups
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: &str, b: &str, name_a: &str, name_b: &str, score: f64, parent: &str) -> SimilarPair {
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
    fn transitive_variants_form_one_group() {
        let pairs = vec![
            pair("a", "b", "Jardim Aurora", "Jd Aurora", 0.85, "100"),
            pair("b", "c", "Jd Aurora", "JARDIM AURORA", 0.90, "100"),
        ];
        let groups = cluster_pairs(EntityKind::Neighborhood, &pairs);

        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(
            group.member_ids,
            vec![
                MemberId("a".into()),
                MemberId("b".into()),
                MemberId("c".into())
            ]
        );
        assert_eq!(group.mean_score, 0.88);
        assert_eq!(group.parent_id.as_deref(), Some("100"));
        assert_eq!(group.normalized_name, "aurora");
    }

    #[test]
    fn different_scopes_stay_disjoint() {
        let pairs = vec![
            pair("1a", "1b", "Centro", "Centro Histórico", 0.70, "100"),
            pair("2a", "2b", "Centro", "Centro Histórico", 0.70, "200"),
        ];
        let groups = cluster_pairs(EntityKind::Neighborhood, &pairs);

        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups[0].member_ids,
            vec![MemberId("1a".into()), MemberId("1b".into())]
        );
        assert_eq!(groups[0].parent_id.as_deref(), Some("100"));
        assert_eq!(
            groups[1].member_ids,
            vec![MemberId("2a".into()), MemberId("2b".into())]
        );
        assert_eq!(groups[1].parent_id.as_deref(), Some("200"));

        // No group mixes parents.
        for group in &groups {
            assert!(group.member_ids.len() >= 2);
        }
    }

    #[test]
    fn output_groups_are_exactly_the_connected_components() {
        // Components: {a,b,c,d} (chain), {x,y}.
        let pairs = vec![
            pair("a", "b", "Vila Nova", "Villa Nova", 0.9, "7"),
            pair("c", "d", "Vila Nova I", "Vila Nova 1", 0.8, "7"),
            pair("b", "c", "Villa Nova", "Vila Nova I", 0.6, "7"),
            pair("x", "y", "Santa Rita", "Sta Rita", 0.7, "7"),
        ];
        let groups = cluster_pairs(EntityKind::Neighborhood, &pairs);

        assert_eq!(groups.len(), 2);
        let sizes: Vec<usize> = groups.iter().map(|g| g.member_ids.len()).collect();
        assert_eq!(sizes, vec![4, 2]);
    }

    #[test]
    fn mean_score_averages_component_edges() {
        let pairs = vec![
            pair("a", "b", "A", "B", 0.5, "1"),
            pair("b", "c", "B", "C", 0.6, "1"),
            pair("c", "a", "C", "A", 0.7, "1"),
        ];
        let groups = cluster_pairs(EntityKind::Street, &pairs);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].mean_score, 0.6);
    }

    #[test]
    fn mean_score_is_rounded_to_two_decimals() {
        let pairs = vec![
            pair("a", "b", "A", "B", 0.777, "1"),
            pair("b", "c", "B", "C", 0.778, "1"),
        ];
        let groups = cluster_pairs(EntityKind::Street, &pairs);
        assert_eq!(groups[0].mean_score, 0.78);
    }

    #[test]
    fn no_pairs_no_groups() {
        assert!(cluster_pairs(EntityKind::City, &[]).is_empty());
    }

    #[test]
    fn members_keep_discovery_order() {
        let pairs = vec![
            pair("m3", "m1", "Gamma", "Alpha", 0.9, "1"),
            pair("m1", "m2", "Alpha", "Beta", 0.9, "1"),
        ];
        let groups = cluster_pairs(EntityKind::City, &pairs);
        assert_eq!(
            groups[0].member_ids,
            vec![
                MemberId("m3".into()),
                MemberId("m1".into()),
                MemberId("m2".into())
            ]
        );
        assert_eq!(groups[0].member_names, vec!["Gamma", "Alpha", "Beta"]);
    }
}
