// src/similarity.rs

use std::collections::HashMap;

/// Sørensen–Dice similarity over multisets of consecutive 2-character
/// substrings: `2·|A∩B| / (|A|+|B|)`, in [0, 1].
///
/// Strings shorter than two characters have no bigrams; two such strings
/// score 1.0 only when they are identical.
pub fn dice_bigram(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    let bigrams_a = bigram_counts(a);
    let bigrams_b = bigram_counts(b);

    let total_a: usize = bigrams_a.values().sum();
    let total_b: usize = bigrams_b.values().sum();

    if total_a == 0 || total_b == 0 {
        return 0.0;
    }

    let mut intersection = 0usize;
    for (bigram, count_a) in &bigrams_a {
        if let Some(count_b) = bigrams_b.get(bigram) {
            intersection += (*count_a).min(*count_b);
        }
    }

    (2 * intersection) as f64 / (total_a + total_b) as f64
}

fn bigram_counts(s: &str) -> HashMap<(char, char), usize> {
    let chars: Vec<char> = s.chars().collect();
    let mut counts = HashMap::new();
    for window in chars.windows(2) {
        *counts.entry((window[0], window[1])).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_strings_score_one() {
        assert_eq!(dice_bigram("sao paulo", "sao paulo"), 1.0);
        assert_eq!(dice_bigram("", ""), 1.0);
        assert_eq!(dice_bigram("a", "a"), 1.0);
    }

    #[test]
    fn disjoint_strings_score_zero() {
        assert_eq!(dice_bigram("abc", "xyz"), 0.0);
        assert_eq!(dice_bigram("a", "b"), 0.0);
        assert_eq!(dice_bigram("abc", ""), 0.0);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let samples = [
            ("jardim america", "jardim américa"),
            ("aurora", "jd aurora"),
            ("centro", "centro historico"),
            ("belvedere 1", "belvedere 2"),
            ("goiania", "goianira"),
        ];
        for (a, b) in samples {
            let score = dice_bigram(a, b);
            assert!((0.0..=1.0).contains(&score), "{} vs {} -> {}", a, b, score);
            assert!(score < 1.0, "distinct strings {} vs {} scored 1.0", a, b);
        }
    }

    #[test]
    fn similarity_is_symmetric() {
        let pairs = [("centro", "centro historico"), ("aurora", "jd aurora")];
        for (a, b) in pairs {
            assert_eq!(dice_bigram(a, b), dice_bigram(b, a));
        }
    }

    #[test]
    fn repeated_bigrams_are_counted_as_a_multiset() {
        // "aaaa" has three "aa" bigrams, "aa" has one; 2*1/(3+1) = 0.5.
        assert_eq!(dice_bigram("aaaa", "aa"), 0.5);
    }

    #[test]
    fn closer_names_score_higher() {
        let near = dice_bigram("goiania", "goiânia".to_lowercase().as_str());
        let far = dice_bigram("goiania", "anapolis");
        assert!(near > far);
    }
}
