// src/normalize.rs

use crate::models::EntityKind;
use unicode_normalization::UnicodeNormalization;

/// Leading tokens stripped before comparing names of a given kind. The
/// host data is full of "Jardim X" / "Jd X" / "X" spellings of the same
/// neighborhood, and "Edifício Y" / "Ed. Y" / "Y" condos.
fn prefixes_for(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Neighborhood => &[
            "setor",
            "jardim",
            "parque",
            "vila",
            "residencial",
            "conjunto",
            "nucleo",
            "bairro",
        ],
        EntityKind::Condo => &[
            "edificio",
            "condominio",
            "residencial",
            "torre",
            "bloco",
            "ed",
            "cond",
        ],
        EntityKind::Street | EntityKind::City => &[],
    }
}

/// Whole-word numeral spellings rewritten to Arabic digits, so that
/// "Belvedere II" and "Belvedere 2" fold to the same string while
/// "Belvedere 1" and "Belvedere 2" stay distinct.
const NUMERAL_TABLE: [(&str, &str); 15] = [
    ("i", "1"),
    ("ii", "2"),
    ("iii", "3"),
    ("iv", "4"),
    ("v", "5"),
    ("vi", "6"),
    ("vii", "7"),
    ("viii", "8"),
    ("ix", "9"),
    ("x", "10"),
    ("um", "1"),
    ("dois", "2"),
    ("tres", "3"),
    ("quatro", "4"),
    ("cinco", "5"),
];

/// Case-and-accent fold: lowercase, decompose, strip combining marks,
/// collapse whitespace runs, trim. Idempotent.
pub fn fold(s: &str) -> String {
    let stripped: String = s
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect();

    stripped
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `fold` plus per-kind prefix stripping and numeral rewriting.
///
/// Only the first leading prefix token is removed, and only when it is
/// followed by more text ("Jardim Aurora" -> "aurora", but a bare
/// "Jardim" survives).
pub fn fold_with_prefixes(s: &str, kind: EntityKind) -> String {
    let mut folded = fold(s);

    for prefix in prefixes_for(kind) {
        if let Some(rest) = folded.strip_prefix(prefix) {
            if let Some(rest) = rest.strip_prefix(' ') {
                if !rest.is_empty() {
                    folded = rest.to_string();
                }
                break;
            }
        }
    }

    let rewritten: Vec<&str> = folded
        .split_whitespace()
        .map(|token| {
            NUMERAL_TABLE
                .iter()
                .find(|(word, _)| *word == token)
                .map(|(_, digit)| *digit)
                .unwrap_or(token)
        })
        .collect();

    rewritten.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_strips_accents_and_case() {
        assert_eq!(fold("São Paulo"), "sao paulo");
        assert_eq!(fold("JARDIM  AMÉRICA"), "jardim america");
        assert_eq!(fold("  Goiânia "), "goiania");
    }

    #[test]
    fn fold_is_idempotent() {
        for s in [
            "São Geraldo do Baixio",
            "Edifício Aurora",
            "SETOR MARISTA SUL",
            "Centro Histórico",
            "",
            "   ",
        ] {
            let once = fold(s);
            assert_eq!(fold(&once), once, "fold not idempotent for {:?}", s);
        }
    }

    #[test]
    fn neighborhood_prefixes_are_stripped() {
        assert_eq!(
            fold_with_prefixes("Jardim Aurora", EntityKind::Neighborhood),
            "aurora"
        );
        assert_eq!(
            fold_with_prefixes("Setor Marista", EntityKind::Neighborhood),
            "marista"
        );
        assert_eq!(
            fold_with_prefixes("Vila Nova", EntityKind::Neighborhood),
            "nova"
        );
    }

    #[test]
    fn condo_prefixes_are_stripped() {
        assert_eq!(
            fold_with_prefixes("Edifício Aurora", EntityKind::Condo),
            "aurora"
        );
        assert_eq!(fold_with_prefixes("Ed Solar", EntityKind::Condo), "solar");
    }

    #[test]
    fn only_the_first_leading_prefix_is_removed() {
        // "residencial" is registered too, but only the leading token goes.
        assert_eq!(
            fold_with_prefixes("Jardim Residencial Aurora", EntityKind::Neighborhood),
            "residencial aurora"
        );
        // Prefix in the middle of the name is left alone.
        assert_eq!(
            fold_with_prefixes("Alto do Parque", EntityKind::Neighborhood),
            "alto do parque"
        );
    }

    #[test]
    fn bare_prefix_is_kept() {
        assert_eq!(
            fold_with_prefixes("Jardim", EntityKind::Neighborhood),
            "jardim"
        );
    }

    #[test]
    fn street_and_city_have_no_prefixes() {
        assert_eq!(
            fold_with_prefixes("Jardim Aurora", EntityKind::Street),
            "jardim aurora"
        );
        assert_eq!(
            fold_with_prefixes("Vila Velha", EntityKind::City),
            "vila velha"
        );
    }

    #[test]
    fn prefix_fold_is_idempotent_within_kind() {
        for (s, kind) in [
            ("Jardim Aurora", EntityKind::Neighborhood),
            ("Setor Marista Sul", EntityKind::Neighborhood),
            ("Edifício Belvedere II", EntityKind::Condo),
            ("Rua das Flores", EntityKind::Street),
            ("São Paulo", EntityKind::City),
        ] {
            let once = fold_with_prefixes(s, kind);
            assert_eq!(
                fold_with_prefixes(&once, kind),
                once,
                "prefix fold not idempotent for {:?}",
                s
            );
        }
    }

    #[test]
    fn roman_and_word_numerals_become_arabic() {
        assert_eq!(
            fold_with_prefixes("Belvedere II", EntityKind::Condo),
            "belvedere 2"
        );
        assert_eq!(
            fold_with_prefixes("Parque Industrial IX", EntityKind::Neighborhood),
            "industrial 9"
        );
        assert_eq!(
            fold_with_prefixes("Residencial Flores Dois", EntityKind::Condo),
            "flores 2"
        );
        assert_eq!(
            fold_with_prefixes("Setor Três", EntityKind::Neighborhood),
            "3"
        );
    }

    #[test]
    fn numeral_suffixes_stay_distinct() {
        for base in ["Parque Industrial", "Belvedere", "Setor Sul"] {
            let one = fold_with_prefixes(&format!("{} I", base), EntityKind::Neighborhood);
            let two = fold_with_prefixes(&format!("{} II", base), EntityKind::Neighborhood);
            assert_ne!(one, two, "numeral suffix collapsed for base {:?}", base);
        }
    }

    #[test]
    fn spelling_variants_converge() {
        let a = fold_with_prefixes("Jardim América", EntityKind::Neighborhood);
        let b = fold_with_prefixes("jardim america", EntityKind::Neighborhood);
        assert_eq!(a, b);
        assert_eq!(a, "america");
    }
}
