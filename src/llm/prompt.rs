// src/llm/prompt.rs

use crate::models::{CandidateGroup, EntityKind, MemberContext};

/// The adjudication rule set. The validator's behavior depends on this
/// exact wording; it is embedded verbatim in every prompt variant and
/// versioned with the code. Do not rephrase casually.
pub const VALIDATION_RUBRIC: &str = "\
REGRAS DE VALIDACAO:
1. SUFIXO NUMERICO DISTINTO: membros cuja unica diferenca e um numeral romano ou arabico no final (I/1, II/2, III/3, ...) sao lugares DISTINTOS, nao duplicatas.
2. DIRECAO CARDEAL DISTINTA: membros que diferem apenas por Norte/Sul/Leste/Oeste sao lugares DISTINTOS.
3. COMPLEMENTO GEOGRAFICO DISTINTO (cidades): um nome de cidade com complemento geografico extra (ex.: \"São Geraldo\" vs \"São Geraldo do Baixio\") e um municipio DIFERENTE; cada codigo de registro e uma entidade separada.
4. COMPLEMENTO DE SETOR DISTINTO (bairros): \"Setor Marista\" vs \"Setor Marista Sul\" sao bairros distintos.
5. VARIACAO DE GRAFIA EQUIVALENTE: variantes do mesmo nome (acentos, maiusculas, espacos internos) sao duplicatas.
6. ABREVIACAO EQUIVALENTE: \"Ed. Aurora\" equivale a \"Edifício Aurora\".
7. EQUIVALENCIA DE PREFIXO POSSIVEL: \"Condomínio X\", \"Residencial X\" e \"X\" podem ser o mesmo lugar se o contexto confirmar.
8. NUMERAL AUSENTE vs PRESENTE: um nome sem numeral vs o mesmo nome com numeral (ex.: \"Belvedere\" vs \"Belvedere 1\") e uma duplicata POSSIVEL - use o endereco completo e o contexto para confirmar.";

fn kind_label(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::City => "cidade",
        EntityKind::Neighborhood => "bairro",
        EntityKind::Street => "rua",
        EntityKind::Condo => "condominio",
    }
}

fn context_line(context: &MemberContext) -> String {
    let mut parts = Vec::new();
    if let Some(street) = &context.street_name {
        parts.push(format!("rua: {}", street));
    }
    if let Some(neighborhood) = &context.neighborhood_name {
        parts.push(format!("bairro: {}", neighborhood));
    }
    if let Some(city) = &context.city_name {
        parts.push(format!("cidade: {}", city));
    }
    if let Some(state) = &context.state_code {
        parts.push(format!("UF: {}", state));
    }
    if parts.is_empty() {
        "(sem contexto)".to_string()
    } else {
        parts.join(", ")
    }
}

/// Builds one batch prompt: the rubric, the groups with their candidate
/// members and resolved geographic context, and the expected response
/// shape.
pub fn build_batch_prompt(batch: &[(&CandidateGroup, &MemberContext)]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Voce valida grupos de possiveis duplicatas em dados geograficos de referencia \
         (cidades, bairros, ruas, condominios). Para cada grupo, decida se os membros \
         listados sao de fato o MESMO lugar real.\n\n",
    );
    prompt.push_str(VALIDATION_RUBRIC);
    prompt.push_str("\n\nGRUPOS:\n");

    for (index, &(group, context)) in batch.iter().enumerate() {
        prompt.push_str(&format!(
            "\nGrupo {} (tipo: {}, contexto: {}):\n",
            index,
            kind_label(group.entity_kind),
            context_line(context)
        ));
        for (member_id, member_name) in group.member_ids.iter().zip(&group.member_names) {
            prompt.push_str(&format!("  - [{}] {}\n", member_id.0, member_name));
        }
    }

    prompt.push_str(
        "\nResponda SOMENTE com um array JSON, um objeto por grupo, no formato:\n\
         [{\"group_index\": 0, \"confirmed\": true, \"confidence\": 0.95, \
         \"canonical_name\": \"...\", \"rationale\": \"...\", \
         \"valid_member_ids\": [\"...\"]}]\n\
         Use \"valid_member_ids\" para listar apenas os membros que sao duplicatas \
         entre si; um subconjunto estrito indica rejeicao parcial. \
         \"canonical_name\" e a melhor grafia oficial do lugar.",
    );

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemberId;

    fn sample_group(kind: EntityKind) -> (CandidateGroup, MemberContext) {
        let group = CandidateGroup {
            entity_kind: kind,
            parent_id: Some("100".to_string()),
            normalized_name: "aurora".to_string(),
            member_ids: vec![MemberId("a".into()), MemberId("b".into())],
            member_names: vec!["Jardim Aurora".to_string(), "Jd Aurora".to_string()],
            mean_score: 0.88,
        };
        let context = MemberContext {
            member_id: "a".to_string(),
            member_name: "Jardim Aurora".to_string(),
            city_name: Some("Goiânia".to_string()),
            state_code: Some("GO".to_string()),
            ..Default::default()
        };
        (group, context)
    }

    #[test]
    fn rubric_is_embedded_verbatim_in_every_prompt() {
        for kind in EntityKind::ALL {
            let (group, context) = sample_group(kind);
            let prompt = build_batch_prompt(&[(&group, &context)]);
            assert!(
                prompt.contains(VALIDATION_RUBRIC),
                "rubric missing for kind {:?}",
                kind
            );
        }
    }

    #[test]
    fn rubric_covers_all_eight_rules() {
        for marker in [
            "SUFIXO NUMERICO DISTINTO",
            "DIRECAO CARDEAL DISTINTA",
            "COMPLEMENTO GEOGRAFICO DISTINTO",
            "COMPLEMENTO DE SETOR DISTINTO",
            "VARIACAO DE GRAFIA EQUIVALENTE",
            "ABREVIACAO EQUIVALENTE",
            "EQUIVALENCIA DE PREFIXO POSSIVEL",
            "NUMERAL AUSENTE vs PRESENTE",
        ] {
            assert!(VALIDATION_RUBRIC.contains(marker), "missing rule: {}", marker);
        }
        assert!(VALIDATION_RUBRIC.contains("Norte/Sul/Leste/Oeste"));
        assert!(VALIDATION_RUBRIC.contains("São Geraldo do Baixio"));
    }

    #[test]
    fn prompt_lists_members_with_ids_and_context() {
        let (group, context) = sample_group(EntityKind::Neighborhood);
        let prompt = build_batch_prompt(&[(&group, &context)]);
        assert!(prompt.contains("[a] Jardim Aurora"));
        assert!(prompt.contains("[b] Jd Aurora"));
        assert!(prompt.contains("tipo: bairro"));
        assert!(prompt.contains("cidade: Goiânia"));
        assert!(prompt.contains("UF: GO"));
    }

    #[test]
    fn prompt_indexes_groups_in_batch_order() {
        let first = sample_group(EntityKind::Neighborhood);
        let second = sample_group(EntityKind::Neighborhood);
        let prompt = build_batch_prompt(&[(&first.0, &first.1), (&second.0, &second.1)]);
        assert!(prompt.contains("Grupo 0"));
        assert!(prompt.contains("Grupo 1"));
    }
}
