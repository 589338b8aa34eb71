// src/config.rs

use anyhow::{Context, Result};
use log::warn;
use std::time::Duration;

/// Number of groups adjudicated per LLM prompt.
pub const LLM_BATCH_SIZE: usize = 10;

/// TTL for cached validator decisions.
pub const LLM_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Per-request timeout for every external HTTP call.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Wall-clock timeout applied to merge / revert transactions.
pub const TRANSACTION_TIMEOUT_MS: i64 = 30_000;

/// Enrichment batch size for re-enrichment passes.
pub const ENRICH_BATCH_SIZE: i64 = 10;

/// Runtime configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host database DSN. The only required variable.
    pub database_url: String,
    /// Trigram similarity threshold for the detector.
    pub similarity_threshold: f32,
    /// Validator confidence required before a group is auto-approvable.
    pub llm_confidence_threshold: f64,
    /// Max similar pairs returned per scoped detection query.
    pub max_pairs_per_run: i64,
    /// Gates the whole enrichment phase.
    pub enrichment_enabled: bool,
    /// Max postal codes gathered per member context.
    pub max_ceps_per_member: i64,
    pub viacep_cache_ttl: Duration,
    pub google_cache_ttl: Duration,
    /// Absent key disables the LLM validator.
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    /// Absent key disables the geocoder and Places resolvers.
    pub google_maps_api_key: Option<String>,
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                warn!("Invalid {} value {:?}: {}. Using default.", name, raw, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "sim"),
        Err(_) => default,
    }
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Reads configuration from the environment. A missing `DATABASE_URL`
    /// is the one fatal case; everything else falls back to defaults.
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set (host database DSN)")?;

        let viacep_ttl_days: u64 = env_parsed("VIACEP_CACHE_TTL_DIAS", 7u64);
        let google_ttl_days: u64 = env_parsed("GOOGLE_CACHE_TTL_DIAS", 30u64);

        Ok(Self {
            database_url,
            similarity_threshold: env_parsed("THRESHOLD_SIMILARIDADE", 0.4f32),
            llm_confidence_threshold: env_parsed("THRESHOLD_LLM", 0.8f64),
            max_pairs_per_run: env_parsed("LIMITE_PARES_POR_EXECUCAO", 200i64),
            enrichment_enabled: env_bool("ENRIQUECIMENTO_HABILITADO", true),
            max_ceps_per_member: env_parsed("VIACEP_MAX_CEPS_POR_MEMBRO", 10i64),
            viacep_cache_ttl: Duration::from_secs(viacep_ttl_days * 24 * 60 * 60),
            google_cache_ttl: Duration::from_secs(google_ttl_days * 24 * 60 * 60),
            openai_api_key: env_optional("OPENAI_API_KEY"),
            openai_model: std::env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            openai_base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            google_maps_api_key: env_optional("GOOGLE_MAPS_API_KEY"),
        })
    }
}
