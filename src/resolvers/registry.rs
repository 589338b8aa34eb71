// src/resolvers/registry.rs

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, MISS_SENTINEL};
use crate::config::HTTP_TIMEOUT;

const IBGE_BASE_URL: &str = "https://servicodados.ibge.gov.br/api/v1/localidades";

/// One municipality from the authoritative per-state registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Municipality {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct IbgeMunicipio {
    id: i64,
    nome: String,
}

/// IBGE municipality-registry adapter. The registry is public (no
/// credential); results are cached per state with a long TTL because the
/// municipality list changes on a legislative timescale.
pub struct IbgeRegistry {
    http: reqwest::Client,
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl IbgeRegistry {
    pub fn new(http: reqwest::Client, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { http, cache, ttl }
    }

    /// All municipalities of a state. An empty vec is a miss; failures
    /// never propagate past this boundary.
    pub async fn municipalities(&self, state: &str) -> Vec<Municipality> {
        let state = state.trim().to_uppercase();
        if state.is_empty() {
            return Vec::new();
        }

        let key = format!("ibge:municipios:{}", state);
        if let Some(cached) = self.cache.get(&key).await {
            if cached == MISS_SENTINEL {
                return Vec::new();
            }
            if let Ok(parsed) = serde_json::from_str::<Vec<Municipality>>(&cached) {
                debug!("Registry: cache hit for state {}", state);
                return parsed;
            }
        }

        let url = format!("{}/estados/{}/municipios", IBGE_BASE_URL, state);
        let response = match self.http.get(&url).timeout(HTTP_TIMEOUT).send().await {
            Ok(response) => response,
            Err(e) => {
                // Transport errors are not cached; the next pass retries.
                warn!("Registry: request failed for state {}: {}", state, e);
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            warn!(
                "Registry: HTTP {} for state {}, caching miss",
                response.status(),
                state
            );
            self.cache.set(&key, MISS_SENTINEL, self.ttl).await;
            return Vec::new();
        }

        let rows: Vec<IbgeMunicipio> = match response.json().await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Registry: bad payload for state {}: {}", state, e);
                return Vec::new();
            }
        };

        let municipalities: Vec<Municipality> = rows
            .into_iter()
            .map(|row| Municipality {
                id: row.id,
                name: row.nome,
            })
            .collect();

        if municipalities.is_empty() {
            self.cache.set(&key, MISS_SENTINEL, self.ttl).await;
        } else if let Ok(raw) = serde_json::to_string(&municipalities) {
            self.cache.set(&key, &raw, self.ttl).await;
        }

        municipalities
    }
}
