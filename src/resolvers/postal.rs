// src/resolvers/postal.rs

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, MISS_SENTINEL};
use crate::config::HTTP_TIMEOUT;

const VIACEP_BASE_URL: &str = "https://viacep.com.br/ws";

/// Address fields returned by the postal directory for one CEP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostalAddress {
    pub street: Option<String>,
    pub neighborhood: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ViaCepPayload {
    #[serde(default)]
    logradouro: Option<String>,
    #[serde(default)]
    bairro: Option<String>,
    #[serde(default)]
    localidade: Option<String>,
    #[serde(default)]
    uf: Option<String>,
    #[serde(default)]
    erro: Option<serde_json::Value>,
}

/// ViaCEP directory adapter. Input codes are digit-stripped; anything
/// that is not 8 digits is a local miss without a network call.
pub struct ViaCepClient {
    http: reqwest::Client,
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ViaCepClient {
    pub fn new(http: reqwest::Client, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { http, cache, ttl }
    }

    pub async fn lookup(&self, code: &str) -> Option<PostalAddress> {
        let digits: String = code.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() != 8 {
            debug!("PostalCEP: rejecting malformed code {:?}", code);
            return None;
        }

        let key = format!("viacep:{}", digits);
        if let Some(cached) = self.cache.get(&key).await {
            if cached == MISS_SENTINEL {
                return None;
            }
            if let Ok(parsed) = serde_json::from_str::<PostalAddress>(&cached) {
                return Some(parsed);
            }
        }

        let url = format!("{}/{}/json/", VIACEP_BASE_URL, digits);
        let response = match self.http.get(&url).timeout(HTTP_TIMEOUT).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("PostalCEP: request failed for {}: {}", digits, e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                "PostalCEP: HTTP {} for {}, caching miss",
                response.status(),
                digits
            );
            self.cache.set(&key, MISS_SENTINEL, self.ttl).await;
            return None;
        }

        let payload: ViaCepPayload = match response.json().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("PostalCEP: bad payload for {}: {}", digits, e);
                return None;
            }
        };

        // ViaCEP signals an unknown code with {"erro": true} and HTTP 200.
        if payload.erro.is_some() {
            self.cache.set(&key, MISS_SENTINEL, self.ttl).await;
            return None;
        }

        let address = PostalAddress {
            street: non_empty(payload.logradouro),
            neighborhood: non_empty(payload.bairro),
            city: non_empty(payload.localidade),
            state: non_empty(payload.uf),
        };

        if let Ok(raw) = serde_json::to_string(&address) {
            self.cache.set(&key, &raw, self.ttl).await;
        }
        Some(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[tokio::test]
    async fn malformed_codes_miss_without_network() {
        let client = ViaCepClient::new(
            reqwest::Client::new(),
            Arc::new(MemoryCache::new()),
            Duration::from_secs(60),
        );
        assert!(client.lookup("123").await.is_none());
        assert!(client.lookup("").await.is_none());
        assert!(client.lookup("74000-0000-9").await.is_none());
    }

    #[tokio::test]
    async fn cached_negative_short_circuits() {
        let cache = Arc::new(MemoryCache::new());
        cache
            .set("viacep:74000000", MISS_SENTINEL, Duration::from_secs(60))
            .await;
        let client =
            ViaCepClient::new(reqwest::Client::new(), cache, Duration::from_secs(60));
        assert!(client.lookup("74000-000").await.is_none());
    }

    #[tokio::test]
    async fn cached_positive_round_trips() {
        let cache = Arc::new(MemoryCache::new());
        let stored = PostalAddress {
            street: Some("Rua 10".to_string()),
            neighborhood: Some("Setor Central".to_string()),
            city: Some("Goiânia".to_string()),
            state: Some("GO".to_string()),
        };
        cache
            .set(
                "viacep:74000000",
                &serde_json::to_string(&stored).unwrap(),
                Duration::from_secs(60),
            )
            .await;
        let client =
            ViaCepClient::new(reqwest::Client::new(), cache, Duration::from_secs(60));
        let found = client.lookup("74.000-000").await.unwrap();
        assert_eq!(found.neighborhood.as_deref(), Some("Setor Central"));
    }
}
