// src/resolvers/google.rs

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, MISS_SENTINEL};
use crate::config::HTTP_TIMEOUT;
use crate::normalize::fold;

const GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const FIND_PLACE_URL: &str = "https://maps.googleapis.com/maps/api/place/findplacefromtext/json";

/// Address components extracted from one geocoder hit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub street: Option<String>,
    pub neighborhood: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub formatted_address: Option<String>,
}

/// First candidate of a Places find-by-text lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceResult {
    pub name: String,
    pub formatted_address: String,
}

#[derive(Debug, Deserialize)]
struct GeocodePayload {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeEntry>,
}

#[derive(Debug, Deserialize)]
struct GeocodeEntry {
    formatted_address: Option<String>,
    #[serde(default)]
    address_components: Vec<AddressComponent>,
}

#[derive(Debug, Deserialize)]
struct AddressComponent {
    long_name: String,
    short_name: String,
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FindPlacePayload {
    status: String,
    #[serde(default)]
    candidates: Vec<PlaceCandidate>,
}

#[derive(Debug, Deserialize)]
struct PlaceCandidate {
    name: Option<String>,
    formatted_address: Option<String>,
}

/// Google Geocoding + Places adapters, credential-gated. Requests are
/// country-restricted and use the regional language of the data.
pub struct GoogleClient {
    http: reqwest::Client,
    cache: Arc<dyn Cache>,
    ttl: Duration,
    api_key: Option<String>,
    warned_no_key: AtomicBool,
}

/// Cache key normalization: lowercased, accent-stripped, whitespace
/// collapsed to hyphens.
fn cache_key(prefix: &str, query: &str) -> String {
    format!("{}:{}", prefix, fold(query).replace(' ', "-"))
}

impl GoogleClient {
    pub fn new(
        http: reqwest::Client,
        cache: Arc<dyn Cache>,
        ttl: Duration,
        api_key: Option<String>,
    ) -> Self {
        Self {
            http,
            cache,
            ttl,
            api_key,
            warned_no_key: AtomicBool::new(false),
        }
    }

    fn key_or_miss(&self) -> Option<&str> {
        match self.api_key.as_deref() {
            Some(key) => Some(key),
            None => {
                if !self.warned_no_key.swap(true, Ordering::Relaxed) {
                    warn!("Geocoder: GOOGLE_MAPS_API_KEY not set, Google resolvers disabled");
                }
                None
            }
        }
    }

    pub async fn geocode(&self, address: &str) -> Option<GeocodeResult> {
        let api_key = self.key_or_miss()?;
        let key = cache_key("geo", address);

        if let Some(cached) = self.cache.get(&key).await {
            if cached == MISS_SENTINEL {
                return None;
            }
            if let Ok(parsed) = serde_json::from_str::<GeocodeResult>(&cached) {
                debug!("Geocoder: cache hit for {:?}", address);
                return Some(parsed);
            }
        }

        let response = match self
            .http
            .get(GEOCODE_URL)
            .query(&[
                ("address", address),
                ("region", "br"),
                ("language", "pt-BR"),
                ("key", api_key),
            ])
            .timeout(HTTP_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Geocoder: request failed for {:?}: {}", address, e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                "Geocoder: HTTP {} for {:?}, caching miss",
                response.status(),
                address
            );
            self.cache.set(&key, MISS_SENTINEL, self.ttl).await;
            return None;
        }

        let payload: GeocodePayload = match response.json().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Geocoder: bad payload for {:?}: {}", address, e);
                return None;
            }
        };

        if payload.status != "OK" || payload.results.is_empty() {
            self.cache.set(&key, MISS_SENTINEL, self.ttl).await;
            return None;
        }

        let entry = &payload.results[0];
        let mut result = GeocodeResult {
            formatted_address: entry.formatted_address.clone(),
            ..Default::default()
        };

        for component in &entry.address_components {
            let types: Vec<&str> = component.types.iter().map(String::as_str).collect();
            if types.contains(&"route") {
                result.street = Some(component.long_name.clone());
            } else if types.contains(&"sublocality") || types.contains(&"sublocality_level_1") {
                result.neighborhood = Some(component.long_name.clone());
            } else if types.contains(&"locality") || types.contains(&"administrative_area_level_2")
            {
                result.city.get_or_insert_with(|| component.long_name.clone());
            } else if types.contains(&"administrative_area_level_1") {
                result.state = Some(component.short_name.clone());
            }
        }

        if let Ok(raw) = serde_json::to_string(&result) {
            self.cache.set(&key, &raw, self.ttl).await;
        }
        Some(result)
    }

    pub async fn find_place(&self, query: &str) -> Option<PlaceResult> {
        let api_key = self.key_or_miss()?;
        let key = cache_key("place", query);

        if let Some(cached) = self.cache.get(&key).await {
            if cached == MISS_SENTINEL {
                return None;
            }
            if let Ok(parsed) = serde_json::from_str::<PlaceResult>(&cached) {
                debug!("Places: cache hit for {:?}", query);
                return Some(parsed);
            }
        }

        let response = match self
            .http
            .get(FIND_PLACE_URL)
            .query(&[
                ("input", query),
                ("inputtype", "textquery"),
                ("fields", "name,formatted_address"),
                ("language", "pt-BR"),
                ("key", api_key),
            ])
            .timeout(HTTP_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Places: request failed for {:?}: {}", query, e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                "Places: HTTP {} for {:?}, caching miss",
                response.status(),
                query
            );
            self.cache.set(&key, MISS_SENTINEL, self.ttl).await;
            return None;
        }

        let payload: FindPlacePayload = match response.json().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Places: bad payload for {:?}: {}", query, e);
                return None;
            }
        };

        let candidate = payload.candidates.into_iter().next();
        let result = match (payload.status.as_str(), candidate) {
            ("OK", Some(candidate)) => match (candidate.name, candidate.formatted_address) {
                (Some(name), Some(formatted_address)) => Some(PlaceResult {
                    name,
                    formatted_address,
                }),
                _ => None,
            },
            _ => None,
        };

        match &result {
            Some(place) => {
                if let Ok(raw) = serde_json::to_string(place) {
                    self.cache.set(&key, &raw, self.ttl).await;
                }
            }
            None => {
                self.cache.set(&key, MISS_SENTINEL, self.ttl).await;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[test]
    fn cache_keys_are_folded_and_hyphenated() {
        assert_eq!(
            cache_key("geo", "Jardim América, Goiânia GO"),
            "geo:jardim-america,-goiania-go"
        );
    }

    #[tokio::test]
    async fn missing_credential_is_a_miss() {
        let client = GoogleClient::new(
            reqwest::Client::new(),
            Arc::new(MemoryCache::new()),
            Duration::from_secs(60),
            None,
        );
        assert!(client.geocode("Praça Cívica, Goiânia").await.is_none());
        assert!(client.find_place("Edifício Aurora").await.is_none());
    }

    #[tokio::test]
    async fn cached_place_short_circuits_without_network() {
        let cache = Arc::new(MemoryCache::new());
        let place = PlaceResult {
            name: "Edifício Aurora".to_string(),
            formatted_address: "Rua 10, 100 - Setor Central, Goiânia - GO".to_string(),
        };
        cache
            .set(
                &cache_key("place", "Edifício Aurora, Goiânia, GO"),
                &serde_json::to_string(&place).unwrap(),
                Duration::from_secs(60),
            )
            .await;
        let client = GoogleClient::new(
            reqwest::Client::new(),
            cache,
            Duration::from_secs(60),
            Some("test-key".to_string()),
        );
        let found = client.find_place("Edifício Aurora, Goiânia, GO").await.unwrap();
        assert_eq!(found.name, "Edifício Aurora");
    }
}
