// src/resolvers/mod.rs

pub mod google;
pub mod postal;
pub mod registry;

use std::sync::Arc;

use crate::cache::Cache;
use crate::config::Config;

pub use google::{GeocodeResult, GoogleClient, PlaceResult};
pub use postal::{PostalAddress, ViaCepClient};
pub use registry::{IbgeRegistry, Municipality};

/// The external-source adapters, sharing one HTTP client and the
/// process-wide cache. Built once and carried by the application
/// context.
pub struct Resolvers {
    pub registry: IbgeRegistry,
    pub postal: ViaCepClient,
    pub google: GoogleClient,
}

impl Resolvers {
    pub fn new(config: &Config, cache: Arc<dyn Cache>) -> Self {
        let http = reqwest::Client::new();
        Self {
            registry: IbgeRegistry::new(http.clone(), cache.clone(), config.google_cache_ttl),
            postal: ViaCepClient::new(http.clone(), cache.clone(), config.viacep_cache_ttl),
            google: GoogleClient::new(
                http,
                cache,
                config.google_cache_ttl,
                config.google_maps_api_key.clone(),
            ),
        }
    }
}
