//! crates/conversation_analytics_core/src/geo.rs
//!
//! IP-to-location resolution and the per-knowledge-base location cache.

use crate::domain::GeoLocation;
use crate::ports::{GeoCacheStore, IpDatabase, PortError, PortResult};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn, Span};

/// Why an address could not be resolved. None of these are fatal to callers.
#[derive(Debug, thiserror::Error)]
pub enum GeoLookupError {
    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),
    #[error("No location known for {0}")]
    NotFound(IpAddr),
    #[error("IP database error: {0}")]
    Backend(#[from] PortError),
}

/// Resolves remote IP strings into locations through the IP database port.
#[derive(Clone)]
pub struct GeoResolver {
    ipdb: Arc<dyn IpDatabase>,
}

impl GeoResolver {
    pub fn new(ipdb: Arc<dyn IpDatabase>) -> Self {
        Self { ipdb }
    }

    pub async fn resolve(&self, ip: &str) -> Result<GeoLocation, GeoLookupError> {
        let addr = ip
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| GeoLookupError::InvalidAddress(ip.to_string()))?;
        self.ipdb
            .lookup(addr)
            .await?
            .ok_or(GeoLookupError::NotFound(addr))
    }
}

/// Request-scoped memo of resolved addresses.
///
/// Failed lookups are remembered too, so rows sharing a bad address cost one lookup.
pub struct ResolutionMemo<'a> {
    resolver: &'a GeoResolver,
    seen: HashMap<String, Option<GeoLocation>>,
}

impl<'a> ResolutionMemo<'a> {
    pub fn new(resolver: &'a GeoResolver) -> Self {
        Self {
            resolver,
            seen: HashMap::new(),
        }
    }

    /// Resolves `ip`, logging failures under `span` and degrading them to `None`.
    pub async fn resolve(&mut self, ip: &str, span: &Span) -> Option<GeoLocation> {
        if let Some(known) = self.seen.get(ip) {
            return known.clone();
        }
        let location = match self.resolver.resolve(ip).await {
            Ok(location) => Some(location),
            Err(e) => {
                tracing::error!(parent: span, ip = %ip, error = %e, "get ip address failed");
                None
            }
        };
        self.seen.insert(ip.to_string(), location.clone());
        location
    }
}

/// The most recently observed location per knowledge base.
///
/// Values are stored as `country|province|city`. Entry expiry belongs to the store.
#[derive(Clone)]
pub struct GeoCache {
    store: Arc<dyn GeoCacheStore>,
    span: Span,
}

impl GeoCache {
    pub fn new(store: Arc<dyn GeoCacheStore>, span: Span) -> Self {
        Self { store, span }
    }

    pub async fn get(&self, kb_id: &str) -> PortResult<Option<String>> {
        self.store.get(kb_id).await
    }

    pub async fn set(&self, kb_id: &str, location: &GeoLocation) -> PortResult<()> {
        self.store.set(kb_id, &location.to_string()).await
    }

    /// Reads and decodes the cached location. Malformed entries read as a miss.
    pub async fn location(&self, kb_id: &str) -> PortResult<Option<GeoLocation>> {
        let Some(raw) = self.store.get(kb_id).await? else {
            debug!(parent: &self.span, kb_id = %kb_id, "geo cache miss");
            return Ok(None);
        };
        match raw.parse::<GeoLocation>() {
            Ok(location) => Ok(Some(location)),
            Err(e) => {
                warn!(
                    parent: &self.span,
                    kb_id = %kb_id,
                    error = %e,
                    "ignoring malformed geo cache entry"
                );
                Ok(None)
            }
        }
    }
}
