//! Static discovery: answers from a configured identifier table.
//!
//! Useful for deployments that trust a fixed set of providers, and as the
//! discovery collaborator in tests where the "fresh" answer must be scripted.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use tracing::debug;

use crate::identifier::normalize_identifier;
use crate::{Discovery, Result, ServiceEndpoint};

/// Identifier -> endpoints table. Keys are stored normalized.
///
/// Entries can be replaced at runtime (`set`), which the verifier tests use to
/// model a provider losing authority between redirect and return.
#[derive(Default)]
pub struct StaticDiscovery {
    table: RwLock<HashMap<String, Vec<ServiceEndpoint>>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an endpoint for `identifier`.
    pub fn insert(&self, identifier: &str, endpoint: ServiceEndpoint) -> Result<()> {
        let key = normalize_identifier(identifier)?.to_string();
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        table.entry(key).or_default().push(endpoint);
        Ok(())
    }

    /// Replace every endpoint recorded for `identifier`.
    pub fn set(&self, identifier: &str, endpoints: Vec<ServiceEndpoint>) -> Result<()> {
        let key = normalize_identifier(identifier)?.to_string();
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        table.insert(key, endpoints);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Discovery for StaticDiscovery {
    fn id(&self) -> &str {
        "static"
    }

    fn discover<'a>(
        &'a self,
        identifier: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ServiceEndpoint>>> + Send + 'a>> {
        Box::pin(async move {
            let key = normalize_identifier(identifier)?.to_string();
            let table = self.table.read().unwrap_or_else(|e| e.into_inner());
            let endpoints = table.get(&key).cloned().unwrap_or_default();
            debug!(identifier = %key, endpoints = endpoints.len(), "static discovery");
            Ok(endpoints)
        })
    }
}
