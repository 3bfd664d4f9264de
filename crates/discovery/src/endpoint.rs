//! Discovered service endpoints
//!
//! A `ServiceEndpoint` is one (identifier, provider) pairing produced by
//! discovery. Equality deliberately ignores priorities and type URIs: those
//! do not survive the trip through the provider, and the verifier compares an
//! endpoint rebuilt from the assertion against freshly discovered ones.

use std::cmp::Ordering;

use url::Url;

use crate::types::{self, IDENTIFIER_SELECT, OP_IDENTIFIER_SERVICE, ProtocolVersion};

#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    /// Identity the user claims (or `IDENTIFIER_SELECT` for OP Identifiers)
    pub claimed_identifier: String,
    /// What the user actually typed, if known
    pub user_supplied_identifier: Option<String>,
    /// Identifier the provider knows the user by (differs when delegating)
    pub provider_local_identifier: String,
    pub provider_endpoint: Url,
    pub version: ProtocolVersion,
    pub type_uris: Vec<String>,
    pub service_priority: Option<u32>,
    pub uri_priority: Option<u32>,
}

impl ServiceEndpoint {
    /// Endpoint for a claimed identifier. `local_identifier` defaults to the
    /// claimed identifier when the page declares no delegate.
    pub fn claimed(
        claimed_identifier: impl Into<String>,
        local_identifier: Option<String>,
        provider_endpoint: Url,
        version: ProtocolVersion,
    ) -> Self {
        let claimed_identifier = claimed_identifier.into();
        let provider_local_identifier =
            local_identifier.unwrap_or_else(|| claimed_identifier.clone());
        Self {
            claimed_identifier,
            user_supplied_identifier: None,
            provider_local_identifier,
            provider_endpoint,
            version,
            type_uris: vec![version.signon_type_uri().to_string()],
            service_priority: None,
            uri_priority: None,
        }
    }

    /// Endpoint for an OP Identifier: the provider chooses the identity.
    pub fn op_identifier(provider_endpoint: Url) -> Self {
        Self {
            claimed_identifier: IDENTIFIER_SELECT.to_string(),
            user_supplied_identifier: None,
            provider_local_identifier: IDENTIFIER_SELECT.to_string(),
            provider_endpoint,
            version: ProtocolVersion::V20,
            type_uris: vec![OP_IDENTIFIER_SERVICE.to_string()],
            service_priority: None,
            uri_priority: None,
        }
    }

    pub fn with_priorities(mut self, service: Option<u32>, uri: Option<u32>) -> Self {
        self.service_priority = service;
        self.uri_priority = uri;
        self
    }

    pub fn with_type_uris(mut self, type_uris: Vec<String>) -> Self {
        self.type_uris = type_uris;
        self
    }

    pub fn with_user_supplied_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.user_supplied_identifier = Some(identifier.into());
        self
    }

    pub fn is_op_identifier(&self) -> bool {
        self.claimed_identifier == IDENTIFIER_SELECT
    }

    /// True when the claimed identifier delegates to a different local id.
    pub fn is_delegated(&self) -> bool {
        !self.is_op_identifier() && self.provider_local_identifier != self.claimed_identifier
    }

    pub fn is_transport_secure(&self) -> bool {
        self.provider_endpoint.scheme() == "https"
    }

    /// Preference order: service type class, then service priority, then URI
    /// priority. Missing priorities sort after present ones.
    pub fn preference_order(&self, other: &ServiceEndpoint) -> Ordering {
        let rank = types::service_type_rank(&self.type_uris)
            .cmp(&types::service_type_rank(&other.type_uris));
        rank.then_with(|| priority_order(self.service_priority, other.service_priority))
            .then_with(|| priority_order(self.uri_priority, other.uri_priority))
    }
}

fn priority_order(a: Option<u32>, b: Option<u32>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl ServiceEndpoint {
    /// The claimed identifier with any `#fragment` removed. Discovery runs on
    /// this form; providers may append a fragment to tell reassigned
    /// identifiers apart.
    pub fn claimed_identifier_without_fragment(&self) -> &str {
        without_fragment(&self.claimed_identifier)
    }
}

fn without_fragment(identifier: &str) -> &str {
    identifier
        .split_once('#')
        .map_or(identifier, |(base, _)| base)
}

impl PartialEq for ServiceEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.claimed_identifier_without_fragment() == other.claimed_identifier_without_fragment()
            && self.provider_endpoint == other.provider_endpoint
            && self.provider_local_identifier == other.provider_local_identifier
            && self.version.equals_practically(other.version)
    }
}

impl Eq for ServiceEndpoint {}
