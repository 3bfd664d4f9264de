//! Discovery boundary for OpenID identifiers
//!
//! Defines the `Discovery` trait the relying party consults to resolve an
//! identifier into candidate `ServiceEndpoint`s. The relying party calls it
//! twice per login (before the redirect and again when the assertion comes
//! back), so implementations must not assume the caller memoizes results.
//!
//! Two implementations ship here: `StaticDiscovery` answers from a configured
//! table, and `HtmlDiscovery` fetches the identifier page and reads its
//! `<link rel="openid2.provider">` style declarations.

pub mod endpoint;
pub mod html;
pub mod identifier;
pub mod static_table;
pub mod types;

pub use endpoint::ServiceEndpoint;
pub use html::HtmlDiscovery;
pub use identifier::normalize_identifier;
pub use static_table::StaticDiscovery;
pub use types::ProtocolVersion;

use std::future::Future;
use std::pin::Pin;

/// Errors from identifier normalization and discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("unsupported identifier: {0}")]
    Unsupported(String),

    #[error("discovery request failed: {0}")]
    Http(String),
}

/// Result alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Resolves an identifier to the provider endpoints authoritative for it.
///
/// An empty list is a valid answer (nothing discovered). Errors are reserved
/// for identifiers that cannot be looked up at all.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Discovery>`).
pub trait Discovery: Send + Sync {
    /// Short name for logging (e.g. "static", "html")
    fn id(&self) -> &str;

    fn discover<'a>(
        &'a self,
        identifier: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ServiceEndpoint>>> + Send + 'a>>;
}
