//! OpenID 1.x/2.0 relying party
//!
//! Drives the relying-party half of an OpenID login: discovers the user's
//! provider, establishes shared-secret associations, builds the redirect that
//! sends the user agent to the provider, and verifies the signed assertion
//! that comes back.
//!
//! Login lifecycle:
//! 1. `RelyingParty::create_requests` normalizes the identifier, discovers and
//!    orders endpoints, and pre-associates with each provider
//! 2. `RelyingParty::redirect` serializes one request; return_to carries
//!    relying-party state signed with a private secret
//! 3. The provider redirects back; `RelyingParty::verify` checks return_to,
//!    rediscovery, the signature (locally or via `check_authentication`), and
//!    nonces, producing an `AuthenticationResponse`
//! 4. A background task (`spawn_cleanup_task`) prunes expired associations
//!    and nonces

pub mod association_manager;
pub mod channel;
pub mod cleanup;
pub mod file_store;
pub mod metrics;
pub mod private_secret;
pub mod relying_party;
pub mod request;
pub mod response;
pub mod return_to;
pub mod selector;
pub mod store;
pub mod verifier;

#[cfg(test)]
mod test_support;

pub use channel::{DirectChannel, HttpChannel};
pub use cleanup::{CleanupReport, spawn_cleanup_task};
pub use file_store::FileAssociationStore;
pub use relying_party::RelyingParty;
pub use request::{
    AssociationPreference, AuthenticationMode, AuthenticationRequest, Extension, Redirect,
    RequestOptions,
};
pub use response::{AuthenticationResponse, PositiveAssertion};
pub use selector::EndpointFilter;
pub use store::{AssociationStore, MemoryAssociationStore, MemoryNonceStore, NonceStore};
pub use verifier::IncomingRequest;
