//! OpenID protocol primitives for relying parties
//!
//! Stateless building blocks shared by the relying party: message and
//! key-value form encoding, associations and their session negotiation
//! parameters, Diffie-Hellman, realms, nonces, the signed state token, and
//! security settings. Nothing here performs I/O or holds shared state; the
//! `openid-rp` crate wires these into the login flow.
//!
//! Signing flow for an association:
//! 1. `association::select_best()` picks the association and session type
//! 2. `DiffieHellman::generate()` supplies `dh_consumer_public` when needed
//! 3. `DiffieHellman::xor_secret()` recovers the MAC key from the response
//! 4. `Association::verify_message()` checks `openid.sig` on assertions

pub mod association;
pub mod constants;
pub mod diffie_hellman;
pub mod error;
pub mod kvform;
pub mod message;
pub mod nonce;
pub mod realm;
pub mod security;
pub mod token;

pub use association::{Association, AssociationType, SESSION_COMPATIBILITY, SessionType};
pub use diffie_hellman::DiffieHellman;
pub use error::{Error, Result};
pub use message::Message;
pub use nonce::Nonce;
pub use realm::Realm;
pub use security::SecuritySettings;
pub use token::{TokenCodec, TokenFields};
