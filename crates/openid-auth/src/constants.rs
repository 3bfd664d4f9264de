//! OpenID protocol constants
//!
//! Wire names for modes, namespaces, and the sentinel values the relying
//! party uses for its own private secret and nonces.

/// `openid.ns` value identifying a 2.0 message. 1.x messages carry no `ns`.
pub const OPENID2_NS: &str = "http://specs.openid.net/auth/2.0";

/// Prefix of every indirect message field.
pub const FIELD_PREFIX: &str = "openid.";

/// User interface extension, used to request popup rendering.
pub const UI_EXTENSION_NS: &str = "http://specs.openid.net/extensions/ui/1.0";

pub mod mode {
    pub const CHECKID_SETUP: &str = "checkid_setup";
    pub const CHECKID_IMMEDIATE: &str = "checkid_immediate";
    pub const ID_RES: &str = "id_res";
    pub const CANCEL: &str = "cancel";
    pub const SETUP_NEEDED: &str = "setup_needed";
    pub const ERROR: &str = "error";
    pub const ASSOCIATE: &str = "associate";
    pub const CHECK_AUTHENTICATION: &str = "check_authentication";
}

/// Error code a provider returns when it declines the proposed association.
pub const UNSUPPORTED_TYPE: &str = "unsupported-type";

/// Association store key for the relying party's own signing secret. Not a
/// real provider endpoint.
pub const PRIVATE_SECRET_ENDPOINT: &str = "https://localhost/openid-rp/private-secret";

/// Nonce store context for nonces the relying party minted itself.
pub const PRIVATE_NONCE_CONTEXT: &str = "private";

/// Lifetime of a provider association when the response omits `expires_in`.
pub const DEFAULT_ASSOCIATION_LIFETIME_SECS: i64 = 14 * 24 * 60 * 60;
