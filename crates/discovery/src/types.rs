//! Protocol versions and the service type URIs that announce them

use std::fmt;

use serde::Deserialize;

/// Service type of an OP Identifier endpoint (the provider picks the identity).
pub const OP_IDENTIFIER_SERVICE: &str = "http://specs.openid.net/auth/2.0/server";

/// Service type of a 2.0 claimed identifier endpoint.
pub const CLAIMED_IDENTIFIER_SERVICE_20: &str = "http://specs.openid.net/auth/2.0/signon";

pub const SIGNON_SERVICE_11: &str = "http://openid.net/signon/1.1";

pub const SIGNON_SERVICE_10: &str = "http://openid.net/signon/1.0";

/// Claimed/local identifier sent to an OP Identifier endpoint so the provider
/// chooses which identity to assert.
pub const IDENTIFIER_SELECT: &str = "http://specs.openid.net/auth/2.0/identifier_select";

/// OpenID protocol version spoken by an endpoint.
///
/// Ordered oldest to newest so minimum-version checks are plain comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "1.0")]
    V10,
    #[serde(rename = "1.1")]
    V11,
    #[serde(rename = "2.0")]
    V20,
}

impl ProtocolVersion {
    pub fn major(self) -> u8 {
        match self {
            ProtocolVersion::V10 | ProtocolVersion::V11 => 1,
            ProtocolVersion::V20 => 2,
        }
    }

    pub fn is_v2(self) -> bool {
        self.major() == 2
    }

    /// 1.0 and 1.1 are indistinguishable on the wire, so endpoints compare
    /// by major version.
    pub fn equals_practically(self, other: ProtocolVersion) -> bool {
        self.major() == other.major()
    }

    /// Service type URI a claimed identifier endpoint of this version carries.
    pub fn signon_type_uri(self) -> &'static str {
        match self {
            ProtocolVersion::V10 => SIGNON_SERVICE_10,
            ProtocolVersion::V11 => SIGNON_SERVICE_11,
            ProtocolVersion::V20 => CLAIMED_IDENTIFIER_SERVICE_20,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtocolVersion::V10 => "1.0",
            ProtocolVersion::V11 => "1.1",
            ProtocolVersion::V20 => "2.0",
        };
        f.write_str(s)
    }
}

/// Preference class of a service type set, lower is preferred.
///
/// OP Identifier services rank first, then 2.0 claimed identifiers, 1.1, 1.0.
/// Anything unrecognized sorts last.
pub fn service_type_rank(type_uris: &[String]) -> u32 {
    let has = |uri: &str| type_uris.iter().any(|t| t == uri);
    if has(OP_IDENTIFIER_SERVICE) {
        0
    } else if has(CLAIMED_IDENTIFIER_SERVICE_20) {
        1
    } else if has(SIGNON_SERVICE_11) {
        2
    } else if has(SIGNON_SERVICE_10) {
        3
    } else {
        10
    }
}
