//! Relying party security settings
//!
//! Deserializable from TOML with every field optional; durations are given in
//! seconds. The defaults accept any 1.x or 2.0 provider and any HMAC-SHA1 or
//! HMAC-SHA256 association.

use chrono::Duration;
use discovery::ProtocolVersion;
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Weakest association hash accepted, in bits
    pub minimum_hash_bits: u32,
    /// Strongest association hash proposed, in bits
    pub maximum_hash_bits: u32,
    pub minimum_version: ProtocolVersion,
    /// Only https identifiers, provider endpoints, and return_to URLs
    pub require_ssl: bool,
    /// Drop endpoints that cannot establish an association instead of
    /// falling back to stateless verification
    pub require_association: bool,
    /// Only OP Identifier endpoints (the provider chooses the identity)
    pub require_directed_identity: bool,
    pub reject_delegating_identifiers: bool,
    /// Reject assertions that do not answer a request this relying party made
    pub reject_unsolicited_assertions: bool,
    /// Surface only signed extension arguments
    pub ignore_unsigned_extensions: bool,
    /// Mint our own nonce for 1.x providers, which send none
    pub protect_downlevel_replay_attacks: bool,
    /// Providers allowed to assert identities. Empty means any.
    pub trusted_providers: Vec<Url>,
    pub reject_assertions_from_untrusted_providers: bool,
    #[serde(rename = "maximum_message_age_secs", with = "seconds")]
    pub maximum_message_age: Duration,
    #[serde(rename = "maximum_clock_skew_secs", with = "seconds")]
    pub maximum_clock_skew: Duration,
    /// Longest a user may spend at the provider; also the minimum remaining
    /// life an association needs to be used.
    #[serde(rename = "maximum_authentication_time_secs", with = "seconds")]
    pub maximum_authentication_time: Duration,
    #[serde(rename = "private_secret_maximum_age_secs", with = "seconds")]
    pub private_secret_maximum_age: Duration,
    #[serde(rename = "direct_request_timeout_secs", with = "seconds")]
    pub direct_request_timeout: Duration,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            minimum_hash_bits: 160,
            maximum_hash_bits: 256,
            minimum_version: ProtocolVersion::V10,
            require_ssl: false,
            require_association: false,
            require_directed_identity: false,
            reject_delegating_identifiers: false,
            reject_unsolicited_assertions: false,
            ignore_unsigned_extensions: false,
            protect_downlevel_replay_attacks: true,
            trusted_providers: Vec::new(),
            reject_assertions_from_untrusted_providers: false,
            // 3 minutes of message lifetime plus 10 minutes of clock skew
            maximum_message_age: Duration::minutes(13),
            maximum_clock_skew: Duration::minutes(10),
            maximum_authentication_time: Duration::minutes(5),
            private_secret_maximum_age: Duration::days(7),
            direct_request_timeout: Duration::seconds(10),
        }
    }
}

impl SecuritySettings {
    pub fn permits_hash_bits(&self, bits: u32) -> bool {
        bits >= self.minimum_hash_bits && bits <= self.maximum_hash_bits
    }

    pub fn permits_version(&self, version: ProtocolVersion) -> bool {
        version >= self.minimum_version
    }

    /// Whether `provider` may assert identities under the allow-list policy.
    pub fn is_trusted_provider(&self, provider: &Url) -> bool {
        if !self.reject_assertions_from_untrusted_providers {
            return true;
        }
        self.trusted_providers.iter().any(|p| p == provider)
    }
}

mod seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = i64::deserialize(deserializer)?;
        if secs < 0 {
            return Err(serde::de::Error::custom("duration must not be negative"));
        }
        Ok(Duration::seconds(secs))
    }
}
