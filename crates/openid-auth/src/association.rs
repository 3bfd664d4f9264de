//! Associations: shared MAC secrets between relying party and provider
//!
//! An `Association` is immutable once created. It is usable only while it has
//! enough life left for a full redirect round trip (`has_useful_life_remaining`);
//! callers treat an association without useful life as absent.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use common::Secret;
use discovery::ProtocolVersion;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::security::SecuritySettings;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// MAC algorithm of an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationType {
    HmacSha1,
    HmacSha256,
}

impl AssociationType {
    /// Strongest first: the order proposals are tried in.
    pub const PREFERENCE: [AssociationType; 2] =
        [AssociationType::HmacSha256, AssociationType::HmacSha1];

    pub fn name(self) -> &'static str {
        match self {
            AssociationType::HmacSha1 => "HMAC-SHA1",
            AssociationType::HmacSha256 => "HMAC-SHA256",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "HMAC-SHA1" => Some(AssociationType::HmacSha1),
            "HMAC-SHA256" => Some(AssociationType::HmacSha256),
            _ => None,
        }
    }

    /// MAC key length in bytes.
    pub fn secret_len(self) -> usize {
        match self {
            AssociationType::HmacSha1 => 20,
            AssociationType::HmacSha256 => 32,
        }
    }

    pub fn hash_bits(self) -> u32 {
        self.secret_len() as u32 * 8
    }

    /// 1.x providers only know HMAC-SHA1.
    pub fn supported_by(self, version: ProtocolVersion) -> bool {
        version.is_v2() || self == AssociationType::HmacSha1
    }

    pub fn sign(self, key: &[u8], data: &[u8]) -> Vec<u8> {
        match self {
            AssociationType::HmacSha1 => {
                let mut mac =
                    HmacSha1::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            AssociationType::HmacSha256 => {
                let mut mac =
                    HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    /// Constant-time signature check.
    pub fn verify(self, key: &[u8], data: &[u8], signature: &[u8]) -> bool {
        match self {
            AssociationType::HmacSha1 => {
                let mut mac =
                    HmacSha1::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.verify_slice(signature).is_ok()
            }
            AssociationType::HmacSha256 => {
                let mut mac =
                    HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.verify_slice(signature).is_ok()
            }
        }
    }
}

/// How the MAC key is protected in the associate response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionType {
    /// Secret sent in the clear; only acceptable over https
    NoEncryption,
    DhSha1,
    DhSha256,
}

/// Session/association pairs a provider and relying party may agree on.
/// A Diffie-Hellman session's hash must match the MAC's hash length.
pub const SESSION_COMPATIBILITY: &[(SessionType, AssociationType)] = &[
    (SessionType::NoEncryption, AssociationType::HmacSha1),
    (SessionType::NoEncryption, AssociationType::HmacSha256),
    (SessionType::DhSha1, AssociationType::HmacSha1),
    (SessionType::DhSha256, AssociationType::HmacSha256),
];

impl SessionType {
    /// Wire name. 1.x spells no-encryption as an empty (omitted) session type.
    pub fn name(self, version: ProtocolVersion) -> &'static str {
        match self {
            SessionType::NoEncryption if version.is_v2() => "no-encryption",
            SessionType::NoEncryption => "",
            SessionType::DhSha1 => "DH-SHA1",
            SessionType::DhSha256 => "DH-SHA256",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "" | "no-encryption" => Some(SessionType::NoEncryption),
            "DH-SHA1" => Some(SessionType::DhSha1),
            "DH-SHA256" => Some(SessionType::DhSha256),
            _ => None,
        }
    }

    pub fn is_diffie_hellman(self) -> bool {
        self != SessionType::NoEncryption
    }

    pub fn is_compatible_with(self, association_type: AssociationType) -> bool {
        SESSION_COMPATIBILITY.contains(&(self, association_type))
    }

    /// Diffie-Hellman session that matches `association_type`.
    pub fn diffie_hellman_for(association_type: AssociationType) -> Option<Self> {
        SESSION_COMPATIBILITY
            .iter()
            .find(|(session, assoc)| session.is_diffie_hellman() && *assoc == association_type)
            .map(|(session, _)| *session)
    }
}

/// Pick the strongest permitted association and a session for it.
///
/// Over https the secret travels unencrypted; otherwise a Diffie-Hellman
/// session whose hash matches the association is used. `None` when the
/// settings and protocol version rule out every combination.
pub fn select_best(
    version: ProtocolVersion,
    settings: &SecuritySettings,
    secure_transport: bool,
) -> Option<(AssociationType, SessionType)> {
    AssociationType::PREFERENCE
        .into_iter()
        .filter(|t| t.supported_by(version) && settings.permits_hash_bits(t.hash_bits()))
        .find_map(|t| {
            let session = if secure_transport {
                Some(SessionType::NoEncryption)
            } else {
                SessionType::diffie_hellman_for(t)
            };
            session.map(|s| (t, s))
        })
}

/// Shared secret and metadata for signing and verifying messages.
#[derive(Debug, Clone)]
pub struct Association {
    handle: String,
    secret: Secret<Vec<u8>>,
    association_type: AssociationType,
    issued: DateTime<Utc>,
    lifetime: Duration,
}

impl Association {
    /// Validates the handle (printable ASCII, 1..=255 chars) and that the
    /// secret length matches the association type.
    pub fn new(
        handle: impl Into<String>,
        secret: Vec<u8>,
        association_type: AssociationType,
        issued: DateTime<Utc>,
        lifetime: Duration,
    ) -> Result<Self> {
        let handle = handle.into();
        if handle.is_empty()
            || handle.len() > 255
            || !handle.bytes().all(|b| (0x21..=0x7e).contains(&b))
        {
            return Err(Error::ProtocolViolation(format!(
                "invalid association handle {handle:?}"
            )));
        }
        if secret.len() != association_type.secret_len() {
            return Err(Error::ProtocolViolation(format!(
                "{} secret must be {} bytes, got {}",
                association_type.name(),
                association_type.secret_len(),
                secret.len()
            )));
        }
        Ok(Self {
            handle,
            secret: Secret::new(secret),
            association_type,
            issued,
            lifetime,
        })
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn association_type(&self) -> AssociationType {
        self.association_type
    }

    pub fn secret(&self) -> &Secret<Vec<u8>> {
        &self.secret
    }

    pub fn issued(&self) -> DateTime<Utc> {
        self.issued
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn expires(&self) -> DateTime<Utc> {
        self.issued + self.lifetime
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires()
    }

    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires() - now).max(Duration::zero())
    }

    /// Enough life left to survive a trip to the provider and back.
    pub fn has_useful_life_remaining(&self, now: DateTime<Utc>, minimum: Duration) -> bool {
        self.time_remaining(now) >= minimum
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.association_type.sign(self.secret.expose(), data)
    }

    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        self.association_type
            .verify(self.secret.expose(), data, signature)
    }

    /// Base64 signature over the listed fields of `message`.
    pub fn sign_message(&self, message: &Message, signed: &[&str]) -> Result<String> {
        let base = message.signing_base(signed)?;
        Ok(STANDARD.encode(self.sign(base.as_bytes())))
    }

    /// Check `openid.sig` against the fields named in `openid.signed`.
    pub fn verify_message(&self, message: &Message) -> Result<()> {
        let signed = message.signed_fields()?;
        let base = message.signing_base(&signed)?;
        let signature = STANDARD
            .decode(message.require("sig")?)
            .map_err(|e| Error::SignatureInvalid(format!("openid.sig is not base64: {e}")))?;
        if self.verify(base.as_bytes(), &signature) {
            Ok(())
        } else {
            Err(Error::SignatureInvalid(format!(
                "signature mismatch for association {}",
                self.handle
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn association(kind: AssociationType) -> Association {
        Association::new(
            "H1",
            vec![7u8; kind.secret_len()],
            kind,
            Utc::now(),
            Duration::hours(1),
        )
        .unwrap()
    }

    #[test]
    fn names_round_trip() {
        for kind in AssociationType::PREFERENCE {
            assert_eq!(AssociationType::parse(kind.name()), Some(kind));
        }
        assert_eq!(AssociationType::parse("HMAC-MD5"), None);
    }

    #[test]
    fn one_dot_x_omits_no_encryption_session_name() {
        assert_eq!(SessionType::NoEncryption.name(ProtocolVersion::V11), "");
        assert_eq!(
            SessionType::NoEncryption.name(ProtocolVersion::V20),
            "no-encryption"
        );
        assert_eq!(SessionType::parse(""), Some(SessionType::NoEncryption));
    }

    #[test]
    fn compatibility_table_matches_hash_lengths() {
        assert!(SessionType::DhSha1.is_compatible_with(AssociationType::HmacSha1));
        assert!(!SessionType::DhSha1.is_compatible_with(AssociationType::HmacSha256));
        assert!(SessionType::NoEncryption.is_compatible_with(AssociationType::HmacSha256));
        assert_eq!(
            SessionType::diffie_hellman_for(AssociationType::HmacSha256),
            Some(SessionType::DhSha256)
        );
    }

    #[test]
    fn select_best_prefers_sha256_and_plaintext_over_https() {
        let settings = SecuritySettings::default();
        assert_eq!(
            select_best(ProtocolVersion::V20, &settings, true),
            Some((AssociationType::HmacSha256, SessionType::NoEncryption))
        );
        assert_eq!(
            select_best(ProtocolVersion::V20, &settings, false),
            Some((AssociationType::HmacSha256, SessionType::DhSha256))
        );
    }

    #[test]
    fn select_best_limits_one_dot_x_to_sha1() {
        let settings = SecuritySettings::default();
        assert_eq!(
            select_best(ProtocolVersion::V11, &settings, false),
            Some((AssociationType::HmacSha1, SessionType::DhSha1))
        );
    }

    #[test]
    fn select_best_returns_none_when_settings_exclude_everything() {
        let settings = SecuritySettings {
            minimum_hash_bits: 256,
            ..Default::default()
        };
        assert_eq!(select_best(ProtocolVersion::V11, &settings, true), None);
    }

    #[test]
    fn rejects_wrong_secret_length_and_bad_handle() {
        assert!(
            Association::new(
                "H1",
                vec![0u8; 20],
                AssociationType::HmacSha256,
                Utc::now(),
                Duration::hours(1)
            )
            .is_err()
        );
        assert!(
            Association::new(
                "has space",
                vec![0u8; 20],
                AssociationType::HmacSha1,
                Utc::now(),
                Duration::hours(1)
            )
            .is_err()
        );
    }

    #[test]
    fn useful_life_requires_minimum_remaining() {
        let issued = Utc::now();
        let assoc = Association::new(
            "H1",
            vec![1u8; 20],
            AssociationType::HmacSha1,
            issued,
            Duration::minutes(10),
        )
        .unwrap();
        assert!(assoc.has_useful_life_remaining(issued, Duration::minutes(5)));
        assert!(!assoc.has_useful_life_remaining(issued + Duration::minutes(6), Duration::minutes(5)));
        assert!(assoc.is_expired(issued + Duration::minutes(10)));
        assert_eq!(
            assoc.time_remaining(issued + Duration::minutes(20)),
            Duration::zero()
        );
    }

    #[test]
    fn sign_and_verify_message() {
        let assoc = association(AssociationType::HmacSha256);
        let mut msg = Message::new();
        msg.set("mode", "id_res");
        msg.set("claimed_id", "https://alice.example/");
        msg.set("signed", "mode,claimed_id");
        let sig = assoc.sign_message(&msg, &["mode", "claimed_id"]).unwrap();
        msg.set("sig", sig);
        assert!(assoc.verify_message(&msg).is_ok());

        msg.set("claimed_id", "https://mallory.example/");
        assert!(matches!(
            assoc.verify_message(&msg),
            Err(Error::SignatureInvalid(_))
        ));
    }

    #[test]
    fn known_hmac_sha1_vector() {
        // RFC 2202 test case 2
        let sig = AssociationType::HmacSha1.sign(b"Jefe", b"what do ya want for nothing?");
        let hex: String = sig.iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(hex, "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");
    }

    #[test]
    fn debug_output_redacts_secret() {
        let assoc = association(AssociationType::HmacSha1);
        let debug = format!("{assoc:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("H1"));
    }
}
