//! Self-contained signed state tokens
//!
//! A token carries the endpoint a 1.x request was sent to through the
//! return_to URL, so the assertion can be tied back to it without a server
//! side session:
//!
//! ```text
//! base64( HMAC-SHA1(key, payload) || payload )
//! payload = unix_seconds NUL identity_url NUL provider_local_id NUL provider_endpoint
//! ```
//!
//! Tokens expire `lifetime` after they are minted.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use common::Secret;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::{Error, Result};

type HmacSha1 = Hmac<Sha1>;

/// Required key length (the HMAC-SHA1 block of key material).
pub const TOKEN_KEY_LEN: usize = 20;

const SIGNATURE_LEN: usize = 20;

/// Default token lifetime.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 5 * 60;

/// Fields carried by a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFields {
    pub identity_url: String,
    pub provider_local_id: String,
    pub provider_endpoint: String,
}

pub struct TokenCodec {
    key: Secret<Vec<u8>>,
    lifetime: Duration,
}

impl TokenCodec {
    pub fn new(key: Vec<u8>) -> Result<Self> {
        Self::with_lifetime(key, Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS))
    }

    pub fn with_lifetime(key: Vec<u8>, lifetime: Duration) -> Result<Self> {
        if key.len() != TOKEN_KEY_LEN {
            return Err(Error::ProtocolViolation(format!(
                "token key must be {TOKEN_KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        Ok(Self {
            key: Secret::new(key),
            lifetime,
        })
    }

    /// Codec with a fresh random key, for single-process deployments.
    pub fn generate() -> Self {
        use rand::RngExt;
        let mut key = vec![0u8; TOKEN_KEY_LEN];
        rand::rng().fill(key.as_mut_slice());
        Self {
            key: Secret::new(key),
            lifetime: Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn serialize(&self, fields: &TokenFields) -> Result<String> {
        self.serialize_at(fields, Utc::now())
    }

    pub fn serialize_at(&self, fields: &TokenFields, now: DateTime<Utc>) -> Result<String> {
        let parts = [
            fields.identity_url.as_str(),
            fields.provider_local_id.as_str(),
            fields.provider_endpoint.as_str(),
        ];
        if parts.iter().any(|p| p.contains('\0')) {
            return Err(Error::ProtocolViolation(
                "token fields may not contain NUL".into(),
            ));
        }

        let mut payload = now.timestamp().to_string().into_bytes();
        for part in parts {
            payload.push(0);
            payload.extend_from_slice(part.as_bytes());
        }

        let mut token = self.mac(&payload).finalize().into_bytes().to_vec();
        token.extend_from_slice(&payload);
        Ok(STANDARD.encode(token))
    }

    pub fn deserialize(&self, token: &str) -> Result<TokenFields> {
        self.deserialize_at(token, Utc::now())
    }

    /// Verify the signature (constant time), then the expiry, then split the
    /// payload into fields.
    pub fn deserialize_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenFields> {
        let raw = STANDARD
            .decode(token)
            .map_err(|e| Error::SignatureInvalid(format!("token is not base64: {e}")))?;
        if raw.len() <= SIGNATURE_LEN {
            return Err(Error::SignatureInvalid("token is truncated".into()));
        }
        let (signature, payload) = raw.split_at(SIGNATURE_LEN);
        self.mac(payload)
            .verify_slice(signature)
            .map_err(|_| Error::SignatureInvalid("token signature mismatch".into()))?;

        let text = std::str::from_utf8(payload)
            .map_err(|_| Error::ProtocolViolation("token payload is not UTF-8".into()))?;
        let parts: Vec<&str> = text.split('\0').collect();
        let [stamp, identity_url, provider_local_id, provider_endpoint] = parts.as_slice() else {
            return Err(Error::ProtocolViolation(format!(
                "token carries {} fields, expected 4",
                parts.len()
            )));
        };

        let issued = stamp
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| Error::ProtocolViolation("token timestamp is invalid".into()))?;
        if now > issued + self.lifetime {
            return Err(Error::SignatureInvalid(format!(
                "token issued at {issued} has expired"
            )));
        }

        Ok(TokenFields {
            identity_url: identity_url.to_string(),
            provider_local_id: provider_local_id.to_string(),
            provider_endpoint: provider_endpoint.to_string(),
        })
    }

    fn mac(&self, payload: &[u8]) -> HmacSha1 {
        let mut mac =
            HmacSha1::new_from_slice(self.key.expose()).expect("HMAC can take key of any size");
        mac.update(payload);
        mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fields() -> TokenFields {
        TokenFields {
            identity_url: "http://bob.example/".into(),
            provider_local_id: "http://bob.op.example/".into(),
            provider_endpoint: "http://op.example/server".into(),
        }
    }

    fn codec() -> TokenCodec {
        TokenCodec::new(vec![0x42; TOKEN_KEY_LEN]).unwrap()
    }

    #[test]
    fn round_trips_fields() {
        let codec = codec();
        let token = codec.serialize(&fields()).unwrap();
        assert_eq!(codec.deserialize(&token).unwrap(), fields());
    }

    #[test]
    fn any_flipped_byte_fails() {
        let codec = codec();
        let token = codec.serialize(&fields()).unwrap();
        let raw = STANDARD.decode(&token).unwrap();

        for index in [0, SIGNATURE_LEN - 1, SIGNATURE_LEN, raw.len() - 1] {
            let mut tampered = raw.clone();
            tampered[index] ^= 0x01;
            let result = codec.deserialize(&STANDARD.encode(&tampered));
            assert!(
                matches!(result, Err(Error::SignatureInvalid(_))),
                "flipping byte {index} must invalidate the token"
            );
        }
    }

    #[test]
    fn different_key_fails() {
        let token = codec().serialize(&fields()).unwrap();
        let other = TokenCodec::new(vec![0x43; TOKEN_KEY_LEN]).unwrap();
        assert!(other.deserialize(&token).is_err());
    }

    #[test]
    fn expiry_boundary() {
        let codec = codec();
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let token = codec.serialize_at(&fields(), t0).unwrap();
        let lifetime = codec.lifetime();

        assert!(
            codec
                .deserialize_at(&token, t0 + lifetime - Duration::seconds(1))
                .is_ok()
        );
        assert!(matches!(
            codec.deserialize_at(&token, t0 + lifetime + Duration::seconds(1)),
            Err(Error::SignatureInvalid(_))
        ));
    }

    #[test]
    fn rejects_wrong_key_length() {
        assert!(TokenCodec::new(vec![0u8; 16]).is_err());
    }

    #[test]
    fn rejects_nul_in_fields() {
        let mut bad = fields();
        bad.identity_url = "http://bob.example/\0evil".into();
        assert!(codec().serialize(&bad).is_err());
    }

    #[test]
    fn truncated_and_non_base64_tokens_fail() {
        let codec = codec();
        assert!(codec.deserialize("%%%").is_err());
        assert!(codec.deserialize(&STANDARD.encode([0u8; 10])).is_err());
    }

    #[test]
    fn generated_codecs_do_not_share_keys() {
        let a = TokenCodec::generate();
        let b = TokenCodec::generate();
        let token = a.serialize(&fields()).unwrap();
        assert!(a.deserialize(&token).is_ok());
        assert!(b.deserialize(&token).is_err());
    }
}
