//! Response nonces
//!
//! OpenID 2.0 nonces are a UTC timestamp (`YYYY-MM-DDTHH:MM:SSZ`) followed by
//! up to 235 printable ASCII characters that make the value unique. The
//! relying party mints nonces in the same format for 1.x providers, which do
//! not send one.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};
use rand::RngExt;

use crate::error::{Error, Result};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const TIMESTAMP_LEN: usize = 20;
const MAX_NONCE_LEN: usize = 255;

/// A parsed nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce {
    pub value: String,
    pub timestamp: DateTime<Utc>,
}

impl Nonce {
    pub fn parse(value: &str) -> Result<Self> {
        if value.len() > MAX_NONCE_LEN || !value.bytes().all(|b| (0x21..=0x7e).contains(&b)) {
            return Err(Error::ProtocolViolation(format!(
                "malformed nonce {value:?}"
            )));
        }
        let stamp = value.get(..TIMESTAMP_LEN).ok_or_else(|| {
            Error::ProtocolViolation(format!("nonce too short for a timestamp: {value:?}"))
        })?;
        let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).map_err(|e| {
            Error::ProtocolViolation(format!("nonce timestamp {stamp:?} is invalid: {e}"))
        })?;
        Ok(Self {
            value: value.to_string(),
            timestamp: naive.and_utc(),
        })
    }

    /// New nonce stamped `now` with 16 random bytes of uniqueness.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill(&mut bytes);
        let value = format!(
            "{}{}",
            now.format(TIMESTAMP_FORMAT),
            URL_SAFE_NO_PAD.encode(bytes)
        );
        // second precision, matching what parse() recovers
        let timestamp = now.with_nanosecond(0).unwrap_or(now);
        Self { value, timestamp }
    }

    /// Reject nonces older than `max_age` or stamped further ahead than
    /// `max_skew`.
    pub fn check_age(&self, now: DateTime<Utc>, max_age: Duration, max_skew: Duration) -> Result<()> {
        if self.timestamp + max_age < now {
            return Err(Error::ProtocolViolation(format!(
                "nonce {} has expired",
                self.value
            )));
        }
        if self.timestamp - max_skew > now {
            return Err(Error::ProtocolViolation(format!(
                "nonce {} is stamped in the future",
                self.value
            )));
        }
        Ok(())
    }
}
