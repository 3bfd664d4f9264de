//! Relying party metrics
//!
//! Emitted through the `metrics` facade; the embedding service decides
//! whether a recorder is installed.
//!
//! - `openid_requests_created_total` (counter): label `version`
//! - `openid_associations_total` (counter): label `outcome`
//! - `openid_assertions_total` (counter): label `outcome`

use discovery::ProtocolVersion;

pub fn record_request_created(version: ProtocolVersion) {
    metrics::counter!("openid_requests_created_total", "version" => version.to_string())
        .increment(1);
}

/// `outcome` is `created`, `reused`, `renegotiated`, or `failed`.
pub fn record_association(outcome: &'static str) {
    metrics::counter!("openid_associations_total", "outcome" => outcome).increment(1);
}

/// `outcome` is `authenticated`, `canceled`, `setup_needed`, or an error kind.
pub fn record_assertion(outcome: &'static str) {
    metrics::counter!("openid_assertions_total", "outcome" => outcome).increment(1);
}
