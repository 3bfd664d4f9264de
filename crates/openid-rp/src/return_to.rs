//! return_to URL arguments and their signature
//!
//! The relying party appends its own state to return_to under the reserved
//! `rp.` prefix and signs the complete query with the private secret. The
//! signature base is the form-urlencoded query, sorted by key, without the
//! signature parameter itself; it covers caller callback arguments too.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use openid_auth::{Error, Result};
use url::Url;
use url::form_urlencoded;

use crate::private_secret::PrivateSecretManager;

/// Prefix reserved for the relying party's own return_to arguments.
pub const RESERVED_PREFIX: &str = "rp.";

pub const SIGNATURE: &str = "rp.return_to_sig";
pub const SIGNATURE_HANDLE: &str = "rp.return_to_sig_handle";
pub const USER_SUPPLIED_IDENTIFIER: &str = "rp.user_supplied_id";
pub const NONCE: &str = "rp.nonce";
pub const TOKEN: &str = "rp.token";

/// Whether a caller may use `name` as a callback argument.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX) || name.starts_with("openid.")
}

/// First value of query parameter `name`.
pub fn query_value(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Caller callback arguments carried by a return_to URL.
pub fn callback_arguments(url: &Url) -> Vec<(String, String)> {
    url.query_pairs()
        .filter(|(k, _)| !is_reserved(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn signing_base(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != SIGNATURE)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Append the handle and signature of the current private secret.
pub async fn sign(url: &mut Url, secrets: &PrivateSecretManager) -> Result<()> {
    let secret = secrets.current().await?;
    url.query_pairs_mut()
        .append_pair(SIGNATURE_HANDLE, secret.handle());
    let signature = secret.sign(signing_base(url).as_bytes());
    url.query_pairs_mut()
        .append_pair(SIGNATURE, &STANDARD.encode(signature));
    Ok(())
}

/// `Ok(false)` when the URL carries no signature, `Ok(true)` when it does
/// and it verifies, an error when it does and it doesn't.
pub async fn verify(url: &Url, secrets: &PrivateSecretManager) -> Result<bool> {
    let Some(signature) = query_value(url, SIGNATURE) else {
        return Ok(false);
    };
    let handle = query_value(url, SIGNATURE_HANDLE).ok_or_else(|| {
        Error::SignatureInvalid("return_to signature without a handle".into())
    })?;
    let signature = STANDARD
        .decode(signature)
        .map_err(|e| Error::SignatureInvalid(format!("return_to signature is not base64: {e}")))?;
    secrets
        .verify(signing_base(url).as_bytes(), &handle, &signature)
        .await?;
    Ok(true)
}

/// The assertion's return_to must name the URL the response arrived at:
/// same scheme, host, port, and path, with every return_to query parameter
/// present in the request with the same value.
pub fn matches_request(return_to: &Url, request: &Url) -> bool {
    if return_to.scheme() != request.scheme()
        || return_to.host_str() != request.host_str()
        || return_to.port_or_known_default() != request.port_or_known_default()
        || return_to.path() != request.path()
    {
        return false;
    }
    let actual: Vec<(String, String)> = request
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    return_to
        .query_pairs()
        .all(|(k, v)| actual.iter().any(|(ak, av)| *ak == k && *av == v))
}
