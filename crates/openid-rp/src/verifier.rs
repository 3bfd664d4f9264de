//! Assertion verification
//!
//! Turns the parameters of an inbound provider redirect into an
//! `AuthenticationResponse`. A positive assertion is accepted only when all
//! of these hold, checked in order:
//!
//! 1. The protocol version is permitted and return_to names this request
//! 2. Our own return_to signature (if present) verifies
//! 3. The endpoint rebuilt from the assertion passes provider policy
//! 4. The security-relevant fields are covered by the provider's signature
//! 5. Fresh discovery on the claimed identifier yields that same endpoint
//! 6. The signature verifies, locally or via `check_authentication`
//! 7. Every nonce is fresh and unused
//!
//! Nonces are recorded last so a forged assertion cannot burn a genuine one.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use discovery::{Discovery, ProtocolVersion, ServiceEndpoint};
use openid_auth::constants::{PRIVATE_NONCE_CONTEXT, mode};
use openid_auth::{Error, Message, Nonce, Result, SecuritySettings, TokenCodec};
use tracing::{debug, info, warn};
use url::Url;

use crate::channel::DirectChannel;
use crate::metrics;
use crate::private_secret::PrivateSecretManager;
use crate::response::{AuthenticationResponse, PositiveAssertion};
use crate::return_to;
use crate::store::{AssociationStore, NonceStore};

/// An inbound request as the caller received it: the full URL it arrived at
/// and its query or form parameters.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub url: Url,
    pub params: Vec<(String, String)>,
}

impl IncomingRequest {
    pub fn new(url: Url, params: Vec<(String, String)>) -> Self {
        Self { url, params }
    }

    /// A GET request: the parameters are the URL's query.
    pub fn from_url(url: Url) -> Self {
        let params = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self { url, params }
    }
}

pub struct AssertionVerifier {
    discovery: Arc<dyn Discovery>,
    associations: Arc<dyn AssociationStore>,
    nonces: Arc<dyn NonceStore>,
    channel: Arc<dyn DirectChannel>,
    private_secret: Arc<PrivateSecretManager>,
    token_codec: Arc<TokenCodec>,
    settings: Arc<SecuritySettings>,
}

impl AssertionVerifier {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        associations: Arc<dyn AssociationStore>,
        nonces: Arc<dyn NonceStore>,
        channel: Arc<dyn DirectChannel>,
        private_secret: Arc<PrivateSecretManager>,
        token_codec: Arc<TokenCodec>,
        settings: Arc<SecuritySettings>,
    ) -> Self {
        Self {
            discovery,
            associations,
            nonces,
            channel,
            private_secret,
            token_codec,
            settings,
        }
    }

    /// Verify an inbound redirect. Never fails: errors become
    /// `AuthenticationResponse::Failed`.
    pub async fn verify(&self, request: &IncomingRequest) -> AuthenticationResponse {
        let response = match self.process(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "assertion rejected");
                AuthenticationResponse::Failed(e)
            }
        };
        if let AuthenticationResponse::Authenticated(assertion) = &response {
            info!(
                claimed_id = assertion.claimed_identifier(),
                provider = %assertion.provider_endpoint(),
                "assertion verified"
            );
        }
        metrics::record_assertion(response.outcome());
        response
    }

    async fn process(&self, request: &IncomingRequest) -> Result<AuthenticationResponse> {
        let message = Message::from_indirect(
            request
                .params
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        if message.fields().is_empty() {
            return Err(Error::ProtocolViolation(
                "request carries no OpenID message".into(),
            ));
        }

        match message.mode()? {
            mode::CANCEL => Ok(AuthenticationResponse::Canceled),
            mode::SETUP_NEEDED => Ok(AuthenticationResponse::SetupRequired {
                user_supplied_identifier: return_to::query_value(
                    &request.url,
                    return_to::USER_SUPPLIED_IDENTIFIER,
                ),
                setup_url: None,
            }),
            mode::ID_RES if !message.version().is_v2() && message.contains("user_setup_url") => {
                let setup_url = parse_url(message.require("user_setup_url")?, "user_setup_url")?;
                Ok(AuthenticationResponse::SetupRequired {
                    user_supplied_identifier: return_to::query_value(
                        &request.url,
                        return_to::USER_SUPPLIED_IDENTIFIER,
                    ),
                    setup_url: Some(setup_url),
                })
            }
            mode::ID_RES => self.verify_positive(&message, request).await,
            mode::ERROR => Err(Error::ProtocolViolation(format!(
                "provider reported an error: {}",
                message.get("error").unwrap_or("unspecified")
            ))),
            other => Err(Error::ProtocolViolation(format!(
                "unexpected mode {other:?} in indirect response"
            ))),
        }
    }

    async fn verify_positive(
        &self,
        message: &Message,
        request: &IncomingRequest,
    ) -> Result<AuthenticationResponse> {
        let version = message.version();
        if !self.settings.permits_version(version) {
            return Err(Error::ProtocolViolation(format!(
                "OpenID {version} assertions are not accepted"
            )));
        }

        let return_to = parse_url(message.require("return_to")?, "return_to")?;
        if !return_to::matches_request(&return_to, &request.url) {
            return Err(Error::ProtocolViolation(format!(
                "return_to {return_to} does not match the request URL"
            )));
        }
        let return_to_signed = return_to::verify(&return_to, &self.private_secret).await?;
        if !return_to_signed && self.settings.reject_unsolicited_assertions {
            return Err(Error::ProtocolViolation(
                "unsolicited assertions are not accepted".into(),
            ));
        }

        let mut endpoint = self.asserted_endpoint(message, &return_to)?;
        // Only a return_to we signed can vouch for what the user typed.
        let supplied = return_to_signed
            .then(|| return_to::query_value(&return_to, return_to::USER_SUPPLIED_IDENTIFIER))
            .flatten();
        if let Some(supplied) = supplied {
            endpoint = endpoint.with_user_supplied_identifier(supplied);
        }

        self.check_provider_policy(&endpoint)?;
        check_signed_fields(message, version)?;
        self.confirm_discovery(&endpoint).await?;
        self.check_signature(message, &endpoint).await?;
        self.check_nonces(message, &endpoint, &return_to, return_to_signed)
            .await?;

        let signed: Vec<&str> = message.signed_fields()?;
        let signed_fields = signed
            .iter()
            .filter_map(|name| message.get(name).map(|v| (name.to_string(), v.to_string())))
            .collect();

        Ok(AuthenticationResponse::Authenticated(Box::new(
            PositiveAssertion {
                endpoint,
                signed_fields,
                extensions: collect_extensions(
                    message,
                    &signed,
                    self.settings.ignore_unsigned_extensions,
                ),
                callback_arguments: return_to::callback_arguments(&return_to)
                    .into_iter()
                    .collect(),
                return_to_signed,
            },
        )))
    }

    /// Rebuild the endpoint the assertion claims to come from. 2.0 carries
    /// it in the message; 1.x relies on the token we put in return_to.
    fn asserted_endpoint(&self, message: &Message, return_to: &Url) -> Result<ServiceEndpoint> {
        if message.version().is_v2() {
            let provider = parse_url(message.require("op_endpoint")?, "op_endpoint")?;
            return match (message.get("claimed_id"), message.get("identity")) {
                (Some(claimed), Some(identity)) => Ok(ServiceEndpoint::claimed(
                    claimed,
                    Some(identity.to_string()),
                    provider,
                    ProtocolVersion::V20,
                )),
                (None, None) => Err(Error::ProtocolViolation(
                    "assertion does not name an identifier".into(),
                )),
                _ => Err(Error::ProtocolViolation(
                    "claimed_id and identity must appear together".into(),
                )),
            };
        }

        let token = return_to::query_value(return_to, return_to::TOKEN).ok_or_else(|| {
            Error::ProtocolViolation("1.x assertion without an endpoint token".into())
        })?;
        let fields = self.token_codec.deserialize(&token)?;
        let identity = message.require("identity")?;
        if identity != fields.provider_local_id {
            return Err(Error::ProtocolViolation(format!(
                "asserted identity {identity} differs from the requested {}",
                fields.provider_local_id
            )));
        }
        let provider = parse_url(&fields.provider_endpoint, "token provider endpoint")?;
        Ok(ServiceEndpoint::claimed(
            fields.identity_url,
            Some(fields.provider_local_id),
            provider,
            ProtocolVersion::V11,
        ))
    }

    fn check_provider_policy(&self, endpoint: &ServiceEndpoint) -> Result<()> {
        if !self.settings.is_trusted_provider(&endpoint.provider_endpoint) {
            return Err(Error::ProtocolViolation(format!(
                "provider {} is not trusted",
                endpoint.provider_endpoint
            )));
        }
        if self.settings.require_ssl
            && (!endpoint.is_transport_secure()
                || !endpoint.claimed_identifier.starts_with("https://"))
        {
            return Err(Error::ProtocolViolation(
                "assertion over an insecure identifier or provider".into(),
            ));
        }
        Ok(())
    }

    async fn confirm_discovery(&self, endpoint: &ServiceEndpoint) -> Result<()> {
        let claimed = endpoint.claimed_identifier_without_fragment();
        let discovered = self.discovery.discover(claimed).await.map_err(|e| {
            Error::DiscoveryMismatch(format!("discovery on {claimed} failed: {e}"))
        })?;
        if !discovered.contains(endpoint) {
            warn!(
                claimed_id = %claimed,
                provider = %endpoint.provider_endpoint,
                discovered = discovered.len(),
                "asserted endpoint not found by discovery"
            );
            return Err(Error::DiscoveryMismatch(format!(
                "{} is not an authorized provider for {claimed}",
                endpoint.provider_endpoint
            )));
        }
        Ok(())
    }

    async fn check_signature(&self, message: &Message, endpoint: &ServiceEndpoint) -> Result<()> {
        let handle = message.require("assoc_handle")?;
        let provider = endpoint.provider_endpoint.as_str();
        let association = self
            .associations
            .get_by_handle(provider, handle)
            .await?
            .filter(|a| !a.is_expired(Utc::now()));

        let Some(association) = association else {
            return self.check_authentication(message, endpoint).await;
        };
        let kind = association.association_type();
        if !self.settings.permits_hash_bits(kind.hash_bits()) {
            return Err(Error::ProtocolViolation(format!(
                "{} signatures are not accepted",
                kind.name()
            )));
        }
        association.verify_message(message)?;
        debug!(provider, handle, "signature verified with association");
        Ok(())
    }

    /// Ask the provider to verify its own signature (stateless mode).
    async fn check_authentication(&self, message: &Message, endpoint: &ServiceEndpoint) -> Result<()> {
        let provider = &endpoint.provider_endpoint;
        let mut request = message.clone();
        request.set("mode", mode::CHECK_AUTHENTICATION);

        let response = self.channel.post(provider, &request).await.map_err(|e| {
            Error::SignatureInvalid(format!("check_authentication with {provider} failed: {e}"))
        })?;
        if response.get("is_valid") != Some("true") {
            return Err(Error::SignatureInvalid(format!(
                "provider {provider} did not confirm the signature"
            )));
        }
        if let Some(handle) = response.get("invalidate_handle")
            && self.associations.remove(provider.as_str(), handle).await?
        {
            info!(provider = %provider, handle, "provider invalidated association");
        }
        debug!(provider = %provider, "signature confirmed by check_authentication");
        Ok(())
    }

    async fn check_nonces(
        &self,
        message: &Message,
        endpoint: &ServiceEndpoint,
        return_to: &Url,
        return_to_signed: bool,
    ) -> Result<()> {
        let now = Utc::now();
        if message.version().is_v2() {
            let nonce = Nonce::parse(message.require("response_nonce")?)?;
            self.consume_nonce(endpoint.provider_endpoint.as_str(), &nonce, now)
                .await?;
        }

        match return_to::query_value(return_to, return_to::NONCE) {
            Some(value) => {
                if !return_to_signed {
                    return Err(Error::ProtocolViolation(
                        "relying party nonce in an unsigned return_to".into(),
                    ));
                }
                let nonce = Nonce::parse(&value)?;
                self.consume_nonce(PRIVATE_NONCE_CONTEXT, &nonce, now).await
            }
            None if !message.version().is_v2()
                && self.settings.protect_downlevel_replay_attacks =>
            {
                Err(Error::ProtocolViolation(
                    "1.x assertion without a relying party nonce".into(),
                ))
            }
            None => Ok(()),
        }
    }

    async fn consume_nonce(&self, context: &str, nonce: &Nonce, now: DateTime<Utc>) -> Result<()> {
        nonce.check_age(
            now,
            self.settings.maximum_message_age,
            self.settings.maximum_clock_skew,
        )?;
        if !self
            .nonces
            .store_nonce(context, &nonce.value, nonce.timestamp)
            .await?
        {
            return Err(Error::ReplayDetected(format!(
                "nonce {} already used",
                nonce.value
            )));
        }
        Ok(())
    }
}

/// Fields that must be covered by the provider's signature.
fn check_signed_fields(message: &Message, version: ProtocolVersion) -> Result<()> {
    let mut required = vec!["return_to"];
    if version.is_v2() {
        required.extend(["op_endpoint", "response_nonce", "assoc_handle"]);
        required.extend(
            ["claimed_id", "identity"]
                .into_iter()
                .filter(|name| message.contains(name)),
        );
    } else {
        required.push("identity");
    }
    match required.into_iter().find(|name| !message.is_signed(name)) {
        Some(name) => Err(Error::ProtocolViolation(format!(
            "openid.{name} is not signed"
        ))),
        None => Ok(()),
    }
}

/// Extension arguments grouped by type URI. Aliases are declared with
/// `ns.<alias>`; with `only_signed`, unsigned declarations and arguments are
/// dropped.
fn collect_extensions(
    message: &Message,
    signed: &[&str],
    only_signed: bool,
) -> BTreeMap<String, BTreeMap<String, String>> {
    let admissible = |key: &str| !only_signed || signed.contains(&key);

    let mut aliases: BTreeMap<&str, &str> = BTreeMap::new();
    let mut extensions: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for (key, type_uri) in message.fields() {
        if let Some(alias) = key.strip_prefix("ns.")
            && admissible(key.as_str())
        {
            aliases.insert(alias, type_uri.as_str());
            extensions.entry(type_uri.clone()).or_default();
        }
    }

    for (key, value) in message.fields() {
        let Some((alias, arg)) = key.split_once('.') else {
            continue;
        };
        if alias == "ns" || !admissible(key.as_str()) {
            continue;
        }
        if let Some(type_uri) = aliases.get(alias) {
            extensions
                .entry(type_uri.to_string())
                .or_default()
                .insert(arg.to_string(), value.clone());
        }
    }
    extensions
}

fn parse_url(value: &str, field: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| Error::ProtocolViolation(format!("invalid {field} URL: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryAssociationStore, MemoryNonceStore};
    use crate::test_support::MockProvider;
    use discovery::StaticDiscovery;
    use openid_auth::constants::OPENID2_NS;

    fn verifier(settings: SecuritySettings) -> AssertionVerifier {
        let settings = Arc::new(settings);
        let store: Arc<MemoryAssociationStore> = Arc::new(MemoryAssociationStore::new());
        AssertionVerifier::new(
            Arc::new(StaticDiscovery::new()),
            store.clone(),
            Arc::new(MemoryNonceStore::new(settings.maximum_message_age)),
            Arc::new(MockProvider::new()),
            Arc::new(PrivateSecretManager::new(store, settings.clone())),
            Arc::new(TokenCodec::generate()),
            settings,
        )
    }

    fn incoming(query: &str) -> IncomingRequest {
        IncomingRequest::from_url(Url::parse(&format!("https://rp.example/return?{query}")).unwrap())
    }

    #[tokio::test]
    async fn cancel_is_canceled() {
        let response = verifier(SecuritySettings::default())
            .verify(&incoming("openid.mode=cancel"))
            .await;
        assert!(matches!(response, AuthenticationResponse::Canceled));
    }

    #[tokio::test]
    async fn setup_needed_carries_user_supplied_identifier() {
        let query = format!(
            "rp.user_supplied_id=alice.example&openid.ns={}&openid.mode=setup_needed",
            OPENID2_NS
        );
        let response = verifier(SecuritySettings::default())
            .verify(&incoming(&query))
            .await;
        match response {
            AuthenticationResponse::SetupRequired {
                user_supplied_identifier,
                setup_url,
            } => {
                assert_eq!(user_supplied_identifier.as_deref(), Some("alice.example"));
                assert!(setup_url.is_none());
            }
            other => panic!("expected SetupRequired, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn one_dot_x_user_setup_url_means_setup_required() {
        let response = verifier(SecuritySettings::default())
            .verify(&incoming(
                "openid.mode=id_res&openid.user_setup_url=https%3A%2F%2Fop.example%2Fsetup",
            ))
            .await;
        match response {
            AuthenticationResponse::SetupRequired { setup_url, .. } => {
                assert_eq!(setup_url.unwrap().as_str(), "https://op.example/setup");
            }
            other => panic!("expected SetupRequired, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_mode_and_garbage_fail() {
        let verifier = verifier(SecuritySettings::default());
        let error = verifier
            .verify(&incoming("openid.mode=error&openid.error=boom"))
            .await;
        assert!(matches!(
            error,
            AuthenticationResponse::Failed(Error::ProtocolViolation(_))
        ));

        let empty = verifier.verify(&incoming("session=1")).await;
        assert!(matches!(empty, AuthenticationResponse::Failed(_)));

        let unknown = verifier.verify(&incoming("openid.mode=checkid_setup")).await;
        assert!(matches!(unknown, AuthenticationResponse::Failed(_)));
    }

    #[tokio::test]
    async fn minimum_version_rejects_one_dot_x() {
        let settings = SecuritySettings {
            minimum_version: ProtocolVersion::V20,
            ..Default::default()
        };
        let response = verifier(settings)
            .verify(&incoming("openid.mode=id_res&openid.identity=x"))
            .await;
        match response {
            AuthenticationResponse::Failed(Error::ProtocolViolation(msg)) => {
                assert!(msg.contains("1.1"));
            }
            other => panic!("expected version rejection, got {other:?}"),
        }
    }

    #[test]
    fn unsigned_security_fields_are_rejected() {
        let mut message = Message::for_version(ProtocolVersion::V20);
        for (k, v) in [
            ("mode", "id_res"),
            ("op_endpoint", "https://op.example/auth"),
            ("return_to", "https://rp.example/return"),
            ("response_nonce", "2024-01-01T00:00:00Zabc"),
            ("assoc_handle", "H1"),
            ("claimed_id", "https://alice.example/"),
            ("identity", "https://alice.example/"),
        ] {
            message.set(k, v);
        }
        message.set(
            "signed",
            "op_endpoint,return_to,response_nonce,assoc_handle,claimed_id,identity",
        );
        assert!(check_signed_fields(&message, ProtocolVersion::V20).is_ok());

        message.set("signed", "op_endpoint,return_to,response_nonce,assoc_handle");
        let err = check_signed_fields(&message, ProtocolVersion::V20).unwrap_err();
        assert!(err.to_string().contains("openid.claimed_id"));
    }

    #[test]
    fn extensions_grouped_by_namespace() {
        let message = Message::from_indirect([
            ("openid.ns.sreg", "http://openid.net/extensions/sreg/1.1"),
            ("openid.sreg.email", "alice@example.com"),
            ("openid.sreg.nickname", "alice"),
            ("openid.orphan.value", "ignored"),
            (
                "openid.signed",
                "ns.sreg,sreg.email",
            ),
        ]);
        let signed = message.signed_fields().unwrap();

        let all = collect_extensions(&message, &signed, false);
        let sreg = &all["http://openid.net/extensions/sreg/1.1"];
        assert_eq!(sreg.len(), 2);
        assert_eq!(sreg["email"], "alice@example.com");
        assert_eq!(all.len(), 1);

        let signed_only = collect_extensions(&message, &signed, true);
        let sreg = &signed_only["http://openid.net/extensions/sreg/1.1"];
        assert_eq!(sreg.len(), 1);
        assert!(sreg.contains_key("email"));
    }
}
