//! Relying party facade
//!
//! `RelyingParty` owns the shared collaborators (discovery, stores, direct
//! channel, security settings) and exposes the three calls a web application
//! needs:
//!
//! 1. `create_requests` - discover, filter, order, and pre-associate
//! 2. `redirect` - serialize one request into the provider redirect URL
//! 3. `verify` - check the provider's answer when the user agent returns
//!
//! It is `Send + Sync`; share it behind an `Arc` across request handlers.

use std::sync::Arc;

use chrono::Utc;
use discovery::{Discovery, ServiceEndpoint, normalize_identifier};
use openid_auth::constants::UI_EXTENSION_NS;
use openid_auth::{
    Error, Message, Nonce, Realm, Result, SecuritySettings, TokenCodec, TokenFields,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::association_manager::AssociationManager;
use crate::channel::DirectChannel;
use crate::metrics;
use crate::private_secret::PrivateSecretManager;
use crate::request::{
    AssociationPreference, AuthenticationRequest, Redirect, RequestOptions, UI_ALIAS,
};
use crate::response::AuthenticationResponse;
use crate::return_to;
use crate::selector::select_endpoints;
use crate::store::{AssociationStore, NonceStore};
use crate::verifier::{AssertionVerifier, IncomingRequest};

pub struct RelyingParty {
    discovery: Arc<dyn Discovery>,
    associations: Arc<dyn AssociationStore>,
    nonces: Arc<dyn NonceStore>,
    association_manager: AssociationManager,
    private_secret: Arc<PrivateSecretManager>,
    token_codec: Arc<TokenCodec>,
    verifier: AssertionVerifier,
    settings: Arc<SecuritySettings>,
}

impl RelyingParty {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        associations: Arc<dyn AssociationStore>,
        nonces: Arc<dyn NonceStore>,
        channel: Arc<dyn DirectChannel>,
        token_codec: TokenCodec,
        settings: SecuritySettings,
    ) -> Self {
        let settings = Arc::new(settings);
        let token_codec = Arc::new(token_codec);
        let private_secret = Arc::new(PrivateSecretManager::new(
            associations.clone(),
            settings.clone(),
        ));
        let association_manager =
            AssociationManager::new(associations.clone(), channel.clone(), settings.clone());
        let verifier = AssertionVerifier::new(
            discovery.clone(),
            associations.clone(),
            nonces.clone(),
            channel,
            private_secret.clone(),
            token_codec.clone(),
            settings.clone(),
        );
        Self {
            discovery,
            associations,
            nonces,
            association_manager,
            private_secret,
            token_codec,
            verifier,
            settings,
        }
    }

    pub fn association_store(&self) -> Arc<dyn AssociationStore> {
        self.associations.clone()
    }

    pub fn nonce_store(&self) -> Arc<dyn NonceStore> {
        self.nonces.clone()
    }

    pub fn settings(&self) -> &SecuritySettings {
        &self.settings
    }

    /// Build one request per usable endpoint for `identifier`, most preferred
    /// first.
    ///
    /// Endpoints that could not associate are moved after those that could
    /// and switched to `IfAlreadyEstablished`, or dropped entirely when the
    /// settings require an association. A failed discovery is an empty list,
    /// not an error; malformed input (identifier, realm, return_to) is.
    pub async fn create_requests(
        &self,
        identifier: &str,
        realm: &Realm,
        return_to: &Url,
        options: &RequestOptions,
    ) -> Result<Vec<AuthenticationRequest>> {
        if !realm.contains(return_to) {
            return Err(Error::ProtocolViolation(format!(
                "return_to {return_to} is not within realm {realm}"
            )));
        }
        if self.settings.require_ssl && return_to.scheme() != "https" {
            return Err(Error::ProtocolViolation(
                "return_to must use https".into(),
            ));
        }
        let normalized =
            normalize_identifier(identifier).map_err(|e| Error::Discovery(e.to_string()))?;
        if self.settings.require_ssl && normalized.scheme() != "https" {
            return Err(Error::ProtocolViolation(format!(
                "identifier {normalized} must use https"
            )));
        }

        let discovered = match self.discovery.discover(normalized.as_str()).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!(
                    identifier = %normalized,
                    discovery = self.discovery.id(),
                    error = %e,
                    "discovery failed"
                );
                return Ok(Vec::new());
            }
        };
        let endpoints: Vec<ServiceEndpoint> = discovered
            .into_iter()
            .map(|ep| ep.with_user_supplied_identifier(identifier))
            .collect();
        let selected = select_endpoints(endpoints, &self.settings, options.filter.as_ref());

        let mut ready = Vec::new();
        let mut deferred = Vec::new();
        for endpoint in selected {
            let builder = AuthenticationRequest::builder(endpoint, realm.clone(), return_to.clone())
                .options(options);
            if options.association_preference != AssociationPreference::IfPossible {
                ready.push(builder.build()?);
                continue;
            }
            let request = builder.build()?;
            if self
                .association_manager
                .get_or_create(request.endpoint())
                .await
                .is_some()
            {
                ready.push(request);
            } else if self.settings.require_association {
                debug!(
                    provider = %request.endpoint().provider_endpoint,
                    "dropping endpoint without association"
                );
            } else {
                deferred.push(rebuild_without_negotiation(request, options)?);
            }
        }
        ready.extend(deferred);

        for request in &ready {
            metrics::record_request_created(request.endpoint().version);
        }
        info!(
            identifier = %normalized,
            requests = ready.len(),
            "created authentication requests"
        );
        Ok(ready)
    }

    /// The provider redirect URL for `request`.
    pub async fn redirect(&self, request: &AuthenticationRequest) -> Result<Redirect> {
        let endpoint = request.endpoint();
        let association = match request.association_preference() {
            AssociationPreference::IfPossible => {
                self.association_manager.get_or_create(endpoint).await
            }
            AssociationPreference::IfAlreadyEstablished => {
                self.association_manager.get_existing(endpoint).await
            }
            AssociationPreference::Never => None,
        };
        if association.is_none() && self.settings.require_association {
            return Err(Error::AssociationUnavailable(format!(
                "no association with {}",
                endpoint.provider_endpoint
            )));
        }

        let return_to = self.return_to_for(request).await?;
        let version = endpoint.version;
        let mut message = Message::for_version(version);
        message.set("mode", request.mode().wire_name());
        message.set("identity", endpoint.provider_local_identifier.as_str());
        if version.is_v2() {
            message.set("claimed_id", endpoint.claimed_identifier.as_str());
            message.set("realm", request.realm().to_string());
        } else {
            message.set("trust_root", request.realm().to_string());
        }
        message.set("return_to", return_to.as_str());
        if let Some(association) = &association {
            message.set("assoc_handle", association.handle());
        }

        for extension in request.extensions() {
            if version.is_v2() {
                message.set(format!("ns.{}", extension.alias), extension.type_uri.as_str());
            }
            for (key, value) in &extension.args {
                message.set(format!("{}.{key}", extension.alias), value.as_str());
            }
        }
        if request.popup() && version.is_v2() {
            message.set(format!("ns.{UI_ALIAS}"), UI_EXTENSION_NS);
            message.set(format!("{UI_ALIAS}.mode"), "popup");
        }

        let mut url = endpoint.provider_endpoint.clone();
        url.query_pairs_mut().extend_pairs(message.to_wire_pairs());
        debug!(
            provider = %endpoint.provider_endpoint,
            version = %version,
            associated = association.is_some(),
            "built provider redirect"
        );
        Ok(Redirect {
            url,
            mode: request.mode(),
            popup: request.popup(),
        })
    }

    /// Verify the provider's redirect back to return_to.
    pub async fn verify(&self, request: &IncomingRequest) -> AuthenticationResponse {
        self.verifier.verify(request).await
    }

    /// return_to with callback arguments and the relying party's own state
    /// appended, then signed.
    async fn return_to_for(&self, request: &AuthenticationRequest) -> Result<Url> {
        let endpoint = request.endpoint();
        let mut url = request.return_to().clone();
        {
            let mut query = url.query_pairs_mut();
            query.extend_pairs(request.callback_arguments());
            if let Some(supplied) = &endpoint.user_supplied_identifier {
                query.append_pair(return_to::USER_SUPPLIED_IDENTIFIER, supplied);
            }
        }

        if !endpoint.version.is_v2() {
            let token = self.token_codec.serialize(&TokenFields {
                identity_url: endpoint.claimed_identifier.clone(),
                provider_local_id: endpoint.provider_local_identifier.clone(),
                provider_endpoint: endpoint.provider_endpoint.to_string(),
            })?;
            url.query_pairs_mut().append_pair(return_to::TOKEN, &token);
        }
        let downlevel = !endpoint.version.is_v2() && self.settings.protect_downlevel_replay_attacks;
        if downlevel || self.settings.reject_unsolicited_assertions {
            let nonce = Nonce::generate(Utc::now());
            url.query_pairs_mut().append_pair(return_to::NONCE, &nonce.value);
        }

        return_to::sign(&mut url, &self.private_secret).await?;
        Ok(url)
    }
}

/// Same request, downgraded to use only an association that already exists.
fn rebuild_without_negotiation(
    request: AuthenticationRequest,
    options: &RequestOptions,
) -> Result<AuthenticationRequest> {
    AuthenticationRequest::builder(
        request.endpoint().clone(),
        request.realm().clone(),
        request.return_to().clone(),
    )
    .options(options)
    .association_preference(AssociationPreference::IfAlreadyEstablished)
    .build()
}
