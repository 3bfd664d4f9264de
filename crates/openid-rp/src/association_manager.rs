//! Association negotiation with providers
//!
//! `get_or_create` either returns a stored association with useful life left
//! or runs the associate exchange:
//!
//! 1. Propose the strongest association/session pair the settings permit
//! 2. On `error_code: unsupported-type`, retry once with the provider's
//!    suggestion if it is permitted and compatible
//! 3. Recover the MAC key (plaintext or Diffie-Hellman) and store it
//!
//! Failure at any step yields `None`: the login continues without an
//! association and the assertion is verified with `check_authentication`.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{Duration, Utc};
use discovery::ServiceEndpoint;
use openid_auth::association::select_best;
use openid_auth::constants::{DEFAULT_ASSOCIATION_LIFETIME_SECS, UNSUPPORTED_TYPE, mode};
use openid_auth::{
    Association, AssociationType, DiffieHellman, Error, Message, Result, SecuritySettings,
    SessionType,
};
use tracing::{debug, info, warn};

use crate::channel::DirectChannel;
use crate::metrics;
use crate::store::AssociationStore;

/// Outcome of a single associate request.
enum Negotiation {
    Established(Association),
    /// Provider declined; carries its suggested alternative, if any
    Declined {
        association_type: Option<AssociationType>,
        session_type: Option<SessionType>,
    },
}

pub struct AssociationManager {
    store: Arc<dyn AssociationStore>,
    channel: Arc<dyn DirectChannel>,
    settings: Arc<SecuritySettings>,
}

impl AssociationManager {
    pub fn new(
        store: Arc<dyn AssociationStore>,
        channel: Arc<dyn DirectChannel>,
        settings: Arc<SecuritySettings>,
    ) -> Self {
        Self {
            store,
            channel,
            settings,
        }
    }

    /// Newest stored association for the endpoint that the settings permit
    /// and that will outlive a full authentication round trip.
    pub async fn get_existing(&self, endpoint: &ServiceEndpoint) -> Option<Association> {
        let key = endpoint.provider_endpoint.as_str();
        let all = match self.store.get_all(key).await {
            Ok(all) => all,
            Err(e) => {
                warn!(endpoint = key, error = %e, "association store lookup failed");
                return None;
            }
        };
        let now = Utc::now();
        all.into_iter().find(|a| {
            let kind = a.association_type();
            self.settings.permits_hash_bits(kind.hash_bits())
                && kind.supported_by(endpoint.version)
                && a.has_useful_life_remaining(now, self.settings.maximum_authentication_time)
        })
    }

    /// Existing association, or a newly negotiated one. Never fails: any
    /// problem downgrades the login to stateless verification.
    pub async fn get_or_create(&self, endpoint: &ServiceEndpoint) -> Option<Association> {
        if let Some(existing) = self.get_existing(endpoint).await {
            debug!(
                endpoint = %endpoint.provider_endpoint,
                handle = existing.handle(),
                "reusing association"
            );
            metrics::record_association("reused");
            return Some(existing);
        }
        match self.create(endpoint).await {
            Ok(association) => Some(association),
            Err(e) => {
                warn!(
                    endpoint = %endpoint.provider_endpoint,
                    error = %e,
                    "association unavailable, continuing without one"
                );
                metrics::record_association("failed");
                None
            }
        }
    }

    async fn create(&self, endpoint: &ServiceEndpoint) -> Result<Association> {
        let secure = endpoint.is_transport_secure();
        let (association_type, session_type) =
            select_best(endpoint.version, &self.settings, secure).ok_or_else(|| {
                Error::AssociationUnavailable(format!(
                    "no permitted association type for {} provider",
                    endpoint.version
                ))
            })?;

        let (association, outcome) = match self
            .negotiate(endpoint, association_type, session_type)
            .await?
        {
            Negotiation::Established(association) => (association, "created"),
            Negotiation::Declined {
                association_type: suggested_type,
                session_type: suggested_session,
            } => {
                let (retry_type, retry_session) = self
                    .acceptable_suggestion(endpoint, suggested_type, suggested_session)
                    .filter(|pair| *pair != (association_type, session_type))
                    .ok_or_else(|| {
                        Error::AssociationUnavailable(format!(
                            "provider declined {} / {:?} without a usable alternative",
                            association_type.name(),
                            session_type
                        ))
                    })?;
                info!(
                    endpoint = %endpoint.provider_endpoint,
                    assoc_type = retry_type.name(),
                    "renegotiating association with provider's suggestion"
                );
                match self.negotiate(endpoint, retry_type, retry_session).await? {
                    Negotiation::Established(association) => (association, "renegotiated"),
                    Negotiation::Declined { .. } => {
                        return Err(Error::AssociationUnavailable(
                            "provider declined its own suggested association type".into(),
                        ));
                    }
                }
            }
        };

        self.store
            .store(endpoint.provider_endpoint.as_str(), association.clone())
            .await?;
        info!(
            endpoint = %endpoint.provider_endpoint,
            handle = association.handle(),
            assoc_type = association.association_type().name(),
            expires = %association.expires(),
            "association established"
        );
        metrics::record_association(outcome);
        Ok(association)
    }

    /// A suggested pair is usable when it is within the hash range, spoken
    /// by the provider's version, listed in the compatibility table, and
    /// not plaintext over an insecure transport.
    fn acceptable_suggestion(
        &self,
        endpoint: &ServiceEndpoint,
        association_type: Option<AssociationType>,
        session_type: Option<SessionType>,
    ) -> Option<(AssociationType, SessionType)> {
        let association_type = association_type?;
        let session_type = session_type?;
        let permitted = self.settings.permits_hash_bits(association_type.hash_bits())
            && association_type.supported_by(endpoint.version)
            && session_type.is_compatible_with(association_type)
            && (session_type.is_diffie_hellman() || endpoint.is_transport_secure());
        permitted.then_some((association_type, session_type))
    }

    async fn negotiate(
        &self,
        endpoint: &ServiceEndpoint,
        association_type: AssociationType,
        session_type: SessionType,
    ) -> Result<Negotiation> {
        let version = endpoint.version;
        let mut request = Message::for_version(version);
        request.set("mode", mode::ASSOCIATE);
        request.set("assoc_type", association_type.name());
        let session_name = session_type.name(version);
        if !session_name.is_empty() {
            request.set("session_type", session_name);
        }
        let dh = session_type.is_diffie_hellman().then(DiffieHellman::generate);
        if let Some(dh) = &dh {
            request.set("dh_consumer_public", dh.public_key_base64());
        }

        debug!(
            endpoint = %endpoint.provider_endpoint,
            assoc_type = association_type.name(),
            session_type = session_name,
            "sending associate request"
        );
        let response = self
            .channel
            .post(&endpoint.provider_endpoint, &request)
            .await?;

        if let Some(error) = response.get("error") {
            if response.get("error_code") == Some(UNSUPPORTED_TYPE) {
                return Ok(Negotiation::Declined {
                    association_type: response.get("assoc_type").and_then(AssociationType::parse),
                    session_type: response.get("session_type").and_then(SessionType::parse),
                });
            }
            return Err(Error::AssociationUnavailable(format!(
                "provider rejected associate request: {error}"
            )));
        }

        let handle = response.require("assoc_handle")?;
        let returned_type = response.require("assoc_type")?;
        if returned_type != association_type.name() {
            return Err(Error::ProtocolViolation(format!(
                "requested {} association, provider returned {returned_type}",
                association_type.name()
            )));
        }
        let returned_session = SessionType::parse(response.get("session_type").unwrap_or(""))
            .ok_or_else(|| Error::ProtocolViolation("unknown session_type in response".into()))?;
        if returned_session != session_type {
            return Err(Error::ProtocolViolation(format!(
                "requested {session_type:?} session, provider returned {returned_session:?}"
            )));
        }

        let lifetime = match response.get("expires_in") {
            Some(secs) => secs.parse::<i64>().map_err(|_| {
                Error::ProtocolViolation(format!("expires_in is not a number: {secs:?}"))
            })?,
            None => DEFAULT_ASSOCIATION_LIFETIME_SECS,
        };

        let secret = match &dh {
            Some(dh) => {
                let encrypted = decode_field(&response, "enc_mac_key")?;
                dh.xor_secret(
                    session_type,
                    response.require("dh_server_public")?,
                    &encrypted,
                )?
            }
            None => decode_field(&response, "mac_key")?,
        };

        let association = Association::new(
            handle,
            secret,
            association_type,
            Utc::now(),
            Duration::seconds(lifetime),
        )?;
        Ok(Negotiation::Established(association))
    }
}

fn decode_field(message: &Message, name: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(message.require(name)?)
        .map_err(|e| Error::ProtocolViolation(format!("{name} is not base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryAssociationStore;
    use crate::test_support::{AssociateBehavior, MockProvider};
    use discovery::ProtocolVersion;
    use url::Url;

    fn endpoint(url: &str, version: ProtocolVersion) -> ServiceEndpoint {
        ServiceEndpoint::claimed(
            "https://alice.example/",
            None,
            Url::parse(url).unwrap(),
            version,
        )
    }

    fn manager(
        provider: &Arc<MockProvider>,
        store: &Arc<MemoryAssociationStore>,
        settings: SecuritySettings,
    ) -> AssociationManager {
        AssociationManager::new(store.clone(), provider.clone(), Arc::new(settings))
    }

    #[tokio::test]
    async fn plaintext_session_over_https() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryAssociationStore::new());
        let manager = manager(&provider, &store, SecuritySettings::default());

        let ep = endpoint("https://op.example/auth", ProtocolVersion::V20);
        let association = manager.get_or_create(&ep).await.unwrap();
        assert_eq!(association.handle(), "H1");
        assert_eq!(association.association_type(), AssociationType::HmacSha256);
        assert_eq!(
            provider.last_session_type().as_deref(),
            Some("no-encryption")
        );
        assert_eq!(
            association.secret().expose(),
            &provider.secret_for("H1").unwrap()
        );
    }

    #[tokio::test]
    async fn diffie_hellman_session_over_http() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryAssociationStore::new());
        let manager = manager(&provider, &store, SecuritySettings::default());

        let ep = endpoint("http://op.example/auth", ProtocolVersion::V20);
        let association = manager.get_or_create(&ep).await.unwrap();
        assert_eq!(provider.last_session_type().as_deref(), Some("DH-SHA256"));
        assert_eq!(
            association.secret().expose(),
            &provider.secret_for("H1").unwrap()
        );
    }

    #[tokio::test]
    async fn one_dot_x_provider_gets_sha1() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryAssociationStore::new());
        let manager = manager(&provider, &store, SecuritySettings::default());

        let ep = endpoint("https://op.example/server", ProtocolVersion::V11);
        let association = manager.get_or_create(&ep).await.unwrap();
        assert_eq!(association.association_type(), AssociationType::HmacSha1);
        // 1.x spells no-encryption by omitting session_type
        assert_eq!(provider.last_session_type(), None);
    }

    #[tokio::test]
    async fn second_call_reuses_stored_association() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryAssociationStore::new());
        let manager = manager(&provider, &store, SecuritySettings::default());
        let ep = endpoint("https://op.example/auth", ProtocolVersion::V20);

        manager.get_or_create(&ep).await.unwrap();
        manager.get_or_create(&ep).await.unwrap();
        assert_eq!(provider.associate_calls(), 1);
    }

    #[tokio::test]
    async fn renegotiates_once_with_suggested_type() {
        let provider = Arc::new(MockProvider::new());
        provider.set_behavior(AssociateBehavior::SuggestOnce {
            assoc_type: "HMAC-SHA1",
            session_type: "DH-SHA1",
        });
        let store = Arc::new(MemoryAssociationStore::new());
        let manager = manager(&provider, &store, SecuritySettings::default());

        let ep = endpoint("http://op.example/auth", ProtocolVersion::V20);
        let association = manager.get_or_create(&ep).await.unwrap();
        assert_eq!(association.association_type(), AssociationType::HmacSha1);
        assert_eq!(provider.associate_calls(), 2);
    }

    #[tokio::test]
    async fn rejects_plaintext_suggestion_over_http() {
        let provider = Arc::new(MockProvider::new());
        provider.set_behavior(AssociateBehavior::SuggestOnce {
            assoc_type: "HMAC-SHA1",
            session_type: "no-encryption",
        });
        let store = Arc::new(MemoryAssociationStore::new());
        let manager = manager(&provider, &store, SecuritySettings::default());

        let ep = endpoint("http://op.example/auth", ProtocolVersion::V20);
        assert!(manager.get_or_create(&ep).await.is_none());
        assert_eq!(provider.associate_calls(), 1, "no retry for an unsafe suggestion");
    }

    #[tokio::test]
    async fn rejects_suggestion_outside_hash_range() {
        let provider = Arc::new(MockProvider::new());
        provider.set_behavior(AssociateBehavior::SuggestOnce {
            assoc_type: "HMAC-SHA1",
            session_type: "DH-SHA1",
        });
        let store = Arc::new(MemoryAssociationStore::new());
        let settings = SecuritySettings {
            minimum_hash_bits: 256,
            ..Default::default()
        };
        let manager = manager(&provider, &store, settings);

        let ep = endpoint("http://op.example/auth", ProtocolVersion::V20);
        assert!(manager.get_or_create(&ep).await.is_none());
        assert_eq!(provider.associate_calls(), 1);
    }

    #[tokio::test]
    async fn retries_at_most_once() {
        let provider = Arc::new(MockProvider::new());
        provider.set_behavior(AssociateBehavior::AlwaysSuggest {
            assoc_type: "HMAC-SHA1",
            session_type: "DH-SHA1",
        });
        let store = Arc::new(MemoryAssociationStore::new());
        let manager = manager(&provider, &store, SecuritySettings::default());

        let ep = endpoint("http://op.example/auth", ProtocolVersion::V20);
        assert!(manager.get_or_create(&ep).await.is_none());
        assert_eq!(provider.associate_calls(), 2);
    }

    #[tokio::test]
    async fn network_failure_yields_none() {
        let provider = Arc::new(MockProvider::new());
        provider.set_behavior(AssociateBehavior::Unreachable);
        let store = Arc::new(MemoryAssociationStore::new());
        let manager = manager(&provider, &store, SecuritySettings::default());

        let ep = endpoint("https://op.example/auth", ProtocolVersion::V20);
        assert!(manager.get_or_create(&ep).await.is_none());
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn existing_association_without_useful_life_is_ignored() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryAssociationStore::new());
        let ep = endpoint("https://op.example/auth", ProtocolVersion::V20);
        let dying = Association::new(
            "OLD",
            vec![0u8; 32],
            AssociationType::HmacSha256,
            Utc::now() - Duration::minutes(58),
            Duration::hours(1),
        )
        .unwrap();
        store
            .store(ep.provider_endpoint.as_str(), dying)
            .await
            .unwrap();

        let manager = manager(&provider, &store, SecuritySettings::default());
        assert!(manager.get_existing(&ep).await.is_none());
        let fresh = manager.get_or_create(&ep).await.unwrap();
        assert_eq!(fresh.handle(), "H1");
    }

    #[tokio::test]
    async fn existing_association_outside_settings_is_ignored() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryAssociationStore::new());
        let ep = endpoint("https://op.example/auth", ProtocolVersion::V20);
        let weak = Association::new(
            "SHA1",
            vec![0u8; 20],
            AssociationType::HmacSha1,
            Utc::now(),
            Duration::hours(1),
        )
        .unwrap();
        store.store(ep.provider_endpoint.as_str(), weak).await.unwrap();

        let settings = SecuritySettings {
            minimum_hash_bits: 256,
            ..Default::default()
        };
        let manager = manager(&provider, &store, settings);
        assert!(manager.get_existing(&ep).await.is_none());
    }
}
