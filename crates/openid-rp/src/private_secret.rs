//! The relying party's own signing secret
//!
//! Used to sign data the relying party must later trust without server-side
//! session state: the return_to URL (callback arguments, our own nonce, the
//! 1.x endpoint token). The secret is an HMAC-SHA256 association stored under
//! a sentinel endpoint key, created lazily and rotated once it no longer has
//! useful life. Old secrets stay in the store until they expire so signatures
//! made just before a rotation still verify.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use openid_auth::constants::PRIVATE_SECRET_ENDPOINT;
use openid_auth::{Association, AssociationType, Error, Result, SecuritySettings};
use rand::RngExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::store::AssociationStore;

const PRIVATE_SECRET_TYPE: AssociationType = AssociationType::HmacSha256;

pub struct PrivateSecretManager {
    store: Arc<dyn AssociationStore>,
    settings: Arc<SecuritySettings>,
    /// Serializes creation so concurrent logins don't each mint a secret
    rotation: Mutex<()>,
}

impl PrivateSecretManager {
    pub fn new(store: Arc<dyn AssociationStore>, settings: Arc<SecuritySettings>) -> Self {
        Self {
            store,
            settings,
            rotation: Mutex::new(()),
        }
    }

    /// The secret to sign new data with, creating or rotating it as needed.
    pub async fn current(&self) -> Result<Association> {
        let _guard = self.rotation.lock().await;
        let now = Utc::now();
        let existing = self.store.get_all(PRIVATE_SECRET_ENDPOINT).await?;
        if let Some(current) = existing
            .into_iter()
            .find(|a| a.has_useful_life_remaining(now, self.settings.maximum_authentication_time))
        {
            return Ok(current);
        }

        let mut secret = vec![0u8; PRIVATE_SECRET_TYPE.secret_len()];
        rand::rng().fill(secret.as_mut_slice());
        let mut handle_bytes = [0u8; 12];
        rand::rng().fill(&mut handle_bytes);
        let association = Association::new(
            URL_SAFE_NO_PAD.encode(handle_bytes),
            secret,
            PRIVATE_SECRET_TYPE,
            now,
            self.settings.private_secret_maximum_age,
        )?;
        self.store
            .store(PRIVATE_SECRET_ENDPOINT, association.clone())
            .await?;
        info!(
            handle = association.handle(),
            expires = %association.expires(),
            "created private signing secret"
        );
        Ok(association)
    }

    /// Sign `buffer` with the secret named by `handle`.
    pub async fn sign(&self, buffer: &[u8], handle: &str) -> Result<Vec<u8>> {
        Ok(self.lookup(handle).await?.sign(buffer))
    }

    /// Constant-time check of `signature` over `buffer`.
    pub async fn verify(&self, buffer: &[u8], handle: &str, signature: &[u8]) -> Result<()> {
        if self.lookup(handle).await?.verify(buffer, signature) {
            Ok(())
        } else {
            Err(Error::SignatureInvalid(format!(
                "private signature mismatch for handle {handle}"
            )))
        }
    }

    async fn lookup(&self, handle: &str) -> Result<Association> {
        match self
            .store
            .get_by_handle(PRIVATE_SECRET_ENDPOINT, handle)
            .await?
        {
            Some(association) if !association.is_expired(Utc::now()) => Ok(association),
            _ => Err(Error::PrivateSecretNotFound(handle.to_string())),
        }
    }
}
