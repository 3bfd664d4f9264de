//! File-backed association store
//!
//! Keeps associations in a JSON file so a restart does not force every
//! provider to re-associate. Writes go to a temp file that is renamed over
//! the target; a tokio Mutex serializes them, and memory only changes once
//! the write has landed. The file holds MAC secrets and is created with 0600
//! permissions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use openid_auth::{Association, AssociationType, Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::store::{AssociationStore, StoreFuture};

/// On-disk form of an association.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredAssociation {
    handle: String,
    /// base64
    secret: String,
    #[serde(rename = "type")]
    association_type: String,
    issued: DateTime<Utc>,
    lifetime_secs: i64,
}

impl StoredAssociation {
    fn from_association(association: &Association) -> Self {
        Self {
            handle: association.handle().to_string(),
            secret: STANDARD.encode(association.secret().expose()),
            association_type: association.association_type().name().to_string(),
            issued: association.issued(),
            lifetime_secs: association.lifetime().num_seconds(),
        }
    }

    fn to_association(&self) -> Result<Association> {
        let association_type = AssociationType::parse(&self.association_type).ok_or_else(|| {
            Error::Store(format!(
                "unknown association type {:?}",
                self.association_type
            ))
        })?;
        let secret = STANDARD
            .decode(&self.secret)
            .map_err(|e| Error::Store(format!("association secret is not base64: {e}")))?;
        Association::new(
            self.handle.clone(),
            secret,
            association_type,
            self.issued,
            Duration::seconds(self.lifetime_secs),
        )
    }
}

type State = HashMap<String, Vec<StoredAssociation>>;

pub struct FileAssociationStore {
    path: PathBuf,
    state: Mutex<State>,
}

impl FileAssociationStore {
    /// Load associations from `path`, creating an empty file when it does
    /// not exist yet.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Store(format!("reading association file: {e}")))?;
            let state: State = serde_json::from_str(&contents)
                .map_err(|e| Error::Store(format!("parsing association file: {e}")))?;
            info!(
                path = %path.display(),
                endpoints = state.len(),
                "loaded associations"
            );
            state
        } else {
            info!(path = %path.display(), "association file not found, starting empty");
            let state = State::new();
            write_atomic(&path, &state).await?;
            state
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }
}

impl AssociationStore for FileAssociationStore {
    fn store<'a>(&'a self, endpoint: &'a str, association: Association) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let mut next = state.clone();
            let list = next.entry(endpoint.to_string()).or_default();
            list.retain(|a| a.handle != association.handle());
            list.push(StoredAssociation::from_association(&association));
            write_atomic(&self.path, &next).await?;
            *state = next;
            debug!(endpoint, handle = association.handle(), "stored association");
            Ok(())
        })
    }

    fn get_by_handle<'a>(
        &'a self,
        endpoint: &'a str,
        handle: &'a str,
    ) -> StoreFuture<'a, Option<Association>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state
                .get(endpoint)
                .and_then(|list| list.iter().find(|a| a.handle == handle))
                .map(StoredAssociation::to_association)
                .transpose()
        })
    }

    fn get_all<'a>(&'a self, endpoint: &'a str) -> StoreFuture<'a, Vec<Association>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let mut all = Vec::new();
            for stored in state.get(endpoint).into_iter().flatten() {
                match stored.to_association() {
                    Ok(association) => all.push(association),
                    Err(e) => warn!(endpoint, handle = %stored.handle, error = %e, "skipping unreadable association"),
                }
            }
            all.sort_by(|a, b| b.issued().cmp(&a.issued()));
            Ok(all)
        })
    }

    fn remove<'a>(&'a self, endpoint: &'a str, handle: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !state
                .get(endpoint)
                .is_some_and(|list| list.iter().any(|a| a.handle == handle))
            {
                return Ok(false);
            }
            let mut next = state.clone();
            if let Some(list) = next.get_mut(endpoint) {
                list.retain(|a| a.handle != handle);
                if list.is_empty() {
                    next.remove(endpoint);
                }
            }
            write_atomic(&self.path, &next).await?;
            *state = next;
            debug!(endpoint, handle, "removed association");
            Ok(true)
        })
    }

    fn clear_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let mut next = state.clone();
            let mut removed = 0;
            next.retain(|_, list| {
                let before = list.len();
                list.retain(|a| a.issued + Duration::seconds(a.lifetime_secs) > now);
                removed += before - list.len();
                !list.is_empty()
            });
            if removed > 0 {
                write_atomic(&self.path, &next).await?;
                *state = next;
            }
            Ok(removed)
        })
    }

    fn len(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.values().map(Vec::len).sum())
        })
    }
}

/// Temp file in the same directory, 0600, then rename over the target.
async fn write_atomic(path: &Path, data: &State) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Store(format!("serializing associations: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Store("association path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".associations.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Store(format!("writing temp association file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Store(format!("setting association file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Store(format!("renaming temp association file: {e}")))?;

    debug!(path = %path.display(), "persisted associations");
    Ok(())
}
