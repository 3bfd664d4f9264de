//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The token key is loaded from the OPENID_TOKEN_KEY env var or
//! token_key_file (both hex), never stored in the TOML directly.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use common::Secret;
use discovery::{ProtocolVersion, ServiceEndpoint, normalize_identifier};
use openid_auth::token::TOKEN_KEY_LEN;
use openid_auth::{Realm, SecuritySettings};
use serde::Deserialize;
use url::Url;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub relying_party: RelyingPartyConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Externally visible base URL; return_to is built from it
    pub public_url: Url,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
}

/// Relying party settings
#[derive(Debug, Deserialize)]
pub struct RelyingPartyConfig {
    /// Defaults to the origin of `server.public_url`
    #[serde(default)]
    pub realm: Option<String>,
    #[serde(default = "default_return_path")]
    pub return_path: String,
    #[serde(skip)]
    pub token_key: Option<Secret<Vec<u8>>>,
    /// Path to a file holding the hex token key (alternative to OPENID_TOKEN_KEY)
    #[serde(default)]
    pub token_key_file: Option<PathBuf>,
    #[serde(default)]
    pub store: StoreKind,
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    #[serde(default)]
    pub security: SecuritySettings,
}

/// Identifier resolution. With no static endpoints, identifier pages are
/// fetched and their link tags read.
#[derive(Debug, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub endpoints: Vec<StaticEndpoint>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_discovery_timeout(),
            endpoints: Vec::new(),
        }
    }
}

/// One row of the static discovery table
#[derive(Debug, Clone, Deserialize)]
pub struct StaticEndpoint {
    /// What the user types
    pub identifier: String,
    pub provider: Url,
    #[serde(default = "default_version")]
    pub version: ProtocolVersion,
    /// Defaults to the normalized identifier
    #[serde(default)]
    pub claimed_id: Option<String>,
    #[serde(default)]
    pub local_id: Option<String>,
    /// The provider picks the identity (identifier_select)
    #[serde(default)]
    pub op_identifier: bool,
    #[serde(default)]
    pub priority: Option<u32>,
}

impl StaticEndpoint {
    pub fn to_endpoint(&self) -> common::Result<ServiceEndpoint> {
        if self.op_identifier {
            return Ok(ServiceEndpoint::op_identifier(self.provider.clone())
                .with_priorities(self.priority, None));
        }
        let claimed = match &self.claimed_id {
            Some(claimed) => claimed.clone(),
            None => normalize_identifier(&self.identifier)
                .map_err(|e| common::Error::Config(format!("discovery endpoint: {e}")))?
                .to_string(),
        };
        Ok(ServiceEndpoint::claimed(
            claimed,
            self.local_id.clone(),
            self.provider.clone(),
            self.version,
        )
        .with_priorities(self.priority, None))
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_return_path() -> String {
    "/return".into()
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_discovery_timeout() -> u64 {
    10
}

fn default_version() -> ProtocolVersion {
    ProtocolVersion::V20
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Token key resolution order:
    /// 1. OPENID_TOKEN_KEY env var
    /// 2. token_key_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        let scheme = config.server.public_url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(common::Error::Config(format!(
                "public_url must be http or https, got: {}",
                config.server.public_url
            )));
        }
        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if config.relying_party.cleanup_interval_secs == 0 {
            return Err(common::Error::Config(
                "cleanup_interval_secs must be greater than 0".into(),
            ));
        }
        if config.relying_party.store == StoreKind::File
            && config.relying_party.store_path.is_none()
        {
            return Err(common::Error::Config(
                "store = \"file\" requires store_path".into(),
            ));
        }

        let realm = config.realm()?;
        let return_to = config.return_to()?;
        if !realm.contains(&return_to) {
            return Err(common::Error::Config(format!(
                "return_to {return_to} is not within realm {realm}"
            )));
        }
        for endpoint in &config.discovery.endpoints {
            endpoint.to_endpoint()?;
        }

        if let Ok(key) = std::env::var("OPENID_TOKEN_KEY") {
            config.relying_party.token_key = Some(parse_token_key(&key, "OPENID_TOKEN_KEY")?);
        } else if let Some(ref key_file) = config.relying_party.token_key_file {
            let key = std::fs::read_to_string(key_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read token_key_file {}: {e}",
                    key_file.display()
                ))
            })?;
            let key = key.trim();
            if !key.is_empty() {
                config.relying_party.token_key = Some(parse_token_key(key, "token_key_file")?);
            }
        }

        Ok(config)
    }

    /// Configured realm, or the origin of the public URL.
    pub fn realm(&self) -> common::Result<Realm> {
        let realm = match &self.relying_party.realm {
            Some(realm) => Realm::parse(realm),
            None => Realm::from_origin(&self.server.public_url),
        };
        realm.map_err(|e| common::Error::Config(e.to_string()))
    }

    pub fn return_to(&self) -> common::Result<Url> {
        self.server
            .public_url
            .join(&self.relying_party.return_path)
            .map_err(|e| common::Error::Config(format!("invalid return_path: {e}")))
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("openid-login.toml")
    }
}

fn parse_token_key(hex_key: &str, source: &str) -> common::Result<Secret<Vec<u8>>> {
    let key = hex::decode(hex_key.trim())
        .map_err(|e| common::Error::Config(format!("{source} is not valid hex: {e}")))?;
    if key.len() != TOKEN_KEY_LEN {
        return Err(common::Error::Config(format!(
            "{source} must be {TOKEN_KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Ok(Secret::new(key))
}
