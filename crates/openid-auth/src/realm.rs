//! Realms: the URL pattern a relying party identifies itself with
//!
//! A realm may wildcard its leftmost host label (`https://*.example.com/`).
//! It contains a return_to URL when scheme and port match, the host matches
//! (exactly, or as a subdomain for wildcard realms), and the return_to path
//! lies under the realm path.

use std::fmt;

use url::Url;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Realm {
    url: Url,
    wildcard: bool,
}

impl Realm {
    pub fn parse(realm: &str) -> Result<Self> {
        let (wildcard, normalized) = match realm.split_once("://*.") {
            Some((scheme, rest)) => (true, format!("{scheme}://{rest}")),
            None => (false, realm.to_string()),
        };
        let url = Url::parse(&normalized)
            .map_err(|e| Error::ProtocolViolation(format!("invalid realm {realm:?}: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::ProtocolViolation(format!(
                "realm must be http or https: {realm}"
            )));
        }
        if url.fragment().is_some() {
            return Err(Error::ProtocolViolation(format!(
                "realm must not contain a fragment: {realm}"
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::ProtocolViolation(format!(
                "realm has no host: {realm}"
            )));
        }
        Ok(Self { url, wildcard })
    }

    /// Realm covering the scheme, host, and port of `url` at its root.
    pub fn from_origin(url: &Url) -> Result<Self> {
        let mut root = url.clone();
        root.set_path("/");
        root.set_query(None);
        root.set_fragment(None);
        Self::parse(root.as_str())
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether `return_to` falls inside this realm.
    pub fn contains(&self, return_to: &Url) -> bool {
        if self.url.scheme() != return_to.scheme() {
            return false;
        }
        if self.url.port_or_known_default() != return_to.port_or_known_default() {
            return false;
        }
        let (Some(realm_host), Some(host)) = (self.url.host_str(), return_to.host_str()) else {
            return false;
        };
        let host_ok = if self.wildcard {
            host == realm_host || host.ends_with(&format!(".{realm_host}"))
        } else {
            host == realm_host
        };
        host_ok && path_within(self.url.path(), return_to.path())
    }
}

fn path_within(realm_path: &str, path: &str) -> bool {
    if realm_path.ends_with('/') {
        return path.starts_with(realm_path);
    }
    match path.strip_prefix(realm_path) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.wildcard {
            // Url has no notion of a wildcard label; re-insert it after the scheme.
            let text = self.url.as_str();
            let scheme_end = self.url.scheme().len() + 3;
            write!(f, "{}*.{}", &text[..scheme_end], &text[scheme_end..])
        } else {
            f.write_str(self.url.as_str())
        }
    }
}
