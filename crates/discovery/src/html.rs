//! HTML-based discovery
//!
//! Fetches the identifier URL and reads the `<link>` declarations in the page
//! head:
//!
//! - `openid2.provider` / `openid2.local_id` → a 2.0 claimed identifier endpoint
//! - `openid.server` / `openid.delegate` → a 1.1 endpoint
//!
//! Redirects are followed; the final URL becomes the claimed identifier.
//! Yadis/XRDS documents are not interpreted.

use std::future::Future;
use std::pin::Pin;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::identifier::normalize_identifier;
use crate::{Discovery, DiscoveryError, ProtocolVersion, Result, ServiceEndpoint};

/// Reading stops once this much of an identifier page has arrived.
const MAX_PAGE_BYTES: usize = 512 * 1024;

static LINK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<link\b[^>]*>").expect("static regex"));

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\b(rel|href)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
        .expect("static regex")
});

pub struct HtmlDiscovery {
    client: reqwest::Client,
    timeout: Duration,
}

impl HtmlDiscovery {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn fetch(&self, url: &Url) -> Result<(Url, String)> {
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/html, application/xhtml+xml")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DiscoveryError::Http(format!("fetching {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Http(format!(
                "identifier page {url} returned {status}"
            )));
        }

        let final_url = response.url().clone();
        let body = read_head(response, MAX_PAGE_BYTES)
            .await
            .map_err(|e| DiscoveryError::Http(format!("reading {url}: {e}")))?;
        Ok((final_url, body))
    }
}

impl Discovery for HtmlDiscovery {
    fn id(&self) -> &str {
        "html"
    }

    fn discover<'a>(
        &'a self,
        identifier: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ServiceEndpoint>>> + Send + 'a>> {
        Box::pin(async move {
            let url = normalize_identifier(identifier)?;
            let (mut claimed, body) = self.fetch(&url).await?;
            claimed.set_fragment(None);
            let endpoints = endpoints_from_html(claimed.as_str(), &body);
            debug!(
                identifier = %url,
                claimed_id = %claimed,
                endpoints = endpoints.len(),
                "html discovery"
            );
            Ok(endpoints)
        })
    }
}

/// Read at most `limit` bytes of the body; the rest is never pulled off the
/// connection. A multi-byte character cut at the limit decodes lossily.
async fn read_head(mut response: reqwest::Response, limit: usize) -> reqwest::Result<String> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = limit - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Extract endpoints from the link tags of an identifier page.
pub fn endpoints_from_html(claimed_identifier: &str, html: &str) -> Vec<ServiceEndpoint> {
    let links = link_relations(html);
    let find = |rel: &str| {
        links
            .iter()
            .find(|(rels, _)| rels.iter().any(|r| r == rel))
            .map(|(_, href)| href.clone())
    };

    let mut endpoints = Vec::new();
    if let Some(provider) = find("openid2.provider") {
        match Url::parse(&provider) {
            Ok(provider) => endpoints.push(ServiceEndpoint::claimed(
                claimed_identifier,
                find("openid2.local_id"),
                provider,
                ProtocolVersion::V20,
            )),
            Err(e) => warn!(href = %provider, error = %e, "ignoring invalid openid2.provider"),
        }
    }
    if let Some(server) = find("openid.server") {
        match Url::parse(&server) {
            Ok(server) => endpoints.push(ServiceEndpoint::claimed(
                claimed_identifier,
                find("openid.delegate"),
                server,
                ProtocolVersion::V11,
            )),
            Err(e) => warn!(href = %server, error = %e, "ignoring invalid openid.server"),
        }
    }
    endpoints
}

/// (rel tokens, href) for every link tag carrying both attributes.
fn link_relations(html: &str) -> Vec<(Vec<String>, String)> {
    LINK_TAG
        .find_iter(html)
        .filter_map(|tag| {
            let mut rel = None;
            let mut href = None;
            for cap in ATTRIBUTE.captures_iter(tag.as_str()) {
                let value = cap
                    .get(2)
                    .or_else(|| cap.get(3))
                    .or_else(|| cap.get(4))
                    .map(|m| decode_entities(m.as_str()))
                    .unwrap_or_default();
                match cap[1].to_ascii_lowercase().as_str() {
                    "rel" => rel = Some(value),
                    _ => href = Some(value),
                }
            }
            let rels = rel?
                .split_ascii_whitespace()
                .map(|r| r.to_ascii_lowercase())
                .collect();
            Some((rels, href?))
        })
        .collect()
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}
