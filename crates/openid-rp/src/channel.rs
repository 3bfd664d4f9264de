//! Direct communication with providers
//!
//! Direct requests are form-encoded POSTs; responses are key-value form. A
//! provider reports direct errors as HTTP 400 with a key-value body, which
//! is still a readable protocol response (it carries `error` and possibly
//! `error_code`), so those bodies are decoded rather than rejected.
//!
//! Response bodies are read chunk by chunk and refused once they pass
//! [`MAX_RESPONSE_BYTES`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use openid_auth::{Error, Message, Result, kvform};
use tracing::debug;
use url::Url;

/// Upper bound on a key-value response body.
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024;

pub type ChannelFuture<'a> = Pin<Box<dyn Future<Output = Result<Message>> + Send + 'a>>;

/// Sends a direct request to a provider endpoint and returns its response.
pub trait DirectChannel: Send + Sync {
    fn post<'a>(&'a self, endpoint: &'a Url, request: &'a Message) -> ChannelFuture<'a>;
}

pub struct HttpChannel {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpChannel {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl DirectChannel for HttpChannel {
    fn post<'a>(&'a self, endpoint: &'a Url, request: &'a Message) -> ChannelFuture<'a> {
        Box::pin(async move {
            let response = self
                .client
                .post(endpoint.clone())
                .timeout(self.timeout)
                .form(&request.to_wire_pairs())
                .send()
                .await
                .map_err(|e| Error::Http(format!("direct request to {endpoint} failed: {e}")))?;

            let status = response.status();
            let body = read_limited(response, MAX_RESPONSE_BYTES, endpoint).await?;
            debug!(endpoint = %endpoint, status = status.as_u16(), "direct response");

            if !status.is_success() && status.as_u16() != 400 {
                return Err(Error::Http(format!(
                    "provider {endpoint} returned {status}"
                )));
            }

            let fields = kvform::decode(&body)?;
            let message = Message::from_direct(fields);
            if status.as_u16() == 400 && !message.contains("error") {
                return Err(Error::Http(format!(
                    "provider {endpoint} returned 400 without an error message"
                )));
            }
            Ok(message)
        })
    }
}

async fn read_limited(
    mut response: reqwest::Response,
    limit: usize,
    endpoint: &Url,
) -> Result<String> {
    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Err(Error::Http(format!(
            "response from {endpoint} exceeds {limit} bytes"
        )));
    }
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| Error::Http(format!("reading response from {endpoint}: {e}")))?
    {
        if body.len() + chunk.len() > limit {
            return Err(Error::Http(format!(
                "response from {endpoint} exceeds {limit} bytes"
            )));
        }
        body.extend_from_slice(&chunk);
    }
    String::from_utf8(body)
        .map_err(|_| Error::Http(format!("response from {endpoint} is not UTF-8")))
}
