//! Login endpoints
//!
//! `/login` discovers the user's provider and redirects the user agent to it;
//! `/return` receives the provider's answer and reports the verified outcome
//! as JSON.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::http::{Method, StatusCode, Uri};
use openid_auth::Realm;
use openid_rp::{
    AssociationPreference, AuthenticationMode, AuthenticationResponse, IncomingRequest, Redirect,
    RelyingParty, RequestOptions,
};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::service::ServiceMetrics;

/// Shared state passed to the login handlers via axum State extractor
#[derive(Clone)]
pub struct LoginState {
    pub rp: Arc<RelyingParty>,
    pub realm: Realm,
    pub return_to: Url,
    pub metrics: ServiceMetrics,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginParams {
    pub identifier: Option<String>,
    /// Ask the provider to answer without user interaction
    #[serde(default)]
    pub immediate: bool,
    /// Skip association; the assertion is checked with the provider instead
    #[serde(default)]
    pub stateless: bool,
}

/// Resolve the identifier and build the redirect for its most preferred endpoint.
#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn begin_login(
    state: &LoginState,
    params: LoginParams,
    request_id: &str,
) -> Result<Redirect> {
    state.metrics.logins_started.fetch_add(1, Ordering::Relaxed);

    let identifier = params
        .identifier
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(Error::MissingIdentifier)?;

    let options = RequestOptions {
        mode: if params.immediate {
            AuthenticationMode::Immediate
        } else {
            AuthenticationMode::Setup
        },
        association_preference: if params.stateless {
            AssociationPreference::Never
        } else {
            AssociationPreference::IfPossible
        },
        ..Default::default()
    };

    let requests = state
        .rp
        .create_requests(identifier, &state.realm, &state.return_to, &options)
        .await?;
    let Some(request) = requests.first() else {
        warn!(identifier, "no usable endpoint");
        return Err(Error::NoEndpoint(identifier.to_string()));
    };

    let redirect = state.rp.redirect(request).await?;
    info!(
        identifier,
        provider = %request.endpoint().provider_endpoint,
        alternatives = requests.len() - 1,
        "redirecting to provider"
    );
    Ok(redirect)
}

/// Rebuild the inbound request as the provider addressed it: the public
/// origin plus the path and query the service received. POST parameters come
/// from the form body.
pub fn incoming_request(
    return_to: &Url,
    method: &Method,
    uri: &Uri,
    body: &str,
) -> Result<IncomingRequest> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = return_to
        .join(path_and_query)
        .map_err(|e| Error::InvalidRequest(format!("unusable request URI: {e}")))?;

    if method == Method::POST {
        let params = url::form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .collect();
        Ok(IncomingRequest::new(url, params))
    } else {
        Ok(IncomingRequest::from_url(url))
    }
}

/// Verify the provider's answer and render it.
#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn complete_login(
    state: &LoginState,
    request: &IncomingRequest,
    request_id: &str,
) -> (StatusCode, serde_json::Value) {
    let response = state.rp.verify(request).await;
    match response {
        AuthenticationResponse::Authenticated(assertion) => {
            state.metrics.logins_completed.fetch_add(1, Ordering::Relaxed);
            (
                StatusCode::OK,
                serde_json::json!({
                    "status": "authenticated",
                    "claimed_id": assertion.claimed_identifier(),
                    "provider": assertion.provider_endpoint().as_str(),
                    "version": assertion.endpoint().version.to_string(),
                    "callback_arguments": assertion.callback_arguments(),
                    "extensions": assertion.extensions(),
                }),
            )
        }
        AuthenticationResponse::Canceled => (
            StatusCode::OK,
            serde_json::json!({ "status": "canceled" }),
        ),
        AuthenticationResponse::SetupRequired {
            user_supplied_identifier,
            setup_url,
        } => (
            StatusCode::OK,
            serde_json::json!({
                "status": "setup_needed",
                "user_supplied_identifier": user_supplied_identifier,
                "setup_url": setup_url.map(|u| u.to_string()),
            }),
        ),
        AuthenticationResponse::Failed(e) => {
            state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            (
                StatusCode::FORBIDDEN,
                serde_json::json!({
                    "status": "failed",
                    "error": {
                        "type": e.kind(),
                        "message": e.to_string(),
                        "request_id": request_id,
                    }
                }),
            )
        }
    }
}
