//! Service-specific error types
//!
//! Request-level failures of the login endpoints. Verification outcomes are
//! not errors here: `/return` renders every `AuthenticationResponse` itself.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("missing identifier parameter")]
    MissingIdentifier,

    #[error("no usable OpenID provider found for {0}")]
    NoEndpoint(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    OpenId(#[from] openid_auth::Error),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::MissingIdentifier | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::NoEndpoint(_) => StatusCode::NOT_FOUND,
            Error::OpenId(openid_auth::Error::Http(_))
            | Error::OpenId(openid_auth::Error::Store(_))
            | Error::OpenId(openid_auth::Error::AssociationUnavailable(_)) => {
                StatusCode::BAD_GATEWAY
            }
            Error::OpenId(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable `error.type` label in the JSON body.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MissingIdentifier => "missing_identifier",
            Error::NoEndpoint(_) => "no_endpoint",
            Error::InvalidRequest(_) => "invalid_request",
            Error::OpenId(e) => e.kind(),
        }
    }

    /// JSON body: {"error":{"type":"...","message":"...","request_id":"req_..."}}
    pub fn into_response_with_id(self, request_id: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
                "request_id": request_id,
            }
        });
        (
            self.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
