//! Verified outcomes of an inbound provider redirect

use std::collections::BTreeMap;

use discovery::ServiceEndpoint;
use openid_auth::Error;
use url::Url;

/// Result of verifying one inbound redirect. Every outcome, including
/// failure, is an ordinary value.
#[derive(Debug)]
pub enum AuthenticationResponse {
    Authenticated(Box<PositiveAssertion>),
    /// The user declined at the provider
    Canceled,
    /// An immediate request could not complete without user interaction;
    /// retry in setup mode.
    SetupRequired {
        user_supplied_identifier: Option<String>,
        /// 1.x providers name the page to send the user to
        setup_url: Option<Url>,
    },
    Failed(Error),
}

impl AuthenticationResponse {
    /// Stable label for logs and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            AuthenticationResponse::Authenticated(_) => "authenticated",
            AuthenticationResponse::Canceled => "canceled",
            AuthenticationResponse::SetupRequired { .. } => "setup_needed",
            AuthenticationResponse::Failed(e) => e.kind(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthenticationResponse::Authenticated(_))
    }

    pub fn claimed_identifier(&self) -> Option<&str> {
        match self {
            AuthenticationResponse::Authenticated(assertion) => {
                Some(assertion.claimed_identifier())
            }
            _ => None,
        }
    }
}

/// A positive assertion that passed every check.
#[derive(Debug, Clone)]
pub struct PositiveAssertion {
    pub(crate) endpoint: ServiceEndpoint,
    pub(crate) signed_fields: BTreeMap<String, String>,
    /// type URI -> arguments
    pub(crate) extensions: BTreeMap<String, BTreeMap<String, String>>,
    pub(crate) callback_arguments: BTreeMap<String, String>,
    pub(crate) return_to_signed: bool,
}

impl PositiveAssertion {
    pub fn claimed_identifier(&self) -> &str {
        &self.endpoint.claimed_identifier
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    pub fn provider_endpoint(&self) -> &Url {
        &self.endpoint.provider_endpoint
    }

    /// An `openid.*` field covered by the provider's signature (unprefixed name).
    pub fn signed_field(&self, name: &str) -> Option<&str> {
        self.signed_fields.get(name).map(String::as_str)
    }

    pub fn signed_fields(&self) -> &BTreeMap<String, String> {
        &self.signed_fields
    }

    pub fn extension(&self, type_uri: &str) -> Option<&BTreeMap<String, String>> {
        self.extensions.get(type_uri)
    }

    pub fn extensions(&self) -> &BTreeMap<String, BTreeMap<String, String>> {
        &self.extensions
    }

    /// Callback arguments, only when the return_to signature verified. Empty
    /// otherwise.
    pub fn callback_arguments(&self) -> BTreeMap<String, String> {
        if self.return_to_signed {
            self.callback_arguments.clone()
        } else {
            BTreeMap::new()
        }
    }

    pub fn callback_argument(&self, key: &str) -> Option<&str> {
        if self.return_to_signed {
            self.callback_arguments.get(key).map(String::as_str)
        } else {
            None
        }
    }

    /// Callback arguments as they arrived, tampering not ruled out.
    pub fn untrusted_callback_arguments(&self) -> &BTreeMap<String, String> {
        &self.callback_arguments
    }
}
