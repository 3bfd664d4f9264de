//! Authentication requests
//!
//! `AuthenticationRequestBuilder` collects everything a request needs and
//! `build()` validates it into a frozen `AuthenticationRequest`. The relying
//! party turns a frozen request into a `Redirect` with `RelyingParty::redirect`.

use std::collections::BTreeMap;

use discovery::ServiceEndpoint;
use openid_auth::constants::mode;
use openid_auth::{Error, Realm, Result};
use url::Url;

use crate::return_to;
use crate::selector::EndpointFilter;

/// Alias the relying party uses for the UI extension when `popup` is set.
pub(crate) const UI_ALIAS: &str = "ui";

/// Field names an extension alias may not shadow.
const PROTOCOL_FIELDS: &[&str] = &[
    "ns",
    "mode",
    "claimed_id",
    "identity",
    "assoc_handle",
    "return_to",
    "realm",
    "trust_root",
    "op_endpoint",
    "response_nonce",
    "invalidate_handle",
    "signed",
    "sig",
    "error",
    "error_code",
    "user_setup_url",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthenticationMode {
    /// The provider may interact with the user
    #[default]
    Setup,
    /// The provider must answer without user interaction
    Immediate,
}

impl AuthenticationMode {
    pub fn wire_name(self) -> &'static str {
        match self {
            AuthenticationMode::Setup => mode::CHECKID_SETUP,
            AuthenticationMode::Immediate => mode::CHECKID_IMMEDIATE,
        }
    }
}

/// Whether a request may negotiate a new association on its way out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AssociationPreference {
    #[default]
    IfPossible,
    /// Use a stored association, never negotiate
    IfAlreadyEstablished,
    Never,
}

/// Extension payload: a type URI, the alias to declare it under, and its
/// arguments (unprefixed keys).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub type_uri: String,
    pub alias: String,
    pub args: BTreeMap<String, String>,
}

impl Extension {
    pub fn new(type_uri: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            type_uri: type_uri.into(),
            alias: alias.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Options applied to every request `create_requests` produces.
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub mode: AuthenticationMode,
    pub popup: bool,
    pub association_preference: AssociationPreference,
    pub extensions: Vec<Extension>,
    pub callback_arguments: BTreeMap<String, String>,
    pub filter: Option<EndpointFilter>,
}

/// A validated request for one endpoint. Immutable.
#[derive(Debug, Clone)]
pub struct AuthenticationRequest {
    endpoint: ServiceEndpoint,
    realm: Realm,
    return_to: Url,
    mode: AuthenticationMode,
    popup: bool,
    association_preference: AssociationPreference,
    extensions: Vec<Extension>,
    callback_arguments: BTreeMap<String, String>,
}

impl AuthenticationRequest {
    pub fn builder(
        endpoint: ServiceEndpoint,
        realm: Realm,
        return_to: Url,
    ) -> AuthenticationRequestBuilder {
        AuthenticationRequestBuilder {
            endpoint,
            realm,
            return_to,
            mode: AuthenticationMode::default(),
            popup: false,
            association_preference: AssociationPreference::default(),
            extensions: Vec::new(),
            callback_arguments: BTreeMap::new(),
        }
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    pub fn return_to(&self) -> &Url {
        &self.return_to
    }

    pub fn mode(&self) -> AuthenticationMode {
        self.mode
    }

    pub fn popup(&self) -> bool {
        self.popup
    }

    pub fn association_preference(&self) -> AssociationPreference {
        self.association_preference
    }

    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    pub fn callback_arguments(&self) -> &BTreeMap<String, String> {
        &self.callback_arguments
    }
}

pub struct AuthenticationRequestBuilder {
    endpoint: ServiceEndpoint,
    realm: Realm,
    return_to: Url,
    mode: AuthenticationMode,
    popup: bool,
    association_preference: AssociationPreference,
    extensions: Vec<Extension>,
    callback_arguments: BTreeMap<String, String>,
}

impl AuthenticationRequestBuilder {
    pub fn mode(mut self, mode: AuthenticationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn popup(mut self, popup: bool) -> Self {
        self.popup = popup;
        self
    }

    pub fn association_preference(mut self, preference: AssociationPreference) -> Self {
        self.association_preference = preference;
        self
    }

    pub fn extension(mut self, extension: Extension) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn callback_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.callback_arguments.insert(key.into(), value.into());
        self
    }

    /// Apply the shared per-request options from `create_requests`.
    pub fn options(mut self, options: &RequestOptions) -> Self {
        self.mode = options.mode;
        self.popup = options.popup;
        self.association_preference = options.association_preference;
        self.extensions.extend(options.extensions.iter().cloned());
        self.callback_arguments.extend(
            options
                .callback_arguments
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        self
    }

    pub fn build(self) -> Result<AuthenticationRequest> {
        if !self.realm.contains(&self.return_to) {
            return Err(Error::ProtocolViolation(format!(
                "return_to {} is not within realm {}",
                self.return_to, self.realm
            )));
        }
        if self.return_to.fragment().is_some() {
            return Err(Error::ProtocolViolation(
                "return_to must not contain a fragment".into(),
            ));
        }
        if let Some((key, _)) = self
            .return_to
            .query_pairs()
            .find(|(k, _)| return_to::is_reserved(k))
        {
            return Err(Error::ProtocolViolation(format!(
                "return_to already carries reserved parameter {key}"
            )));
        }
        if let Some(key) = self
            .callback_arguments
            .keys()
            .find(|k| return_to::is_reserved(k))
        {
            return Err(Error::ProtocolViolation(format!(
                "callback argument name {key} is reserved"
            )));
        }
        let mut aliases = Vec::new();
        for extension in &self.extensions {
            validate_alias(&extension.alias, self.popup)?;
            if aliases.contains(&extension.alias.as_str()) {
                return Err(Error::ProtocolViolation(format!(
                    "extension alias {} declared twice",
                    extension.alias
                )));
            }
            aliases.push(extension.alias.as_str());
        }

        Ok(AuthenticationRequest {
            endpoint: self.endpoint,
            realm: self.realm,
            return_to: self.return_to,
            mode: self.mode,
            popup: self.popup,
            association_preference: self.association_preference,
            extensions: self.extensions,
            callback_arguments: self.callback_arguments,
        })
    }
}

fn validate_alias(alias: &str, popup: bool) -> Result<()> {
    if alias.is_empty() || alias.contains('.') || alias.contains(',') {
        return Err(Error::ProtocolViolation(format!(
            "invalid extension alias {alias:?}"
        )));
    }
    if PROTOCOL_FIELDS.contains(&alias) || (popup && alias == UI_ALIAS) {
        return Err(Error::ProtocolViolation(format!(
            "extension alias {alias:?} is reserved"
        )));
    }
    Ok(())
}

/// Where to send the user agent, plus the flags the UI layer needs to pick
/// between a full-page redirect and a popup.
#[derive(Debug, Clone)]
pub struct Redirect {
    pub url: Url,
    pub mode: AuthenticationMode,
    pub popup: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use discovery::ProtocolVersion;

    fn endpoint() -> ServiceEndpoint {
        ServiceEndpoint::claimed(
            "https://alice.example/",
            None,
            Url::parse("https://op.example/auth").unwrap(),
            ProtocolVersion::V20,
        )
    }

    fn builder(return_to: &str) -> AuthenticationRequestBuilder {
        AuthenticationRequest::builder(
            endpoint(),
            Realm::parse("https://rp.example/").unwrap(),
            Url::parse(return_to).unwrap(),
        )
    }

    #[test]
    fn defaults_to_setup_and_association_if_possible() {
        let request = builder("https://rp.example/return").build().unwrap();
        assert_eq!(request.mode(), AuthenticationMode::Setup);
        assert_eq!(
            request.association_preference(),
            AssociationPreference::IfPossible
        );
        assert!(!request.popup());
        assert_eq!(request.mode().wire_name(), "checkid_setup");
    }

    #[test]
    fn return_to_outside_realm_is_rejected() {
        let err = builder("https://evil.example/return").build().unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[test]
    fn reserved_callback_names_are_rejected() {
        assert!(
            builder("https://rp.example/return")
                .callback_argument("rp.nonce", "x")
                .build()
                .is_err()
        );
        assert!(
            builder("https://rp.example/return?openid.mode=x")
                .build()
                .is_err()
        );
    }

    #[test]
    fn extension_aliases_are_validated() {
        let ok = builder("https://rp.example/return")
            .extension(Extension::new("http://openid.net/srv/ax/1.0", "ax"))
            .build();
        assert!(ok.is_ok());

        for bad in ["", "a.b", "mode", "ns"] {
            let result = builder("https://rp.example/return")
                .extension(Extension::new("urn:x", bad))
                .build();
            assert!(result.is_err(), "alias {bad:?} must be rejected");
        }

        let dup = builder("https://rp.example/return")
            .extension(Extension::new("urn:a", "x"))
            .extension(Extension::new("urn:b", "x"))
            .build();
        assert!(dup.is_err());
    }

    #[test]
    fn ui_alias_is_reserved_only_with_popup() {
        let ext = Extension::new("urn:x", "ui");
        assert!(
            builder("https://rp.example/return")
                .extension(ext.clone())
                .build()
                .is_ok()
        );
        assert!(
            builder("https://rp.example/return")
                .popup(true)
                .extension(ext)
                .build()
                .is_err()
        );
    }

    #[test]
    fn options_apply_to_builder() {
        let mut options = RequestOptions {
            mode: AuthenticationMode::Immediate,
            popup: true,
            association_preference: AssociationPreference::Never,
            ..Default::default()
        };
        options
            .callback_arguments
            .insert("session".into(), "42".into());
        let request = builder("https://rp.example/return")
            .options(&options)
            .build()
            .unwrap();
        assert_eq!(request.mode(), AuthenticationMode::Immediate);
        assert!(request.popup());
        assert_eq!(
            request.association_preference(),
            AssociationPreference::Never
        );
        assert_eq!(
            request.callback_arguments().get("session").map(String::as_str),
            Some("42")
        );
    }
}
