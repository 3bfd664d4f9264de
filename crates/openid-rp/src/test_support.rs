//! In-process provider and discovery doubles for unit tests

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use openid_auth::constants::{UNSUPPORTED_TYPE, mode};
use openid_auth::{AssociationType, DiffieHellman, Error, Message, SessionType};
use url::Url;

use crate::channel::{ChannelFuture, DirectChannel};

#[derive(Debug, Clone, Copy)]
pub enum AssociateBehavior {
    Accept,
    /// Decline the first request with a suggestion, accept afterwards
    SuggestOnce {
        assoc_type: &'static str,
        session_type: &'static str,
    },
    /// Decline every request with the same suggestion
    AlwaysSuggest {
        assoc_type: &'static str,
        session_type: &'static str,
    },
    /// Every direct request fails at the transport level
    Unreachable,
}

struct ProviderState {
    behavior: AssociateBehavior,
    secrets: HashMap<String, (AssociationType, Vec<u8>)>,
    last_session_type: Option<String>,
    is_valid: bool,
    invalidate_handle: Option<String>,
    check_auth_requests: Vec<Message>,
}

/// A provider that answers direct requests without a network.
pub struct MockProvider {
    state: Mutex<ProviderState>,
    associate_calls: AtomicUsize,
    check_auth_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProviderState {
                behavior: AssociateBehavior::Accept,
                secrets: HashMap::new(),
                last_session_type: None,
                is_valid: true,
                invalidate_handle: None,
                check_auth_requests: Vec::new(),
            }),
            associate_calls: AtomicUsize::new(0),
            check_auth_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: AssociateBehavior) {
        self.state.lock().unwrap().behavior = behavior;
    }

    pub fn set_check_auth_result(&self, is_valid: bool, invalidate_handle: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        state.is_valid = is_valid;
        state.invalidate_handle = invalidate_handle.map(str::to_string);
    }

    pub fn associate_calls(&self) -> usize {
        self.associate_calls.load(Ordering::SeqCst)
    }

    pub fn check_auth_calls(&self) -> usize {
        self.check_auth_calls.load(Ordering::SeqCst)
    }

    pub fn last_session_type(&self) -> Option<String> {
        self.state.lock().unwrap().last_session_type.clone()
    }

    pub fn last_check_auth_request(&self) -> Option<Message> {
        self.state.lock().unwrap().check_auth_requests.last().cloned()
    }

    pub fn secret_for(&self, handle: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(handle)
            .map(|(_, secret)| secret.clone())
    }

    /// Sign `message` over `signed` with the association `handle`, the way
    /// the provider would before redirecting back.
    pub fn sign(&self, message: &mut Message, handle: &str, signed: &[&str]) {
        let (kind, secret) = self
            .state
            .lock()
            .unwrap()
            .secrets
            .get(handle)
            .cloned()
            .unwrap_or((AssociationType::HmacSha256, vec![0x77; 32]));
        message.set("assoc_handle", handle);
        message.set("signed", signed.join(","));
        let base = message.signing_base(signed).unwrap();
        message.set("sig", STANDARD.encode(kind.sign(&secret, base.as_bytes())));
    }

    fn associate(&self, request: &Message) -> Message {
        let call = self.associate_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.lock().unwrap();
        state.last_session_type = request.get("session_type").map(str::to_string);

        let decline = match state.behavior {
            AssociateBehavior::SuggestOnce {
                assoc_type,
                session_type,
            } if call == 1 => Some((assoc_type, session_type)),
            AssociateBehavior::AlwaysSuggest {
                assoc_type,
                session_type,
            } => Some((assoc_type, session_type)),
            _ => None,
        };
        if let Some((assoc_type, session_type)) = decline {
            let mut response = Message::new();
            response.set("error", "unsupported association type");
            response.set("error_code", UNSUPPORTED_TYPE);
            response.set("assoc_type", assoc_type);
            response.set("session_type", session_type);
            return response;
        }

        let kind = AssociationType::parse(request.get("assoc_type").unwrap_or("")).unwrap();
        let session = SessionType::parse(request.get("session_type").unwrap_or("")).unwrap();
        let handle = format!("H{}", state.secrets.len() + 1);
        let secret: Vec<u8> = (0..kind.secret_len() as u8).map(|b| b ^ 0x5c).collect();
        state.secrets.insert(handle.clone(), (kind, secret.clone()));

        let mut response = Message::new();
        if let Some(ns) = request.get("ns") {
            response.set("ns", ns);
        }
        response.set("assoc_handle", handle);
        response.set("assoc_type", kind.name());
        response.set("expires_in", "3600");
        if let Some(name) = request.get("session_type") {
            response.set("session_type", name);
        }
        if session.is_diffie_hellman() {
            let dh = DiffieHellman::generate();
            let consumer = request.get("dh_consumer_public").unwrap();
            let encrypted = dh.xor_secret(session, consumer, &secret).unwrap();
            response.set("dh_server_public", dh.public_key_base64());
            response.set("enc_mac_key", STANDARD.encode(encrypted));
        } else {
            response.set("mac_key", STANDARD.encode(&secret));
        }
        response
    }

    fn check_authentication(&self, request: &Message) -> Message {
        self.check_auth_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.check_auth_requests.push(request.clone());
        let mut response = Message::new();
        response.set("is_valid", if state.is_valid { "true" } else { "false" });
        if let Some(handle) = &state.invalidate_handle {
            response.set("invalidate_handle", handle.clone());
        }
        response
    }
}

impl DirectChannel for MockProvider {
    fn post<'a>(&'a self, endpoint: &'a Url, request: &'a Message) -> ChannelFuture<'a> {
        Box::pin(async move {
            if matches!(
                self.state.lock().unwrap().behavior,
                AssociateBehavior::Unreachable
            ) {
                return Err(Error::Http(format!("connection to {endpoint} refused")));
            }
            match request.get("mode") {
                Some(mode::ASSOCIATE) => Ok(self.associate(request)),
                Some(mode::CHECK_AUTHENTICATION) => Ok(self.check_authentication(request)),
                other => Err(Error::ProtocolViolation(format!(
                    "mock provider cannot handle mode {other:?}"
                ))),
            }
        })
    }
}
