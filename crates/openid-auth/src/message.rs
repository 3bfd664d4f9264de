//! OpenID protocol messages
//!
//! A `Message` holds protocol fields with the `openid.` prefix stripped, so
//! the same type represents indirect messages (query string or form body),
//! direct requests, and key-value form direct responses.

use std::collections::BTreeMap;

use discovery::ProtocolVersion;

use crate::constants::{FIELD_PREFIX, OPENID2_NS};
use crate::error::{Error, Result};
use crate::kvform;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    fields: BTreeMap<String, String>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh message for `version`, with `ns` set when it is 2.0.
    pub fn for_version(version: ProtocolVersion) -> Self {
        let mut message = Self::new();
        if version.is_v2() {
            message.set("ns", OPENID2_NS);
        }
        message
    }

    /// Collect the `openid.*` fields out of indirect message parameters.
    /// Other parameters (including return_to callback arguments) are ignored.
    pub fn from_indirect<'a, I>(params: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let fields = params
            .into_iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(FIELD_PREFIX)
                    .map(|k| (k.to_string(), v.to_string()))
            })
            .collect();
        Self { fields }
    }

    /// Wrap decoded key-value form fields (direct responses carry no prefix).
    pub fn from_direct(fields: BTreeMap<String, String>) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Field value, or a protocol violation naming the missing field.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            Error::ProtocolViolation(format!("missing required field openid.{key}"))
        })
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.fields.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// 2.0 when `ns` names the 2.0 namespace, otherwise 1.x.
    pub fn version(&self) -> ProtocolVersion {
        match self.get("ns") {
            Some(OPENID2_NS) => ProtocolVersion::V20,
            _ => ProtocolVersion::V11,
        }
    }

    pub fn mode(&self) -> Result<&str> {
        self.require("mode")
    }

    /// Fields in wire form (`openid.` prefixed), for query strings and form
    /// bodies.
    pub fn to_wire_pairs(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|(k, v)| (format!("{FIELD_PREFIX}{k}"), v.clone()))
            .collect()
    }

    /// Names listed in `openid.signed`, in order.
    pub fn signed_fields(&self) -> Result<Vec<&str>> {
        let signed = self.require("signed")?;
        let names: Vec<&str> = signed.split(',').filter(|s| !s.is_empty()).collect();
        if names.is_empty() {
            return Err(Error::ProtocolViolation("openid.signed is empty".into()));
        }
        Ok(names)
    }

    /// Key-value form of the named fields: the string a signature covers.
    pub fn signing_base(&self, names: &[&str]) -> Result<String> {
        let pairs = names
            .iter()
            .map(|name| Ok((*name, self.require(name)?)))
            .collect::<Result<Vec<_>>>()?;
        kvform::encode(pairs)
    }

    /// Whether `name` is covered by `openid.signed`.
    pub fn is_signed(&self, name: &str) -> bool {
        self.signed_fields()
            .map(|names| names.contains(&name))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assertion() -> Message {
        Message::from_indirect([
            ("openid.ns", OPENID2_NS),
            ("openid.mode", "id_res"),
            ("openid.claimed_id", "https://alice.example/"),
            ("openid.signed", "mode,claimed_id"),
            ("session", "abc"),
        ])
    }

    #[test]
    fn strips_prefix_and_ignores_foreign_parameters() {
        let msg = assertion();
        assert_eq!(msg.get("mode"), Some("id_res"));
        assert!(msg.get("session").is_none());
        assert_eq!(msg.fields().len(), 4);
    }

    #[test]
    fn detects_version_from_namespace() {
        assert_eq!(assertion().version(), ProtocolVersion::V20);
        let v1 = Message::from_indirect([("openid.mode", "id_res")]);
        assert_eq!(v1.version(), ProtocolVersion::V11);
    }

    #[test]
    fn require_names_missing_field() {
        let err = assertion().require("op_endpoint").unwrap_err();
        assert!(err.to_string().contains("openid.op_endpoint"));
    }

    #[test]
    fn signing_base_follows_signed_order() {
        let msg = assertion();
        let names = msg.signed_fields().unwrap();
        assert_eq!(names, vec!["mode", "claimed_id"]);
        assert_eq!(
            msg.signing_base(&names).unwrap(),
            "mode:id_res\nclaimed_id:https://alice.example/\n"
        );
        assert!(msg.is_signed("claimed_id"));
        assert!(!msg.is_signed("ns"));
    }

    #[test]
    fn signing_base_fails_when_signed_field_absent() {
        let msg = assertion();
        assert!(msg.signing_base(&["return_to"]).is_err());
    }

    #[test]
    fn wire_pairs_restore_prefix() {
        let mut msg = Message::for_version(ProtocolVersion::V20);
        msg.set("mode", "associate");
        let pairs = msg.to_wire_pairs();
        assert!(pairs.contains(&("openid.ns".to_string(), OPENID2_NS.to_string())));
        assert!(pairs.contains(&("openid.mode".to_string(), "associate".to_string())));
    }

    #[test]
    fn one_dot_x_message_has_no_namespace() {
        let msg = Message::for_version(ProtocolVersion::V11);
        assert!(!msg.contains("ns"));
    }
}
