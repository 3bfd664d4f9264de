//! Key-Value Form encoding
//!
//! Direct responses and signature base strings use newline-terminated
//! `key:value` lines. Keys may not contain `:` or a newline; values may not
//! contain a newline. Order is preserved on encode.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Encode pairs as key-value form, one `key:value\n` line each.
pub fn encode<'a, I>(pairs: I) -> Result<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::new();
    for (key, value) in pairs {
        if key.contains(':') || key.contains('\n') {
            return Err(Error::ProtocolViolation(format!(
                "key-value form key contains ':' or newline: {key:?}"
            )));
        }
        if value.contains('\n') {
            return Err(Error::ProtocolViolation(format!(
                "key-value form value for {key} contains a newline"
            )));
        }
        out.push_str(key);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }
    Ok(out)
}

/// Decode a key-value form body. Blank lines are skipped and a trailing
/// `\r` is tolerated; a line without `:` is a protocol violation.
pub fn decode(body: &str) -> Result<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    for (number, line) in body.lines().enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once(':').ok_or_else(|| {
            Error::ProtocolViolation(format!(
                "key-value form line {} has no ':' separator",
                number + 1
            ))
        })?;
        fields.insert(key.to_string(), value.to_string());
    }
    Ok(fields)
}
