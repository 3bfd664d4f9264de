//! User-supplied identifier normalization

use url::Url;

use crate::{DiscoveryError, Result};

/// Normalize what the user typed into a discoverable URL identifier.
///
/// Trims whitespace, assumes `http://` when no scheme is given, and drops any
/// fragment. XRIs are recognized and rejected since only URL identifiers are
/// discoverable here.
pub fn normalize_identifier(input: &str) -> Result<Url> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DiscoveryError::InvalidIdentifier(
            "identifier is empty".into(),
        ));
    }

    if is_xri(trimmed) {
        return Err(DiscoveryError::Unsupported(format!(
            "XRI identifiers are not supported: {trimmed}"
        )));
    }

    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else if trimmed.contains("://") {
        return Err(DiscoveryError::InvalidIdentifier(format!(
            "identifier must use http or https: {trimmed}"
        )));
    } else {
        format!("http://{trimmed}")
    };

    let mut url = Url::parse(&candidate)
        .map_err(|e| DiscoveryError::InvalidIdentifier(format!("{trimmed}: {e}")))?;
    if url.host_str().is_none() {
        return Err(DiscoveryError::InvalidIdentifier(format!(
            "identifier has no host: {trimmed}"
        )));
    }
    url.set_fragment(None);
    Ok(url)
}

fn is_xri(s: &str) -> bool {
    s.starts_with("xri://")
        || s.starts_with('=')
        || s.starts_with('@')
        || s.starts_with('+')
        || s.starts_with('$')
        || s.starts_with('!')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_http_scheme_and_slash() {
        let url = normalize_identifier("alice.example").unwrap();
        assert_eq!(url.as_str(), "http://alice.example/");
    }

    #[test]
    fn https_is_preserved() {
        let url = normalize_identifier("  https://alice.example/  ").unwrap();
        assert_eq!(url.as_str(), "https://alice.example/");
    }

    #[test]
    fn fragment_is_stripped() {
        let url = normalize_identifier("https://alice.example/me#section").unwrap();
        assert_eq!(url.as_str(), "https://alice.example/me");
    }

    #[test]
    fn host_is_lowercased() {
        let url = normalize_identifier("HTTPS://Alice.Example/Path").unwrap();
        assert_eq!(url.as_str(), "https://alice.example/Path");
    }

    #[test]
    fn xri_is_rejected() {
        assert!(matches!(
            normalize_identifier("=alice"),
            Err(DiscoveryError::Unsupported(_))
        ));
        assert!(matches!(
            normalize_identifier("xri://=alice"),
            Err(DiscoveryError::Unsupported(_))
        ));
    }

    #[test]
    fn empty_and_foreign_schemes_are_invalid() {
        assert!(matches!(
            normalize_identifier("   "),
            Err(DiscoveryError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            normalize_identifier("ftp://alice.example/"),
            Err(DiscoveryError::InvalidIdentifier(_))
        ));
    }
}
