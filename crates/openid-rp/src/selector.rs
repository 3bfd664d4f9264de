//! Endpoint filtering and ordering
//!
//! Pure first phase of request generation: drops endpoints the security
//! settings or caller rule out and sorts the rest by preference. OP
//! Identifier endpoints, when any survive, replace everything else since the
//! user named a provider rather than an identity.

use std::sync::Arc;

use discovery::ServiceEndpoint;
use openid_auth::SecuritySettings;
use tracing::debug;

/// Caller-supplied endpoint predicate.
pub type EndpointFilter = Arc<dyn Fn(&ServiceEndpoint) -> bool + Send + Sync>;

pub fn select_endpoints(
    endpoints: Vec<ServiceEndpoint>,
    settings: &SecuritySettings,
    filter: Option<&EndpointFilter>,
) -> Vec<ServiceEndpoint> {
    let discovered = endpoints.len();
    let mut selected: Vec<ServiceEndpoint> = endpoints
        .into_iter()
        .filter(|ep| settings.permits_version(ep.version))
        .filter(|ep| filter.is_none_or(|f| f(ep)))
        .filter(|ep| !settings.require_ssl || is_secure(ep))
        .filter(|ep| !settings.reject_delegating_identifiers || !ep.is_delegated())
        .filter(|ep| !settings.require_directed_identity || ep.is_op_identifier())
        .collect();

    // stable: equal-preference endpoints keep discovery order
    selected.sort_by(|a, b| a.preference_order(b));

    if selected.iter().any(ServiceEndpoint::is_op_identifier) {
        selected.retain(ServiceEndpoint::is_op_identifier);
    }

    debug!(discovered, selected = selected.len(), "selected endpoints");
    selected
}

fn is_secure(endpoint: &ServiceEndpoint) -> bool {
    endpoint.is_transport_secure()
        && (endpoint.is_op_identifier() || endpoint.claimed_identifier.starts_with("https://"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use discovery::ProtocolVersion;
    use url::Url;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn claimed(id: &str, provider: &str, version: ProtocolVersion) -> ServiceEndpoint {
        ServiceEndpoint::claimed(id, None, url(provider), version)
    }

    #[test]
    fn orders_by_service_type_before_priority() {
        let a = ServiceEndpoint::op_identifier(url("https://a.example/op"));
        let b = claimed("https://bob.example/", "https://b.example/op", ProtocolVersion::V11)
            .with_priorities(Some(1), None);
        let c = claimed("https://bob.example/", "https://c.example/op", ProtocolVersion::V20)
            .with_priorities(Some(2), None);

        // sort alone, without the OP Identifier preference
        let mut sorted = vec![b.clone(), c.clone(), a.clone()];
        sorted.sort_by(|x, y| x.preference_order(y));
        let providers: Vec<&str> = sorted
            .iter()
            .map(|ep| ep.provider_endpoint.host_str().unwrap())
            .collect();
        assert_eq!(providers, vec!["a.example", "c.example", "b.example"]);

        // full selection keeps only the OP Identifier
        let selected = select_endpoints(vec![b, c, a], &SecuritySettings::default(), None);
        assert_eq!(selected.len(), 1);
        assert!(selected[0].is_op_identifier());
    }

    #[test]
    fn missing_priority_sorts_last() {
        let none = claimed("https://x.example/", "https://none.example/", ProtocolVersion::V20);
        let ten = claimed("https://x.example/", "https://ten.example/", ProtocolVersion::V20)
            .with_priorities(Some(10), None);
        let selected = select_endpoints(vec![none, ten], &SecuritySettings::default(), None);
        assert_eq!(
            selected[0].provider_endpoint.host_str(),
            Some("ten.example")
        );
    }

    #[test]
    fn minimum_version_filters() {
        let settings = SecuritySettings {
            minimum_version: ProtocolVersion::V20,
            ..Default::default()
        };
        let selected = select_endpoints(
            vec![
                claimed("https://x.example/", "https://old.example/", ProtocolVersion::V11),
                claimed("https://x.example/", "https://new.example/", ProtocolVersion::V20),
            ],
            &settings,
            None,
        );
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].version, ProtocolVersion::V20);
    }

    #[test]
    fn caller_filter_applies() {
        let filter: EndpointFilter =
            Arc::new(|ep: &ServiceEndpoint| {
                ep.provider_endpoint.host_str() != Some("blocked.example")
            });
        let selected = select_endpoints(
            vec![
                claimed("https://x.example/", "https://blocked.example/", ProtocolVersion::V20),
                claimed("https://x.example/", "https://ok.example/", ProtocolVersion::V20),
            ],
            &SecuritySettings::default(),
            Some(&filter),
        );
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].provider_endpoint.host_str(), Some("ok.example"));
    }

    #[test]
    fn require_ssl_drops_plain_http() {
        let settings = SecuritySettings {
            require_ssl: true,
            ..Default::default()
        };
        let selected = select_endpoints(
            vec![
                claimed("https://x.example/", "http://plain.example/", ProtocolVersion::V20),
                claimed("http://x.example/", "https://tls.example/", ProtocolVersion::V20),
                claimed("https://x.example/", "https://tls.example/", ProtocolVersion::V20),
            ],
            &settings,
            None,
        );
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].claimed_identifier, "https://x.example/");
        assert_eq!(selected[0].provider_endpoint.scheme(), "https");
    }

    #[test]
    fn delegation_and_directed_identity_policies() {
        let delegated = ServiceEndpoint::claimed(
            "https://x.example/",
            Some("https://x.op.example/".into()),
            url("https://op.example/"),
            ProtocolVersion::V20,
        );
        let direct = claimed("https://x.example/", "https://op.example/", ProtocolVersion::V20);

        let no_delegation = SecuritySettings {
            reject_delegating_identifiers: true,
            ..Default::default()
        };
        let selected = select_endpoints(
            vec![delegated.clone(), direct.clone()],
            &no_delegation,
            None,
        );
        assert_eq!(selected, vec![direct.clone()]);

        let directed_only = SecuritySettings {
            require_directed_identity: true,
            ..Default::default()
        };
        assert!(select_endpoints(vec![delegated, direct], &directed_only, None).is_empty());
    }
}
