//! Header rewriting between the client and the upstream process.

use http::{
    HeaderMap, HeaderName, HeaderValue,
    header::{self, AUTHORIZATION, CONNECTION, HOST},
};

use crate::auth::claims::TokenClaims;

/// Subject of the validated token, set by the gateway only.
pub(crate) const SUBJECT_HEADER: HeaderName = HeaderName::from_static("x-gatehouse-subject");

/// Space separated scopes of the validated token, set by the gateway only.
pub(crate) const SCOPES_HEADER: HeaderName = HeaderName::from_static("x-gatehouse-scopes");

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Connection-scoped headers (RFC 9110 §7.6.1) that never cross the proxy.
const HOP_BY_HOP: [HeaderName; 8] = [
    CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Removes hop-by-hop headers, including every header the `Connection` header names.
pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();

    for name in HOP_BY_HOP.iter().chain(named.iter()) {
        headers.remove(name);
    }

    // Not hop-by-hop, but some clients send it and it describes the old connection.
    headers.remove("proxy-connection");
}

/// Options for the request headers sent upstream.
pub(crate) struct Forwarding<'a> {
    pub forward_authorization: bool,
    pub tls: bool,
    pub claims: Option<&'a TokenClaims>,
}

/// Turns the client's request headers into the headers sent to the upstream process.
pub(crate) fn upstream_request_headers(mut headers: HeaderMap, options: Forwarding<'_>) -> HeaderMap {
    let host = headers.get(HOST).cloned();

    strip_hop_by_hop(&mut headers);
    headers.remove(HOST);
    headers.remove(SUBJECT_HEADER);
    headers.remove(SCOPES_HEADER);

    if !options.forward_authorization {
        headers.remove(AUTHORIZATION);
    }

    if let Some(claims) = options.claims {
        if let Some(value) = claims.subject.as_deref().and_then(header_value) {
            headers.insert(SUBJECT_HEADER, value);
        }

        if let Some(value) = header_value(&claims.scopes.join(" ")) {
            headers.insert(SCOPES_HEADER, value);
        }
    }

    if let Some(host) = host {
        headers.insert(X_FORWARDED_HOST, host);
    }

    let proto = if options.tls { "https" } else { "http" };
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));

    headers
}

fn header_value(value: &str) -> Option<HeaderValue> {
    if value.is_empty() {
        return None;
    }

    HeaderValue::from_str(value).ok()
}
