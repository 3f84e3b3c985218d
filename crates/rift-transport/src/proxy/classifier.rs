//! Per-request proxy classification.

use super::context::ProxyRequestContext;
use crate::connection::ConnectionInfo;
use hyper::header::HOST;
use hyper::http::request::Parts;
use hyper::http::uri::Authority;
use hyper::{HeaderMap, Uri};
use tracing::trace;

/// Tags requests with how they arrived.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyClassifier {
    mitm_port: Option<u16>,
}

impl ProxyClassifier {
    /// `mitm_port` is the bound port of the MITM listener, if browser
    /// proxying is enabled.
    pub fn new(mitm_port: Option<u16>) -> Self {
        Self { mitm_port }
    }

    pub fn mitm_port(&self) -> Option<u16> {
        self.mitm_port
    }

    /// Fresh context for a request that just arrived.
    pub fn classify(&self, head: &Parts, connection: &ConnectionInfo) -> ProxyRequestContext {
        let mut ctx = ProxyRequestContext::new();
        self.tag(&mut ctx, head, connection);
        ctx
    }

    /// Update an existing context. Safe to call again after the request has
    /// been re-targeted.
    pub fn tag(&self, ctx: &mut ProxyRequestContext, head: &Parts, connection: &ConnectionInfo) {
        let scheme = head
            .uri
            .scheme_str()
            .unwrap_or_else(|| connection.scheme());
        ctx.record_earliest_scheme(scheme);

        let local_port = connection.local_port();
        let via_mitm = self.mitm_port == Some(local_port);
        let port_mismatch =
            target_port(&head.uri, &head.headers).is_some_and(|port| port != local_port);

        if via_mitm || port_mismatch {
            trace!(
                "HTTPS proxy request {} (mitm listener: {}, port mismatch: {})",
                head.uri,
                via_mitm,
                port_mismatch
            );
            ctx.mark_https_proxy_request();
        }
    }
}

/// Port the request is addressed to, if it can be told.
///
/// Absolute-form targets use their explicit port or the scheme default;
/// origin-form targets use the `Host` header.
pub fn target_port(uri: &Uri, headers: &HeaderMap) -> Option<u16> {
    if uri.authority().is_some() {
        return uri.port_u16().or_else(|| match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("https") => Some(443),
            Some(s) if s.eq_ignore_ascii_case("http") => Some(80),
            _ => None,
        });
    }
    headers
        .get(HOST)
        .and_then(|host| host.to_str().ok())
        .and_then(|host| host.parse::<Authority>().ok())
        .and_then(|authority| authority.port_u16())
}
