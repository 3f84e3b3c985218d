use once_cell::sync::OnceCell;

/// How a request reached the server, as recorded by the classifier.
///
/// Handlers only read it. The HTTPS-proxy flag never goes back to false and
/// the earliest scheme keeps the first value written, so re-running the
/// classifier after an internal forward cannot lose the first hop.
#[derive(Debug, Clone, Default)]
pub struct ProxyRequestContext {
    https_proxy_request: bool,
    earliest_scheme: OnceCell<String>,
}

impl ProxyRequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the request came through the MITM listener or targeted a
    /// port other than the one it was received on.
    pub fn is_https_proxy_request(&self) -> bool {
        self.https_proxy_request
    }

    /// Scheme observed on the first hop.
    pub fn earliest_scheme(&self) -> Option<&str> {
        self.earliest_scheme.get().map(String::as_str)
    }

    pub(crate) fn mark_https_proxy_request(&mut self) {
        self.https_proxy_request = true;
    }

    /// Returns false if a scheme was already recorded.
    pub(crate) fn record_earliest_scheme(&self, scheme: &str) -> bool {
        self.earliest_scheme.set(scheme.to_string()).is_ok()
    }
}
