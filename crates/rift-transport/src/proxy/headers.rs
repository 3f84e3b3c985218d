//! Response headers exposing proxy classification.
//!
//! Header names and values are compile-time constants so insertion never
//! parses at runtime.

use super::context::ProxyRequestContext;
use hyper::header::{HeaderName, HeaderValue};
use hyper::Response;

pub static X_RIFT_HTTPS_PROXY: HeaderName = HeaderName::from_static("x-rift-https-proxy");
pub static X_RIFT_EARLIEST_SCHEME: HeaderName = HeaderName::from_static("x-rift-earliest-scheme");

pub static VALUE_TRUE: HeaderValue = HeaderValue::from_static("true");
pub static VALUE_FALSE: HeaderValue = HeaderValue::from_static("false");

/// Extension trait for inserting Rift headers into responses.
pub trait RiftHeadersExt {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue);

    /// Insert a header with a dynamic value.
    /// Returns false if the value is not a valid header value.
    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool;

    /// Add the classification headers for `ctx`.
    fn set_proxy_headers(&mut self, ctx: &ProxyRequestContext) {
        let proxied = if ctx.is_https_proxy_request() {
            &VALUE_TRUE
        } else {
            &VALUE_FALSE
        };
        self.set_header(&X_RIFT_HTTPS_PROXY, proxied);
        if let Some(scheme) = ctx.earliest_scheme() {
            self.set_header_value(&X_RIFT_EARLIEST_SCHEME, scheme);
        }
    }
}

impl<B> RiftHeadersExt for Response<B> {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.headers_mut().insert(name.clone(), value.clone());
    }

    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool {
        match HeaderValue::from_str(value) {
            Ok(header_value) => {
                self.headers_mut().insert(name.clone(), header_value);
                true
            }
            Err(_) => false,
        }
    }
}
