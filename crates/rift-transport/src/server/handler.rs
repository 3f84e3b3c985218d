//! The seam between the transport core and request handling.

use crate::connection::ConnectionInfo;
use crate::fault::FaultCommand;
use crate::multipart::{self, MultipartError, Part};
use crate::proxy::ProxyRequestContext;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::CONTENT_TYPE;
use hyper::http::request::Parts;
use hyper::{HeaderMap, Method, Response, Uri};

/// A request with its body buffered and pre-processed.
#[derive(Debug)]
pub struct InboundRequest {
    pub head: Parts,
    pub body: Bytes,
    pub multipart: MultipartBody,
    pub proxy: ProxyRequestContext,
    pub connection: ConnectionInfo,
}

impl InboundRequest {
    pub fn method(&self) -> &Method {
        &self.head.method
    }

    pub fn uri(&self) -> &Uri {
        &self.head.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        self.head
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }
}

/// Result of running the multipart parser over a request body.
#[derive(Debug)]
pub enum MultipartBody {
    NotMultipart,
    Parts(Vec<Part>),
    Unparseable(MultipartError),
}

impl MultipartBody {
    /// Parse `body` if `content_type` is `multipart/*`.
    pub fn from_body(content_type: Option<&str>, body: &[u8]) -> Self {
        match content_type {
            Some(content_type) if multipart::is_multipart(content_type) => {
                match multipart::parse(body, content_type) {
                    Ok(parts) => MultipartBody::Parts(parts),
                    Err(e) => MultipartBody::Unparseable(e),
                }
            }
            _ => MultipartBody::NotMultipart,
        }
    }

    pub fn parts(&self) -> Option<&[Part]> {
        match self {
            MultipartBody::Parts(parts) => Some(parts),
            _ => None,
        }
    }
}

/// What a handler wants done with a request.
#[derive(Debug)]
pub enum HandlerOutcome {
    Respond(Response<Full<Bytes>>),
    /// Corrupt the connection instead of answering
    Fault(FaultCommand),
    /// Handle the request again under a new target
    Forward(Uri),
}

#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: &InboundRequest) -> HandlerOutcome;
}
