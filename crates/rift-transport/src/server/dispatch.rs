//! Per-request pipeline.
//!
//! CONNECT goes to the tunnel. Everything else is classified, buffered,
//! multipart-parsed and handed to the [`RequestHandler`], whose outcome is
//! either written as a response or executed as a connection fault.

use super::handler::{HandlerOutcome, InboundRequest, MultipartBody, RequestHandler};
use crate::connection::{ConnectionHandle, ListenerKind};
use crate::proxy::{ProxyClassifier, ProxyTunnel};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONNECTION, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, warn};

/// Internal forwards allowed per request before giving up.
pub const MAX_FORWARDS: usize = 8;

pub(crate) struct Dispatcher {
    handler: Arc<dyn RequestHandler>,
    classifier: ProxyClassifier,
    tunnel: Option<ProxyTunnel>,
}

impl Dispatcher {
    pub(crate) fn new(
        handler: Arc<dyn RequestHandler>,
        classifier: ProxyClassifier,
        tunnel: Option<ProxyTunnel>,
    ) -> Self {
        Self {
            handler,
            classifier,
            tunnel,
        }
    }

    pub(crate) async fn dispatch(
        &self,
        req: Request<Incoming>,
        connection: &ConnectionHandle,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        if req.method() == Method::CONNECT {
            return Ok(self.dispatch_connect(req, connection).await);
        }

        let (head, body) = req.into_parts();
        let proxy = self.classifier.classify(&head, connection.info());

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                debug!("Failed to read request body: {}", e);
                return Ok(plain_response(
                    StatusCode::BAD_REQUEST,
                    "Failed to read request body\n",
                ));
            }
        };

        let content_type = head
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        let multipart = MultipartBody::from_body(content_type, &body);
        if let MultipartBody::Unparseable(e) = &multipart {
            debug!("Multipart body of {} {} not parsed: {}", head.method, head.uri, e);
        }

        let mut request = InboundRequest {
            head,
            body,
            multipart,
            proxy,
            connection: *connection.info(),
        };

        for _ in 0..=MAX_FORWARDS {
            match self.handler.handle(&request).await {
                HandlerOutcome::Respond(response) => return Ok(response),
                HandlerOutcome::Fault(command) => {
                    if let Err(e) = connection.fault_injector().inject(command).await {
                        warn!("Fault {} could not be injected: {}", command, e);
                    }
                    // The transport is gone; hyper's write of this fails
                    return Ok(Response::new(Full::new(Bytes::new())));
                }
                HandlerOutcome::Forward(uri) => {
                    debug!("Forwarding {} to {}", request.head.uri, uri);
                    request.head.uri = uri;
                    self.classifier
                        .tag(&mut request.proxy, &request.head, &request.connection);
                }
            }
        }

        warn!(
            "Request {} exceeded {} internal forwards",
            request.head.uri, MAX_FORWARDS
        );
        Ok(plain_response(
            StatusCode::LOOP_DETECTED,
            "Too many internal forwards\n",
        ))
    }

    async fn dispatch_connect(
        &self,
        req: Request<Incoming>,
        connection: &ConnectionHandle,
    ) -> Response<Full<Bytes>> {
        let tunnel = match &self.tunnel {
            Some(tunnel) if connection.info().listener == ListenerKind::Http => tunnel,
            _ => {
                debug!(
                    "CONNECT {} refused on {} listener",
                    req.uri(),
                    connection.info().listener.as_str()
                );
                let mut response =
                    plain_response(StatusCode::METHOD_NOT_ALLOWED, "CONNECT not supported\n");
                response
                    .headers_mut()
                    .insert(CONNECTION, HeaderValue::from_static("close"));
                return response;
            }
        };
        match tunnel.handle(req).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Tunnel rejected request: {}", e);
                plain_response(StatusCode::BAD_REQUEST, "Bad CONNECT request\n")
            }
        }
    }
}

pub(crate) fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
