//! Handler used by the binary when no stub engine is attached.
//!
//! Paths matching a configured fault route get their fault. Multipart
//! uploads are echoed back as a JSON summary of the parsed parts. Anything
//! else is answered with the not-found response.

use super::handler::{HandlerOutcome, InboundRequest, MultipartBody, RequestHandler};
use crate::config::FaultRoute;
use crate::multipart::Part;
use crate::proxy::headers::RiftHeadersExt;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

pub struct FaultRouteHandler {
    routes: Vec<FaultRoute>,
}

impl FaultRouteHandler {
    pub fn new(routes: Vec<FaultRoute>) -> Self {
        Self { routes }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PartSummary<'a> {
    name: Option<&'a str>,
    filename: Option<&'a str>,
    content_type: Option<&'a str>,
    size: usize,
    headers: Vec<[&'a str; 2]>,
    content: String,
}

impl<'a> From<&'a Part> for PartSummary<'a> {
    fn from(part: &'a Part) -> Self {
        Self {
            name: part.name(),
            filename: part.submitted_file_name(),
            content_type: part.content_type(),
            size: part.size(),
            headers: part
                .all_headers()
                .iter()
                .map(|(name, value)| [name, value])
                .collect(),
            content: String::from_utf8_lossy(part.content()).into_owned(),
        }
    }
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[async_trait]
impl RequestHandler for FaultRouteHandler {
    async fn handle(&self, request: &InboundRequest) -> HandlerOutcome {
        let path = request.uri().path();
        if let Some(route) = self.routes.iter().find(|route| route.matches(path)) {
            return HandlerOutcome::Fault(route.fault);
        }

        let mut response = match &request.multipart {
            MultipartBody::Parts(parts) => {
                let summaries: Vec<PartSummary> = parts.iter().map(PartSummary::from).collect();
                json_response(StatusCode::OK, &json!({ "parts": summaries }))
            }
            MultipartBody::Unparseable(e) => json_response(
                StatusCode::BAD_REQUEST,
                &json!({ "error": e.to_string() }),
            ),
            MultipartBody::NotMultipart => {
                debug!("No stub matched {} {}", request.method(), path);
                json_response(
                    StatusCode::NOT_FOUND,
                    &json!({
                        "error": "No stub matched the request",
                        "method": request.method().as_str(),
                        "path": path,
                    }),
                )
            }
        };
        response.set_proxy_headers(&request.proxy);
        HandlerOutcome::Respond(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionInfo, ListenerKind};
    use crate::fault::FaultCommand;
    use crate::proxy::ProxyRequestContext;
    use http_body_util::BodyExt;
    use hyper::{HeaderMap, Request};

    fn inbound(uri: &str, content_type: Option<&str>, body: &'static [u8]) -> InboundRequest {
        let mut builder = Request::post(uri);
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        let head = builder.body(()).unwrap().into_parts().0;
        let proxy = ProxyRequestContext::new();
        proxy.record_earliest_scheme("http");
        InboundRequest {
            multipart: MultipartBody::from_body(content_type, body),
            head,
            body: Bytes::from_static(body),
            proxy,
            connection: ConnectionInfo {
                local_addr: "127.0.0.1:8080".parse().unwrap(),
                remote_addr: "127.0.0.1:50000".parse().unwrap(),
                listener: ListenerKind::Http,
            },
        }
    }

    async fn respond(
        handler: &FaultRouteHandler,
        request: &InboundRequest,
    ) -> (StatusCode, serde_json::Value, HeaderMap) {
        match handler.handle(request).await {
            HandlerOutcome::Respond(response) => {
                let (parts, body) = response.into_parts();
                let bytes = body.collect().await.unwrap().to_bytes();
                let json = serde_json::from_slice(&bytes).unwrap();
                (parts.status, json, parts.headers)
            }
            other => panic!("expected a response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fault_route_selects_fault() {
        let handler = FaultRouteHandler::new(vec![FaultRoute::new(
            "/faults/reset",
            FaultCommand::ConnectionResetByPeer,
        )]);
        let outcome = handler.handle(&inbound("/faults/reset/now", None, b"")).await;
        assert!(matches!(
            outcome,
            HandlerOutcome::Fault(FaultCommand::ConnectionResetByPeer)
        ));
    }

    #[tokio::test]
    async fn test_unmatched_request_is_not_found() {
        let handler = FaultRouteHandler::new(Vec::new());
        let (status, json, headers) = respond(&handler, &inbound("/missing", None, b"")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["path"], "/missing");
        assert_eq!(json["method"], "POST");
        assert_eq!(headers["x-rift-https-proxy"], "false");
        assert_eq!(headers["x-rift-earliest-scheme"], "http");
    }

    #[tokio::test]
    async fn test_multipart_upload_is_summarised() {
        let handler = FaultRouteHandler::new(Vec::new());
        let request = inbound(
            "/upload",
            Some("multipart/form-data; boundary=zz"),
            b"--zz\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nhello\r\n--zz--\r\n",
        );
        let (status, json, _) = respond(&handler, &request).await;
        assert_eq!(status, StatusCode::OK);
        let part = &json["parts"][0];
        assert_eq!(part["name"], "file");
        assert_eq!(part["filename"], "a.txt");
        assert_eq!(part["contentType"], "text/plain");
        assert_eq!(part["size"], 5);
        assert_eq!(part["content"], "hello");
    }

    #[tokio::test]
    async fn test_unparseable_multipart_is_bad_request() {
        let handler = FaultRouteHandler::new(Vec::new());
        let request = inbound("/upload", Some("multipart/form-data"), b"--zz--");
        let (status, json, _) = respond(&handler, &request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("boundary"));
    }
}
