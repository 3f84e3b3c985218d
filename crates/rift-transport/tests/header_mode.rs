//! Header mode is process-wide, so these tests live in their own binary and
//! all fix the mode to `Compatible` before doing anything else.

mod common;

use common::{get, local_config, send_raw, start};
use rift_transport::config::FaultRoute;
use rift_transport::fault::FaultCommand;
use rift_transport::server::header_mode::{self, HeaderMode};
use rift_transport::server::FaultRouteHandler;
use serial_test::serial;
use std::sync::Arc;

#[test]
#[serial]
fn test_first_mode_wins() {
    assert_eq!(header_mode::init(HeaderMode::Compatible), HeaderMode::Compatible);
    assert_eq!(header_mode::init(HeaderMode::Strict), HeaderMode::Compatible);
    assert_eq!(header_mode::current(), HeaderMode::Compatible);
}

#[tokio::test]
#[serial]
async fn test_later_strict_server_keeps_compatible_mode() {
    header_mode::init(HeaderMode::Compatible);

    let mut config = local_config();
    config.strict_headers = true;
    let server = start(config, Arc::new(FaultRouteHandler::new(Vec::new()))).await;

    let bytes = send_raw(server.port().unwrap(), &get("/missing"))
        .await
        .unwrap();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("\r\nX-Rift-Https-Proxy: false\r\n"), "{text}");
    assert!(text.contains("\r\nContent-Type: application/json\r\n"), "{text}");
}

#[tokio::test]
#[serial]
async fn test_malformed_chunk_head_follows_mode() {
    header_mode::init(HeaderMode::Compatible);

    let mut config = local_config();
    config.fault_routes = vec![FaultRoute::new(
        "/malformed",
        FaultCommand::MalformedResponseChunk,
    )];
    let handler = Arc::new(FaultRouteHandler::new(config.fault_routes.clone()));
    let server = start(config, handler).await;

    let bytes = send_raw(server.port().unwrap(), &get("/malformed"))
        .await
        .unwrap();
    assert!(bytes.starts_with(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n"));
}
