//! RackHD HTTP client against a stub API.

mod common;

use axum::http::{Method, StatusCode};
use rackhd_bridge::rackhd::{RackHdClient, RackHdError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use common::{StubRackHd, FAKE_RESPONSE};

const WORKFLOW: &str = "Graph.Switch.Test";

#[tokio::test]
async fn test_requests_carry_json_accept_and_fixed_length() {
    let rackhd = StubRackHd::start(StatusCode::CREATED).await;
    let client = RackHdClient::new(rackhd.base_url(), WORKFLOW).unwrap();

    let response = client.upload_template("leaf", "hostname leaf").await.unwrap();
    assert_eq!(response, FAKE_RESPONSE);

    let requests = rackhd.requests();
    let request = &requests[0];
    assert_eq!(request.accept.as_deref(), Some("application/json"));
    assert_eq!(request.content_type.as_deref(), Some("text/plain"));
    assert_eq!(request.content_length.as_deref(), Some("13"));
}

#[tokio::test]
async fn test_trailing_slash_in_base_address_is_ignored() {
    let rackhd = StubRackHd::start(StatusCode::CREATED).await;
    let client = RackHdClient::new(format!("{}/", rackhd.base_url()), WORKFLOW).unwrap();

    client.upload_workflow("{}").await.unwrap();
    client.run_workflow("node-7", b"{}".to_vec()).await.unwrap();

    let requests = rackhd.requests();
    assert_eq!(requests[0].method, Method::PUT);
    assert_eq!(requests[0].path, "/api/1.1/workflows");
    assert_eq!(requests[1].method, Method::POST);
    assert_eq!(requests[1].path, "/api/1.1/nodes/node-7/workflows/");
    assert_eq!(requests[1].query.as_deref(), Some("name=Graph.Switch.Test"));
    assert_eq!(requests[1].content_type.as_deref(), Some("application/json"));
}

#[tokio::test]
async fn test_only_created_counts_as_success() {
    let rackhd = StubRackHd::start(StatusCode::OK).await;
    let client = RackHdClient::new(rackhd.base_url(), WORKFLOW).unwrap();

    let err = client.upload_workflow("{}").await.unwrap_err();
    match err {
        RackHdError::UnexpectedStatus { status, body, url } => {
            assert_eq!(status.as_u16(), 200);
            assert_eq!(body, FAKE_RESPONSE);
            assert!(url.ends_with("/api/1.1/workflows"));
        }
        other => panic!("expected UnexpectedStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn test_command_identifiers_cannot_leave_their_path_segment() {
    let rackhd = StubRackHd::start(StatusCode::CREATED).await;
    let client = RackHdClient::new(rackhd.base_url(), WORKFLOW).unwrap();

    client.upload_template("cfg?v=2", "a").await.unwrap();
    client.upload_template("../../workflows", "b").await.unwrap();
    client
        .run_workflow("../../templates/library/evil", b"{}".to_vec())
        .await
        .unwrap();

    let requests = rackhd.requests();
    assert_eq!(requests[0].path, "/api/1.1/templates/library/cfg%3Fv=2");
    assert_eq!(requests[0].query, None);
    assert_eq!(
        requests[1].path,
        "/api/1.1/templates/library/..%2F..%2Fworkflows"
    );
    assert_eq!(
        requests[2].path,
        "/api/1.1/nodes/..%2F..%2Ftemplates%2Flibrary%2Fevil/workflows/"
    );
    assert_eq!(requests[2].query.as_deref(), Some("name=Graph.Switch.Test"));
}

#[tokio::test]
async fn test_dot_segment_identifier_makes_no_request() {
    let rackhd = StubRackHd::start(StatusCode::CREATED).await;
    let client = RackHdClient::new(rackhd.base_url(), WORKFLOW).unwrap();

    let err = client.run_workflow("..", b"{}".to_vec()).await.unwrap_err();
    assert!(matches!(err, RackHdError::InvalidIdentifier { .. }));
    assert!(rackhd.requests().is_empty());
}

/// Answer one request with a 500 whose body is cut off mid-stream.
async fn truncated_error_server() -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get addr");
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("Failed to accept");
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.ends_with(b"\r\n\r\ncfg") {
            let n = socket.read(&mut buf).await.expect("Failed to read request");
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket
            .write_all(
                b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 64\r\n\r\npartial",
            )
            .await
            .expect("Failed to write response");
    });
    (format!("http://{addr}"), handle)
}

#[tokio::test]
async fn test_unreadable_error_body_keeps_status() {
    let (base, server) = truncated_error_server().await;
    let client = RackHdClient::new(base, WORKFLOW).unwrap();

    let err = client.upload_template("t", "cfg").await.unwrap_err();
    server.await.unwrap();

    match err {
        RackHdError::UnexpectedStatus { status, .. } => assert_eq!(status.as_u16(), 500),
        other => panic!("expected UnexpectedStatus, got {other:?}"),
    }
}
