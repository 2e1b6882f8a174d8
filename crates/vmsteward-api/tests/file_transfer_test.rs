#![allow(clippy::unwrap_used)]
// Integration tests for `FileTransferClient` using wiremock.

use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vmsteward_api::{FileTransferClient, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, FileTransferClient) {
    let server = MockServer::start().await;
    let client = FileTransferClient::new(&TransportConfig::default()).unwrap();
    (server, client)
}

fn guest_file_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}/guestFile?id=42&token=abc", server.uri())).unwrap()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_staged_file() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/guestFile"))
        .respond_with(ResponseTemplate::new(200).set_body_string(" Installed \r\n"))
        .expect(1)
        .mount(&server)
        .await;

    let file = client.fetch(guest_file_url(&server)).await.unwrap();

    assert!(file.is_ok());
    assert_eq!(file.status, 200);
    assert_eq!(file.reason, "OK");
    assert_eq!(file.body, " Installed \r\n");
}

#[tokio::test]
async fn test_fetch_reports_non_200_without_failing() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/guestFile"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .mount(&server)
        .await;

    let file = client.fetch(guest_file_url(&server)).await.unwrap();

    assert!(!file.is_ok());
    assert_eq!(file.status, 404);
    assert_eq!(file.reason, "Not Found");
}

#[tokio::test]
async fn test_fetch_unreachable_host_is_transport_error() {
    let client = FileTransferClient::new(&TransportConfig::default()).unwrap();
    let url = Url::parse("http://127.0.0.1:1/guestFile").unwrap();

    let result = client.fetch(url).await;

    assert!(
        matches!(result, Err(vmsteward_api::Error::Transport(_))),
        "expected Transport error, got: {result:?}"
    );
}
