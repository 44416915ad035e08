//! Integration tests for the OneDrive client over real HTTP.

use integrations_onedrive::errors::ResourceError;
use integrations_onedrive::prelude::*;
use serde_json::json;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn create_test_client(server: &MockServer, test_mode: bool) -> OneDriveClient {
    init_tracing();
    OneDriveClient::builder()
        .auth_provider(StaticTokenProvider::new("test-token"))
        .api_url(format!("{}/v1.0/", server.uri()))
        .test_mode(test_mode)
        .retry(RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            multiplier: 2.0,
            jitter: false,
        })
        .build()
        .unwrap()
}

async fn mount_root(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1.0/drive/root"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ROOT",
            "name": "root",
            "folder": { "childCount": 3 }
        })))
        .mount(server)
        .await;
}

fn file(id: &str, name: &str, size: u64) -> serde_json::Value {
    json!({ "id": id, "name": name, "size": size, "file": { "mimeType": "application/octet-stream" } })
}

#[tokio::test]
async fn test_listing_follows_next_link() {
    let server = MockServer::start().await;
    mount_root(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1.0/drive/items/ROOT/children"))
        .and(query_param("$skiptoken", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [file("C", "c", 3)]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1.0/drive/items/ROOT/children"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                file("A", "a", 1),
                { "id": "B", "name": "b", "folder": { "childCount": 0 } }
            ],
            "@odata.nextLink": format!(
                "{}/v1.0/drive/items/ROOT/children?$top=2&$skiptoken=2",
                server.uri()
            )
        })))
        .mount(&server)
        .await;

    let client = create_test_client(&server, false);
    client.detect_shared_storage("").await.unwrap();

    let entries = client.list_entries("").await.unwrap();
    let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    assert!(entries[1].is_directory);
    assert_eq!(entries[2].size, 3);

    let info = client.get_file_info("c").await.unwrap().unwrap();
    assert_eq!(info.id, "C");
}

#[tokio::test]
async fn test_throttled_request_is_retried() {
    let server = MockServer::start().await;
    mount_root(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1.0/drive/items/ROOT/children"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "0")
                .set_body_json(json!({
                    "error": { "code": "activityLimitReached", "message": "Slow down" }
                })),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1.0/drive/items/ROOT/children"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .mount(&server)
        .await;

    let client = create_test_client(&server, false);
    client.detect_shared_storage("").await.unwrap();

    assert!(client.list_entries("").await.unwrap().is_empty());

    let requests = server.received_requests().await.unwrap();
    let listings = requests
        .iter()
        .filter(|request| request.url.path().ends_with("/children"))
        .count();
    assert_eq!(listings, 2);
}

#[tokio::test]
async fn test_missing_root_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/drive/root"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": "itemNotFound", "message": "Item does not exist" }
        })))
        .mount(&server)
        .await;

    let client = create_test_client(&server, false);
    let error = client.detect_shared_storage("").await.unwrap_err();
    assert!(matches!(
        error,
        OneDriveError::Resource(ResourceError::RootNotFound(_))
    ));
}

#[tokio::test]
async fn test_chunked_upload_over_http() {
    let server = MockServer::start().await;
    mount_root(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1.0/drive/items/ROOT:/a.bin:/createUploadSession"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": format!("{}/upload/s1", server.uri()),
            "nextExpectedRanges": ["0-"]
        })))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/s1"))
        .and(header("content-range", "bytes 0-9/10"))
        .respond_with(ResponseTemplate::new(201).set_body_json(file("F1", "a.bin", 10)))
        .mount(&server)
        .await;

    let client = create_test_client(&server, true);
    client.detect_shared_storage("").await.unwrap();

    let info = client.upload_file("a.bin", b"0123456789".to_vec(), 0).await.unwrap();
    assert_eq!(info.id, "F1");
    assert_eq!(info.size, 10);
    assert_eq!(client.cache().get("a.bin"), Some(info));

    let requests = server.received_requests().await.unwrap();
    let window = requests
        .iter()
        .find(|request| request.url.path() == "/upload/s1")
        .unwrap();
    assert!(!window.headers.contains_key("authorization"));
    assert_eq!(&window.body[..], b"0123456789");
}

#[tokio::test]
async fn test_download_follows_redirect() {
    let server = MockServer::start().await;
    mount_root(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1.0/drive/items/ROOT/children"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [file("F1", "f.bin", 5)]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1.0/drive/items/F1/content"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", format!("{}/blob/F1", server.uri())),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/blob/F1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
        .mount(&server)
        .await;

    let client = create_test_client(&server, false);
    client.detect_shared_storage("").await.unwrap();

    let download = client.download_file("f.bin").await.unwrap();
    assert_eq!(download.size(), 5);
    assert_eq!(&download.read_to_end().await.unwrap()[..], b"hello");
}
