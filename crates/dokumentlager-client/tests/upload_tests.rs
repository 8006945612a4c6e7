//! End-to-end tests against a mock Dokumentlager service

mod common;

use common::*;
use dokumentlager_client::{
    ClientConfig, ClientError, DocumentClient, DocumentMetadataUpload, NoAuthentication, UploadRequest,
};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use uuid::Uuid;
use wiremock::{
    matchers::{any, method, path, query_param},
    Mock, MockServer, Request, ResponseTemplate,
};

const ORG: Uuid = Uuid::from_u128(0x1111_1111_1111_1111_1111_1111_1111_1111);
const ACCOUNT: Uuid = Uuid::from_u128(0x2222_2222_2222_2222_2222_2222_2222_2222);

fn upload_path() -> String {
    format!("/dokumentlager/api/v1/{}/kontoer/{}/dokumenter/", ORG, ACCOUNT)
}

fn client(server: &MockServer) -> DocumentClient {
    DocumentClient::new(ClientConfig::with_base_url(server.uri()), Arc::new(NoAuthentication)).unwrap()
}

fn metadata(level: i32) -> DocumentMetadataUpload {
    DocumentMetadataUpload::new("dokument.bin")
        .with_mimetype("application/octet-stream")
        .with_security_level(level)
}

async fn mount_public_key(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/dokumentlager/api/v1/public-key"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CERTIFICATE_PEM))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_upload(server: &MockServer, encrypted: &str, size: usize) {
    Mock::given(method("POST"))
        .and(path(upload_path()))
        .and(query_param("kryptert", encrypted))
        .respond_with(ResponseTemplate::new(200).set_body_json(upload_result_json(Uuid::new_v4(), size)))
        .mount(server)
        .await;
}

fn document_part(request: &Request) -> Vec<u8> {
    let content_type = request
        .headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .expect("upload without content type");
    let parts = multipart_parts(content_type, &request.body);
    part(&parts, "dokument").to_vec()
}

async fn uploads(server: &MockServer) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "POST")
        .collect()
}

#[tokio::test]
async fn test_plaintext_upload_at_level_three() {
    let server = MockServer::start().await;
    mount_public_key(&server, 0).await;
    mount_upload(&server, "false", 50_000).await;

    let plaintext = random_bytes(50_000);
    let request = UploadRequest::new(std::io::Cursor::new(plaintext.clone()), metadata(3), ORG, ACCOUNT)
        .encrypt(false)
        .request_id("req-42");
    let response = client(&server).upload(request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.result.ukryptert_storrelse, Some(50_000));

    let received = uploads(&server).await;
    assert_eq!(received.len(), 1);
    assert_eq!(document_part(&received[0]), plaintext);
    assert_eq!(
        received[0].headers.get("requestid").and_then(|v| v.to_str().ok()),
        Some("req-42")
    );

    let content_type = received[0].headers.get("content-type").unwrap().to_str().unwrap();
    let parts = multipart_parts(content_type, &received[0].body);
    let metadata: serde_json::Value = serde_json::from_slice(part(&parts, "metadata")).unwrap();
    assert_eq!(metadata["dokumentnavn"], "dokument.bin");
    assert_eq!(metadata["sikkerhetsniva"], 3);
}

#[tokio::test]
async fn test_level_four_is_encrypted_without_a_flag() {
    let server = MockServer::start().await;
    mount_public_key(&server, 1).await;
    mount_upload(&server, "true", 50_000).await;

    let plaintext = random_bytes(50_000);
    let request = UploadRequest::new(std::io::Cursor::new(plaintext.clone()), metadata(4), ORG, ACCOUNT);
    client(&server).upload(request).await.unwrap();

    let received = uploads(&server).await;
    let ciphertext = document_part(&received[0]);
    assert_ne!(ciphertext, plaintext);
    assert_eq!(decryptor().decrypt(&ciphertext).unwrap(), plaintext);
}

#[tokio::test]
async fn test_oversized_document_never_reaches_the_service() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server);
    for level in [3, 4] {
        let request = UploadRequest::new(std::io::Cursor::new(vec![0u8; 200]), metadata(level), ORG, ACCOUNT)
            .max_size(100);
        let err = client.upload(request).await.unwrap_err();
        assert!(matches!(err, ClientError::DocumentTooLarge { limit: 100 }), "got {err}");
    }
}

#[tokio::test]
async fn test_size_hint_is_checked_before_reading() {
    let server = MockServer::start().await;
    Mock::given(any()).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

    let request = UploadRequest::new(std::io::Cursor::new(vec![1u8; 10]), metadata(3), ORG, ACCOUNT)
        .max_size(1_000_000)
        .size_hint(2_000_000);
    let err = client(&server).upload(request).await.unwrap_err();
    assert!(matches!(err, ClientError::DocumentTooLarge { limit: 1_000_000 }));
}

#[tokio::test]
async fn test_empty_document_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(any()).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

    let client = client(&server);
    for level in [1, 4] {
        let request = UploadRequest::new(tokio::io::empty(), metadata(level), ORG, ACCOUNT);
        assert!(matches!(client.upload(request).await, Err(ClientError::EmptyDocument)));
    }
}

#[tokio::test]
async fn test_certificate_is_fetched_once_per_client() {
    let server = MockServer::start().await;
    mount_public_key(&server, 1).await;
    mount_upload(&server, "true", 1_000).await;

    let client = client(&server);
    for _ in 0..3 {
        let request = UploadRequest::new(std::io::Cursor::new(random_bytes(1_000)), metadata(4), ORG, ACCOUNT);
        client.upload(request).await.unwrap();
    }
    assert_eq!(uploads(&server).await.len(), 3);
}

#[tokio::test]
async fn test_certificate_failure_skips_the_upload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dokumentlager/api/v1/public-key"))
        .respond_with(ResponseTemplate::new(503).set_body_string("vedlikehold"))
        .mount(&server)
        .await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

    let request = UploadRequest::new(std::io::Cursor::new(vec![1u8; 64]), metadata(4), ORG, ACCOUNT);
    let err = client(&server).upload(request).await.unwrap_err();
    assert!(matches!(err, ClientError::CertificateResolution(_)));
}

#[tokio::test]
async fn test_server_error_carries_status_and_body() {
    let server = MockServer::start().await;
    mount_public_key(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(upload_path()))
        .respond_with(ResponseTemplate::new(500).set_body_string("intern feil"))
        .mount(&server)
        .await;

    let client = client(&server);
    for encrypt in [false, true] {
        let request = UploadRequest::new(std::io::Cursor::new(random_bytes(2_048)), metadata(3), ORG, ACCOUNT)
            .encrypt(encrypt);
        match client.upload(request).await.unwrap_err() {
            ClientError::Http { status, body, operation } => {
                assert_eq!(status, 500);
                assert_eq!(body, "intern feil");
                assert_eq!(operation, "upload");
            }
            other => panic!("expected an HTTP error, got {other}"),
        }
    }
}

#[tokio::test]
async fn test_already_encrypted_upload_is_sent_as_is() {
    let server = MockServer::start().await;
    mount_public_key(&server, 0).await;
    mount_upload(&server, "true", 300).await;

    let bytes = random_bytes(300);
    let request = UploadRequest::new(std::io::Cursor::new(bytes.clone()), metadata(4), ORG, ACCOUNT);
    client(&server).upload_already_encrypted(request).await.unwrap();

    assert_eq!(document_part(&uploads(&server).await[0]), bytes);
}

#[tokio::test]
async fn test_lazy_download_waits_for_first_read() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path(format!("/dokumentlager/nedlasting/{}", id)))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(b"%PDF-1.7".to_vec(), "application/pdf"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut download = client(&server).download_lazy(id);
    tokio::task::yield_now().await;
    assert!(server.received_requests().await.unwrap().is_empty());

    let mut body = Vec::new();
    download.read_to_end(&mut body).await.unwrap();
    assert_eq!(body, b"%PDF-1.7");
    assert_eq!(download.status().await.unwrap(), 200);
    assert_eq!(
        download.header("Content-Type").await.unwrap().as_deref(),
        Some("application/pdf")
    );
}

#[tokio::test]
async fn test_missing_document_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("finnes ikke"))
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(client.download(Uuid::new_v4()).await.unwrap_err().is_not_found());

    let mut lazy = client.download_lazy(Uuid::new_v4());
    assert!(lazy.status().await.unwrap_err().is_not_found());
    assert!(matches!(lazy.status().await, Err(ClientError::DownloadFailed(_))));
}

#[tokio::test]
async fn test_search_and_delete() {
    let server = MockServer::start().await;
    let correlation_id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path(format!("/dokumentlager/api/v1/{}/kontoer/{}/dokumenter/sok", ORG, ACCOUNT)))
        .and(query_param("fra", "0"))
        .and(query_param("til", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "totaltAntallTreff": 0,
            "dokumenter": [],
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!(
            "/dokumentlager/api/v1/{}/kontoer/{}/dokumenter/korrelasjonsid/{}",
            ORG, ACCOUNT, correlation_id
        )))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let hits = client
        .search_by_correlation_id(ORG, ACCOUNT, correlation_id, 0, 5)
        .await
        .unwrap();
    assert_eq!(hits.result.totalt_antall_treff, 0);

    let deleted = client.delete_by_correlation_id(ORG, ACCOUNT, correlation_id).await.unwrap();
    assert_eq!(deleted.status, 204);

    let search = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.method.as_str() == "POST")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&search.body).unwrap();
    assert_eq!(body["korrelasjonsid"], correlation_id.to_string());
}

#[tokio::test]
async fn test_upload_from_file() {
    use std::io::Write;

    let server = MockServer::start().await;
    mount_public_key(&server, 1).await;
    mount_upload(&server, "true", 120_000).await;

    let plaintext = random_bytes(120_000);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&plaintext).unwrap();
    file.flush().unwrap();

    let reader = tokio::fs::File::open(file.path()).await.unwrap();
    let request = UploadRequest::new(reader, metadata(4), ORG, ACCOUNT)
        .size_hint(plaintext.len() as u64)
        .max_size(plaintext.len() as u64);
    client(&server).upload(request).await.unwrap();

    let ciphertext = document_part(&uploads(&server).await[0]);
    assert_eq!(decryptor().decrypt(&ciphertext).unwrap(), plaintext);
}

#[tokio::test]
async fn test_source_read_failure_is_io_not_transport() {
    let server = MockServer::start().await;
    mount_public_key(&server, 1).await;
    mount_upload(&server, "false", 0).await;
    mount_upload(&server, "true", 0).await;

    let client = client(&server);
    for encrypt in [false, true] {
        let request = UploadRequest::new(FailingSource::after(20_000), metadata(3), ORG, ACCOUNT).encrypt(encrypt);
        match client.upload(request).await.unwrap_err() {
            ClientError::Io(err) => assert_eq!(err.to_string(), "disk gone", "encrypt={encrypt}"),
            other => panic!("expected an I/O error with encrypt={encrypt}, got {other}"),
        }
    }
}
