// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::time::Duration;

use extractrs::engines::download_engine::{DownloadEngine, DownloadError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn engine(max_bytes: u64) -> DownloadEngine {
    // 本地mock服务器跑在环回地址上，测试通过豁免列表放行
    DownloadEngine::new(
        Duration::from_secs(5),
        max_bytes,
        vec![],
        vec!["127.0.0.1".to_string()],
    )
}

#[tokio::test]
async fn test_fetch_plain_text_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("Acme Corporation retained Beta LLC.")
                .insert_header("Content-Type", "text/plain; charset=utf-8"),
        )
        .mount(&server)
        .await;

    let document = engine(1_000_000)
        .fetch(&format!("{}/doc.txt", server.uri()))
        .await
        .unwrap();

    assert_eq!(document.text, "Acme Corporation retained Beta LLC.");
    assert_eq!(document.content_type.as_deref(), Some("text/plain"));
}

#[tokio::test]
async fn test_redirect_is_followed_and_revalidated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/final"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/final"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("redirected content")
                .insert_header("Content-Type", "text/plain"),
        )
        .mount(&server)
        .await;

    let document = engine(1_000_000)
        .fetch(&format!("{}/start", server.uri()))
        .await
        .unwrap();

    assert_eq!(document.text, "redirected content");
    assert!(document.final_url.ends_with("/final"));
}

#[tokio::test]
async fn test_redirect_to_private_address_rejected() {
    let server = MockServer::start().await;
    // 初始URL通过验证，重定向目标指向云元数据端点
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "http://169.254.169.254/latest/meta-data"),
        )
        .mount(&server)
        .await;

    let err = engine(1_000_000)
        .fetch(&format!("{}/start", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::UnsafeRedirect { .. }));
}

#[tokio::test]
async fn test_redirect_to_blocked_hostname_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "http://localhost/doc"))
        .mount(&server)
        .await;

    let err = engine(1_000_000)
        .fetch(&format!("{}/start", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::UnsafeRedirect { .. }));
}

#[tokio::test]
async fn test_unsafe_initial_url_rejected_before_any_request() {
    let err = DownloadEngine::new(Duration::from_secs(5), 1024, vec![], vec![])
        .fetch("http://169.254.169.254/latest/meta-data")
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::UnsafeUrl(_)));
}

#[tokio::test]
async fn test_oversized_body_aborts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("x".repeat(4096))
                .insert_header("Content-Type", "text/plain"),
        )
        .mount(&server)
        .await;

    let err = engine(1024)
        .fetch(&format!("{}/big.txt", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::TooLarge(1024)));
}

#[tokio::test]
async fn test_binary_content_type_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/image"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; 16])
                .insert_header("Content-Type", "image/png"),
        )
        .mount(&server)
        .await;

    let err = engine(1_000_000)
        .fetch(&format!("{}/image", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::UnsupportedContentType(mime) if mime == "image/png"));
}

#[tokio::test]
async fn test_http_error_status_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = engine(1_000_000)
        .fetch(&format!("{}/missing", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::HttpStatus(404)));
}

#[tokio::test]
async fn test_redirect_chain_capped() {
    let server = MockServer::start().await;
    // 六次重定向超出五跳上限
    for hop in 0..6 {
        Mock::given(method("GET"))
            .and(path(format!("/hop{}", hop)))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("/hop{}", hop + 1).as_str()),
            )
            .mount(&server)
            .await;
    }

    let err = engine(1_000_000)
        .fetch(&format!("{}/hop0", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::TooManyRedirects));
}
