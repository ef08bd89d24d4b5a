// tests/page_resolver_test.rs

use ep_dl::{
    client::RobustClient,
    config::AppConfig,
    error::AppError,
    extractor::{PageResolver, StreamResolver},
    models::{EpisodeRef, EpisodeSource, SeriesRef, SourceKind},
    quality::{QualityPolicy, QualitySelector},
};
use std::sync::Arc;

fn resolver() -> PageResolver {
    let config = Arc::new(AppConfig::default());
    let client = Arc::new(RobustClient::new(config.clone()).expect("Failed to create client"));
    PageResolver::new(client, config)
}

fn episode(url: String) -> EpisodeRef {
    EpisodeRef {
        number: "1".into(),
        series: Arc::new(SeriesRef {
            key: "show".into(),
            title: "Show".into(),
            mode: None,
            skip_id: None,
        }),
        source: EpisodeSource::Page(url),
        duration_hint: None,
    }
}

#[tokio::test]
async fn test_data_attribute_resolves_to_single_variant() {
    let mut server = mockito::Server::new_async().await;
    let page = server
        .mock("GET", "/show/ep-1")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(r#"<html><div id="player" data-video-src="https://cdn.example.com/v/ep1.mp4"></div></html>"#)
        .create_async()
        .await;

    let page_url = format!("{}/show/ep-1", server.url());
    let descriptor = resolver().resolve(&episode(page_url.clone())).await.unwrap();

    page.assert_async().await;
    assert_eq!(descriptor.variants.len(), 1);
    assert_eq!(descriptor.variants[0].url, "https://cdn.example.com/v/ep1.mp4");
    assert_eq!(descriptor.variants[0].label, "");
    assert_eq!(descriptor.kind, SourceKind::Direct);
    assert_eq!(descriptor.referer.as_deref(), Some(page_url.as_str()));
}

#[tokio::test]
async fn test_json_endpoint_yields_all_qualities() {
    let mut server = mockito::Server::new_async().await;
    let page_url = format!("{}/show/ep-2", server.url());
    let page = server
        .mock("GET", "/show/ep-2")
        .with_status(200)
        .with_body(r#"<div class="player" data-sources="/api/sources/ep2.json"></div>"#)
        .create_async()
        .await;
    let sources = server
        .mock("GET", "/api/sources/ep2.json")
        .match_header("referer", page_url.as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data":[{"src":"u480.mp4","label":"480"},{"src":"u720.mp4","label":"720"}]}"#)
        .create_async()
        .await;

    let descriptor = resolver().resolve(&episode(page_url)).await.unwrap();
    page.assert_async().await;
    sources.assert_async().await;

    assert_eq!(descriptor.variants.len(), 2);
    let selector = QualitySelector::new(QualityPolicy::Best, None);
    let chosen = selector.select(&descriptor).unwrap();
    assert_eq!(chosen.label, "720");
    assert_eq!(chosen.url, format!("{}/api/sources/u720.mp4", server.url()));
}

#[tokio::test]
async fn test_page_without_reference_is_not_found() {
    let mut server = mockito::Server::new_async().await;
    let _page = server
        .mock("GET", "/show/ep-3")
        .with_status(200)
        .with_body("<html><body>稍后上线</body></html>")
        .create_async()
        .await;

    let result = resolver()
        .resolve(&episode(format!("{}/show/ep-3", server.url())))
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_missing_page_is_not_found() {
    let mut server = mockito::Server::new_async().await;
    let _page = server
        .mock("GET", "/show/ep-4")
        .with_status(404)
        .create_async()
        .await;

    let result = resolver()
        .resolve(&episode(format!("{}/show/ep-4", server.url())))
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_opaque_source_is_rejected_by_page_resolver() {
    let mut ep = episode(String::new());
    ep.source = EpisodeSource::Opaque("ReooPAxPMsHM4KPMY".into());
    assert!(matches!(
        resolver().resolve(&ep).await,
        Err(AppError::UnsupportedSource(_))
    ));
}
