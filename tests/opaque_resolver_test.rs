// tests/opaque_resolver_test.rs

use ep_dl::{
    client::RobustClient,
    config::AppConfig,
    error::AppError,
    extractor::{OpaqueResolver, SourceAdapter, StreamResolver},
    models::{EpisodeRef, EpisodeSource, SeriesRef, SourceKind},
};
use mockito::Matcher;
use std::sync::Arc;

const SERIES_ID: &str = "ReooPAxPMsHM4KPMY";

fn config_for(server_url: &str) -> Arc<AppConfig> {
    let mut config = AppConfig::default();
    config.opaque_api_base = server_url.to_string();
    config.opaque_link_base = server_url.to_string();
    config.opaque_referer = server_url.to_string();
    Arc::new(config)
}

fn resolver(config: Arc<AppConfig>) -> OpaqueResolver {
    let client = Arc::new(RobustClient::new(config.clone()).expect("Failed to create client"));
    OpaqueResolver::new(client, config)
}

fn episode(mode: Option<&str>) -> EpisodeRef {
    EpisodeRef {
        number: "1".into(),
        series: Arc::new(SeriesRef {
            key: SERIES_ID.into(),
            title: "Show".into(),
            mode: mode.map(str::to_string),
            skip_id: None,
        }),
        source: EpisodeSource::Opaque(SERIES_ID.into()),
        duration_hint: None,
    }
}

#[tokio::test]
async fn test_obfuscated_source_is_decoded_and_fetched() {
    let mut server = mockito::Server::new_async().await;
    let api = server
        .mock("GET", "/api")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"data":{"episode":{"episodeString":"1","sourceUrls":[
                {"sourceUrl":"https://embed.example/e/1","sourceName":"Ok","priority":3},
                {"sourceUrl":"--175b54575b5307515c0509","sourceName":"Default","priority":7.5}
            ]}}}"#,
        )
        .create_async()
        .await;
    // "/clock?id=1" 被改写为 "/clock.json?id=1"
    let links = server
        .mock("GET", "/clock.json")
        .match_query(Matcher::UrlEncoded("id".into(), "1".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"links":[{"link":"https://cdn.example.com/hls/master.m3u8","resolutionStr":"1080p","hls":true}]}"#,
        )
        .create_async()
        .await;

    let config = config_for(&server.url());
    let descriptor = resolver(config.clone()).resolve(&episode(Some("sub"))).await.unwrap();

    api.assert_async().await;
    links.assert_async().await;
    assert_eq!(descriptor.provider, "Default");
    assert_eq!(descriptor.kind, SourceKind::AdaptivePlaylist);
    assert_eq!(descriptor.variants.len(), 1);
    assert_eq!(descriptor.variants[0].label, "1080p");
    assert_eq!(descriptor.referer.as_deref(), Some(config.opaque_referer.as_str()));
}

#[tokio::test]
async fn test_empty_api_falls_back_to_page_scan() {
    let mut server = mockito::Server::new_async().await;
    let _api = server
        .mock("GET", "/api")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"data":{"episode":{"sourceUrls":[]}}}"#)
        .create_async()
        .await;
    let page = server
        .mock("GET", format!("/bangumi/{}/p-1-sub", SERIES_ID).as_str())
        .with_status(200)
        .with_body(
            r#"<script>window.__DATA__={\"sourceUrl\":\"https://cdn.example.com/ep1.mp4\",\"sourceName\":\"Mp4\"}</script>"#,
        )
        .create_async()
        .await;

    let descriptor = resolver(config_for(&server.url()))
        .resolve(&episode(Some("sub")))
        .await
        .unwrap();

    page.assert_async().await;
    assert_eq!(descriptor.provider, "Mp4");
    assert_eq!(descriptor.kind, SourceKind::Direct);
    assert_eq!(descriptor.variants[0].url, "https://cdn.example.com/ep1.mp4");
}

#[tokio::test]
async fn test_missing_translation_mode_is_unsupported() {
    let config = config_for("http://127.0.0.1:9");
    assert!(matches!(
        resolver(config).resolve(&episode(None)).await,
        Err(AppError::UnsupportedSource(_))
    ));
}

#[tokio::test]
async fn test_source_adapter_dispatches_opaque_ids() {
    let mut server = mockito::Server::new_async().await;
    let _api = server
        .mock("GET", "/api")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            r#"{"data":{"episode":{"sourceUrls":[{"sourceUrl":"https://cdn.example.com/ep1.mp4","sourceName":"Direct"}]}}}"#,
        )
        .create_async()
        .await;

    let config = config_for(&server.url());
    let client = Arc::new(RobustClient::new(config.clone()).unwrap());
    let adapter = SourceAdapter::new(client, config);
    let descriptor = adapter.resolve(&episode(Some("sub"))).await.unwrap();
    assert_eq!(descriptor.variants[0].url, "https://cdn.example.com/ep1.mp4");
}
