// tests/external_download_test.rs

#![cfg(unix)]

use ep_dl::{
    client::RobustClient,
    config::AppConfig,
    constants,
    downloader::{DownloadTarget, Downloader, ExternalDownloader, JobStatus},
    error::AppError,
    models::SourceKind,
};
use indicatif::ProgressBar;
use mockito::ServerGuard;
use std::{path::Path, sync::Arc};
use tempfile::{TempDir, tempdir};

const PLAYLIST: &str = "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXTINF:10.0,\nseg0.ts\n#EXTINF:10.0,\nseg1.ts\n#EXT-X-ENDLIST\n";

const WRITES_FILE: &str = r#"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; shift; fi
  shift
done
echo "[download]  50.0% of ~ 14.00B"
printf 'external-bytes' > "$out"
echo "[download] 100% of 14.00B"
"#;

const EXITS_WITH_ERROR: &str = r#"
echo "ERROR: Unsupported URL" >&2
exit 3
"#;

const WRITES_NOTHING: &str = r#"
echo "[download] nothing to do"
exit 0
"#;

async fn mock_playlist(server: &mut ServerGuard) {
    server
        .mock("GET", "/hls/index.m3u8")
        .with_status(200)
        .with_header("content-type", "application/vnd.apple.mpegurl")
        .with_body(PLAYLIST)
        .create_async()
        .await;
}

/// 用 /bin/sh 执行脚本作为外部下载器
fn downloader_with_script(dir: &Path, script: &str) -> Downloader {
    let path = dir.join("fake-dl.sh");
    std::fs::write(&path, script).unwrap();
    let mut config = AppConfig::default();
    config.external_downloader = "/bin/sh".into();
    config.external_args = vec![path.to_string_lossy().into_owned()];
    let config = Arc::new(config);
    let client = Arc::new(RobustClient::new(config.clone()).expect("Failed to create client"));
    Downloader::new(client, config)
}

fn playlist_target(server: &ServerGuard) -> DownloadTarget {
    DownloadTarget {
        url: format!("{}/hls/index.m3u8", server.url()),
        kind: SourceKind::AdaptivePlaylist,
        referer: None,
    }
}

fn workspace() -> (TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let destination = dir.path().join("Show").join("Episode 1.mp4");
    (dir, destination)
}

#[tokio::test]
async fn test_playlist_estimate_counts_segments() {
    let mut server = mockito::Server::new_async().await;
    mock_playlist(&mut server).await;
    let config = Arc::new(AppConfig::default());
    let client = Arc::new(RobustClient::new(config.clone()).unwrap());
    let external = ExternalDownloader::new(client, config);

    let estimate = external.estimate_size(&playlist_target(&server)).await;
    assert_eq!(estimate, 2 * constants::download::SEGMENT_SIZE_ESTIMATE_KB * 1024);
}

#[tokio::test]
async fn test_delegated_download_completes_from_output_file() {
    let mut server = mockito::Server::new_async().await;
    mock_playlist(&mut server).await;
    let (dir, destination) = workspace();
    let downloader = downloader_with_script(dir.path(), WRITES_FILE);
    let target = playlist_target(&server);
    assert!(downloader.is_delegated(&target));

    let pbar = ProgressBar::hidden();
    let job = downloader.download(&target, &destination, 4, &pbar).await.unwrap();

    assert_eq!(std::fs::read(&destination).unwrap(), b"external-bytes");
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.total_bytes, Some(14));
    // 进度条补满到估值
    assert_eq!(pbar.position(), 2 * constants::download::SEGMENT_SIZE_ESTIMATE_KB * 1024);
}

#[tokio::test]
async fn test_delegated_download_nonzero_exit_is_external_tool_error() {
    let mut server = mockito::Server::new_async().await;
    mock_playlist(&mut server).await;
    let (dir, destination) = workspace();
    let downloader = downloader_with_script(dir.path(), EXITS_WITH_ERROR);

    let result = downloader
        .download(&playlist_target(&server), &destination, 4, &ProgressBar::hidden())
        .await;
    match result {
        Err(AppError::ExternalTool(msg)) => assert!(msg.contains("Some(3)"), "{}", msg),
        other => panic!("应返回外部下载器错误，实际为 {:?}", other.map(|j| j.status)),
    }
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_delegated_download_without_output_file_fails() {
    let mut server = mockito::Server::new_async().await;
    mock_playlist(&mut server).await;
    let (dir, destination) = workspace();
    let downloader = downloader_with_script(dir.path(), WRITES_NOTHING);

    let result = downloader
        .download(&playlist_target(&server), &destination, 4, &ProgressBar::hidden())
        .await;
    assert!(matches!(result, Err(AppError::ExternalTool(ref msg)) if msg.contains("未生成文件")));
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_missing_external_command_is_external_tool_error() {
    let mut server = mockito::Server::new_async().await;
    mock_playlist(&mut server).await;
    let (dir, destination) = workspace();
    let mut config = AppConfig::default();
    config.external_downloader = dir.path().join("no-such-downloader").to_string_lossy().into_owned();
    let config = Arc::new(config);
    let client = Arc::new(RobustClient::new(config.clone()).unwrap());
    let downloader = Downloader::new(client, config);

    let result = downloader
        .download(&playlist_target(&server), &destination, 4, &ProgressBar::hidden())
        .await;
    assert!(matches!(result, Err(AppError::ExternalTool(ref msg)) if msg.contains("无法启动")));
}
