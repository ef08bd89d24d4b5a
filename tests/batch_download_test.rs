// tests/batch_download_test.rs

#![cfg(unix)]

use async_trait::async_trait;
use ep_dl::{
    client::RobustClient,
    config::AppConfig,
    downloader::{BatchDownloader, DownloadManager, DownloadStats, Downloader, episode_destination},
    error::{AppError, AppResult},
    extractor::StreamResolver,
    models::{EpisodeRef, EpisodeSource, SeriesRef, SourceKind, StreamDescriptor, StreamVariant},
    quality::{QualityPolicy, QualitySelector},
};
use mockito::Matcher;
use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

/// 按集数返回 `<base>/ep<n>.<ext>`，指定的集数解析失败
struct StubResolver {
    base: String,
    extension: &'static str,
    kind: SourceKind,
    failing: Vec<String>,
    calls: AtomicUsize,
}

impl StubResolver {
    fn new(base: String, extension: &'static str, kind: SourceKind) -> Self {
        Self {
            base,
            extension,
            kind,
            failing: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl StreamResolver for StubResolver {
    async fn resolve(&self, episode: &EpisodeRef) -> AppResult<StreamDescriptor> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&episode.number) {
            return Err(AppError::NotFound(format!("第 {} 集没有视频源", episode.number)));
        }
        Ok(StreamDescriptor {
            variants: vec![StreamVariant {
                label: "720p".into(),
                url: format!("{}/ep{}.{}", self.base, episode.number, self.extension),
            }],
            kind: self.kind,
            provider: "stub".into(),
            referer: None,
        })
    }
}

fn episodes(count: u32) -> Vec<EpisodeRef> {
    let series = Arc::new(SeriesRef {
        key: "site.example/show".into(),
        title: "Show".into(),
        mode: None,
        skip_id: None,
    });
    (1..=count)
        .map(|n| EpisodeRef {
            number: n.to_string(),
            series: series.clone(),
            source: EpisodeSource::Page(format!("https://site.example/show/ep-{}", n)),
            duration_hint: None,
        })
        .collect()
}

fn batch(config: AppConfig, resolver: Arc<StubResolver>) -> BatchDownloader {
    let config = Arc::new(config);
    let client = Arc::new(RobustClient::new(config.clone()).expect("Failed to create client"));
    BatchDownloader::new(
        Downloader::new(client, config.clone()),
        resolver,
        Arc::new(QualitySelector::new(QualityPolicy::Best, None)),
        config,
        DownloadManager::new(),
        CancellationToken::new(),
    )
}

fn base_config(output_dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.output_dir = output_dir.to_path_buf();
    config.workers = 1;
    config.retry_attempts = 0;
    config.retry_backoff_step = Duration::ZERO;
    config
}

#[tokio::test]
async fn test_batch_skips_existing_and_continues_after_failures() {
    let mut server = mockito::Server::new_async().await;
    let data = b"0123456789";

    // 第 1 集已存在，不应再探测
    let head_existing = server
        .mock("HEAD", "/ep1.mp4")
        .expect(0)
        .create_async()
        .await;
    let _head_ok = server
        .mock("HEAD", "/ep2.mp4")
        .with_status(200)
        .with_header("content-length", "10")
        .create_async()
        .await;
    let body_ok = server
        .mock("GET", "/ep2.mp4")
        .with_status(206)
        .with_header("content-range", "bytes 0-9/10")
        .with_body(data)
        .create_async()
        .await;
    let _head_denied = server
        .mock("HEAD", "/ep4.mp4")
        .with_status(200)
        .with_header("content-length", "10")
        .create_async()
        .await;
    let _body_denied = server
        .mock("GET", "/ep4.mp4")
        .with_status(403)
        .create_async()
        .await;

    let dir = tempdir().unwrap();
    let mut resolver = StubResolver::new(server.url(), "mp4", SourceKind::Direct);
    resolver.failing.push("3".into());
    let resolver = Arc::new(resolver);
    let batch = batch(base_config(dir.path()), resolver.clone());

    let eps = episodes(4);
    let existing =
        episode_destination(dir.path(), &eps[0], &format!("{}/ep1.mp4", server.url())).unwrap();
    std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
    std::fs::write(&existing, b"already here").unwrap();

    batch.run(&eps).await.unwrap();

    assert_eq!(
        batch.manager().get_stats(),
        DownloadStats {
            total: 4,
            success: 1,
            skipped: 1,
            failed: 2
        }
    );
    assert!(!batch.manager().did_all_succeed());
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 4);
    head_existing.assert_async().await;
    body_ok.assert_async().await;

    assert_eq!(std::fs::read(&existing).unwrap(), b"already here");
    let second =
        episode_destination(dir.path(), &eps[1], &format!("{}/ep2.mp4", server.url())).unwrap();
    assert_eq!(std::fs::read(&second).unwrap(), data);
    let fourth =
        episode_destination(dir.path(), &eps[3], &format!("{}/ep4.mp4", server.url())).unwrap();
    assert!(!fourth.exists());
}

/// 外部下载器脚本：记录开始与结束，中间停顿一下再写出文件
const LOGGING_SCRIPT: &str = r#"
log="$1"; shift
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; shift; fi
  shift
done
echo start >> "$log"
sleep 0.3
printf 'external-bytes' > "$out"
echo "[download] 100% of 14.00B"
echo end >> "$log"
"#;

/// 从开始与结束记录中算出最多同时运行的下载数
fn max_in_flight(log: &str) -> usize {
    let mut current = 0usize;
    let mut max = 0usize;
    for line in log.lines() {
        match line.trim() {
            "start" => {
                current += 1;
                max = max.max(current);
            }
            "end" => current = current.saturating_sub(1),
            _ => {}
        }
    }
    max
}

async fn run_delegated_batch(concurrency: usize, count: u32) -> (String, DownloadStats) {
    let mut server = mockito::Server::new_async().await;
    let _head = server
        .mock("HEAD", Matcher::Regex(r"^/ep\d+\.mp4$".into()))
        .with_status(200)
        .with_header("content-length", "14")
        .create_async()
        .await;

    let dir = tempdir().unwrap();
    let script = dir.path().join("fake-dl.sh");
    let log = dir.path().join("runs.log");
    std::fs::write(&script, LOGGING_SCRIPT).unwrap();

    let mut config = base_config(&dir.path().join("out"));
    config.batch_concurrency = concurrency;
    config.delegated_hosts = vec!["127.0.0.1".into()];
    config.external_downloader = "/bin/sh".into();
    config.external_args = vec![
        script.to_string_lossy().into_owned(),
        log.to_string_lossy().into_owned(),
    ];

    let resolver = Arc::new(StubResolver::new(server.url(), "mp4", SourceKind::Embed));
    let batch = batch(config, resolver);
    let eps = episodes(count);
    batch.run(&eps).await.unwrap();

    for episode in &eps {
        let url = format!("{}/ep{}.mp4", server.url(), episode.number);
        let path = episode_destination(&dir.path().join("out"), episode, &url).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"external-bytes");
    }
    let log = std::fs::read_to_string(&log).unwrap();
    (log, batch.manager().get_stats())
}

#[tokio::test]
async fn test_batch_concurrency_of_one_runs_episodes_one_at_a_time() {
    let (log, stats) = run_delegated_batch(1, 3).await;
    assert_eq!(log.lines().filter(|l| l.trim() == "start").count(), 3);
    assert_eq!(max_in_flight(&log), 1);
    assert_eq!(stats.success, 3);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_batch_concurrency_caps_in_flight_episodes() {
    let (log, stats) = run_delegated_batch(2, 4).await;
    assert_eq!(log.lines().filter(|l| l.trim() == "start").count(), 4);
    assert!(max_in_flight(&log) <= 2);
    assert_eq!(stats.success, 4);
}

#[test]
fn test_max_in_flight_counts_overlap() {
    assert_eq!(max_in_flight("start\nend\nstart\nend\n"), 1);
    assert_eq!(max_in_flight("start\nstart\nend\nstart\nend\nend\n"), 2);
}
