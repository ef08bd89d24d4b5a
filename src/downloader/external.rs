// src/downloader/external.rs

use super::job::{DownloadJob, DownloadTarget, JobStatus, is_streaming_url};
use crate::{
    client::RobustClient,
    config::AppConfig,
    constants,
    error::*,
    models::SourceKind,
};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use regex::Regex;
use reqwest::header;
use std::{
    path::Path,
    process::Stdio,
    sync::{
        Arc, LazyLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};
use url::Url;

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[download\]\s+(\d{1,3}(?:\.\d+)?)%").unwrap());

/// 从外部下载器的一行输出中读出百分比
pub fn parse_percent(line: &str) -> Option<f64> {
    PERCENT_RE
        .captures(line)
        .and_then(|c| c[1].parse::<f64>().ok())
        .filter(|p| (0.0..=100.0).contains(p))
}

/// 交给外部命令行下载器处理的来源。
/// 进度主要靠轮询磁盘上输出文件的大小，下载器输出的百分比只作辅助参考。
#[derive(Clone)]
pub struct ExternalDownloader {
    http_client: Arc<RobustClient>,
    config: Arc<AppConfig>,
}

impl ExternalDownloader {
    pub fn new(http_client: Arc<RobustClient>, config: Arc<AppConfig>) -> Self {
        Self {
            http_client,
            config,
        }
    }

    /// 能探测到长度就用长度；播放列表按分片数估算；否则用固定估值。
    pub async fn estimate_size(&self, target: &DownloadTarget) -> u64 {
        let fallback = self.config.playlist_size_estimate;
        if target.kind == SourceKind::AdaptivePlaylist || is_streaming_url(&target.url) {
            return match self.estimate_playlist(&target.url, target.referer.as_deref()).await {
                Ok(Some(size)) => size,
                Ok(None) => fallback,
                Err(e) => {
                    debug!("播放列表估算失败，使用固定估值: {}", e);
                    fallback
                }
            };
        }

        let mut head = self.http_client.plain.head(&target.url);
        if let Some(referer) = &target.referer {
            head = head.header(header::REFERER, referer);
        }
        match head.send().await {
            Ok(res) if res.status().is_success() => {
                let is_html = res
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.contains("text/html"));
                let length = res
                    .headers()
                    .get(header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .filter(|l| *l > 0);
                match length {
                    Some(len) if !is_html => len,
                    _ => fallback,
                }
            }
            _ => fallback,
        }
    }

    async fn estimate_playlist(&self, url: &str, referer: Option<&str>) -> AppResult<Option<u64>> {
        let base = Url::parse(url)?;
        let text = self.http_client.get_text(base.as_str(), referer).await?;
        let playlist = m3u8_rs::parse_playlist_res(text.as_bytes())
            .map_err(|e| AppError::M3u8Parse(e.to_string()))?;

        let media = match playlist {
            m3u8_rs::Playlist::MediaPlaylist(media) => media,
            m3u8_rs::Playlist::MasterPlaylist(master) => {
                let Some(variant) = master.variants.iter().max_by_key(|v| v.bandwidth) else {
                    return Ok(None);
                };
                let media_url = base.join(&variant.uri)?;
                let text = self.http_client.get_text(media_url.as_str(), referer).await?;
                match m3u8_rs::parse_playlist_res(text.as_bytes())
                    .map_err(|e| AppError::M3u8Parse(e.to_string()))?
                {
                    m3u8_rs::Playlist::MediaPlaylist(media) => media,
                    m3u8_rs::Playlist::MasterPlaylist(_) => return Ok(None),
                }
            }
        };
        if media.segments.is_empty() {
            return Ok(None);
        }
        let estimate =
            media.segments.len() as u64 * constants::download::SEGMENT_SIZE_ESTIMATE_KB * 1024;
        debug!("播放列表 {} 共 {} 个分片，估算 {} 字节", url, media.segments.len(), estimate);
        Ok(Some(estimate))
    }

    pub async fn download(
        &self,
        job: &mut DownloadJob,
        target: &DownloadTarget,
        pbar: &ProgressBar,
    ) -> AppResult<()> {
        let estimate = self.estimate_size(target).await;
        job.total_bytes = Some(estimate);
        job.status = JobStatus::Downloading;

        let mut command = Command::new(&self.config.external_downloader);
        command
            .args(&self.config.external_args)
            .arg("-o")
            .arg(&job.destination)
            .args(["--retries", "10", "--fragment-retries", "10", "--newline"]);
        if let Some(referer) = &target.referer {
            command.arg("--referer").arg(referer);
        }
        command
            .arg(&target.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            "启动外部下载器 '{}' -> '{}'",
            self.config.external_downloader,
            job.destination.display()
        );
        let mut child = command.spawn().map_err(|e| {
            AppError::ExternalTool(format!("无法启动 '{}': {}", self.config.external_downloader, e))
        })?;

        // 百分比 (千分制) 由输出读取任务更新
        let percent = Arc::new(AtomicU64::new(0));
        let stderr_tail = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        if let Some(stdout) = child.stdout.take() {
            let percent = percent.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(p) = parse_percent(&line) {
                        percent.fetch_max((p * 10.0) as u64, Ordering::Relaxed);
                    }
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[{}] {}", constants::download::EXTERNAL_DOWNLOADER, line);
                    let mut tail = tail.lock().unwrap_or_else(|e| e.into_inner());
                    if tail.len() >= 5 {
                        tail.remove(0);
                    }
                    tail.push(line);
                }
            });
        }

        let partial = job.sibling_path(constants::download::PART_FILE_SUFFIX);
        let mut ticker = tokio::time::interval(Duration::from_millis(
            constants::download::EXTERNAL_POLL_INTERVAL_MS,
        ));
        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = ticker.tick() => {
                    let on_disk = file_len(&job.destination).max(file_len(&partial));
                    let by_percent = estimate * percent.load(Ordering::Relaxed) / 1000;
                    advance(job, on_disk.max(by_percent).min(estimate), pbar);
                }
            }
        };

        if !status.success() {
            job.status = JobStatus::Failed;
            let tail = stderr_tail.lock().unwrap_or_else(|e| e.into_inner()).join(" | ");
            warn!("外部下载器退出码 {:?}: {}", status.code(), tail);
            return Err(AppError::ExternalTool(format!(
                "'{}' 退出码 {:?}: {}",
                self.config.external_downloader,
                status.code(),
                tail
            )));
        }

        let final_size = file_len(&job.destination);
        if final_size == 0 {
            job.status = JobStatus::Failed;
            return Err(AppError::ExternalTool(format!(
                "外部下载器未生成文件 '{}'",
                job.destination.display()
            )));
        }
        // 估值只用于进度条，完成后把本任务占的份额补满
        advance(job, estimate.max(final_size), pbar);
        job.total_bytes = Some(final_size);
        job.status = JobStatus::Complete;
        Ok(())
    }
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// 只向前推进共享计数器和进度条
fn advance(job: &DownloadJob, observed: u64, pbar: &ProgressBar) {
    let before = job.bytes_received.fetch_max(observed, Ordering::Relaxed);
    if observed > before {
        pbar.inc(observed - before);
    }
}
