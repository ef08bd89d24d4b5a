// src/downloader/job.rs

use super::{external::ExternalDownloader, ranged::RangedDownloader};
use crate::{
    client::RobustClient,
    config::AppConfig,
    constants,
    error::*,
    models::{SourceKind, host_matches},
};
use indicatif::ProgressBar;
use log::{debug, info};
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Downloading,
    Combining,
    Complete,
    Failed,
}

/// 单个文件的下载任务。`bytes_received` 在完成前只增不减。
#[derive(Debug)]
pub struct DownloadJob {
    pub url: String,
    pub destination: PathBuf,
    pub worker_count: usize,
    pub total_bytes: Option<u64>,
    pub bytes_received: Arc<AtomicU64>,
    pub part_files: Vec<PathBuf>,
    pub status: JobStatus,
    pub referer: Option<String>,
}

impl DownloadJob {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>, worker_count: usize) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            worker_count: worker_count.max(1),
            total_bytes: None,
            bytes_received: Arc::new(AtomicU64::new(0)),
            part_files: Vec::new(),
            status: JobStatus::Pending,
            referer: None,
        }
    }

    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        self.referer = referer;
        self
    }

    pub fn received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// `<目标文件名>.<后缀>`，与目标文件放在同一目录
    pub fn sibling_path(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.destination.as_os_str());
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }

    pub fn part_path(&self, index: usize) -> PathBuf {
        self.sibling_path(&format!("{}{}", constants::download::PART_FILE_SUFFIX, index))
    }
}

/// 要下载的来源：选中的清晰度地址 + 来源类型 + 可选的 Referer
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub url: String,
    pub kind: SourceKind,
    pub referer: Option<String>,
}

/// 决定一个来源走分段下载还是交给外部下载器。
#[derive(Clone)]
pub struct Downloader {
    ranged: RangedDownloader,
    external: ExternalDownloader,
    config: Arc<AppConfig>,
}

impl Downloader {
    pub fn new(http_client: Arc<RobustClient>, config: Arc<AppConfig>) -> Self {
        Self {
            ranged: RangedDownloader::new(http_client.clone(), config.clone()),
            external: ExternalDownloader::new(http_client, config.clone()),
            config,
        }
    }

    /// 自适应播放列表与部分嵌入站点无法按范围请求
    pub fn is_delegated(&self, target: &DownloadTarget) -> bool {
        if target.kind == SourceKind::AdaptivePlaylist || is_streaming_url(&target.url) {
            return true;
        }
        Url::parse(&target.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| host_matches(h, &self.config.delegated_hosts)))
            .unwrap_or(false)
    }

    /// 估算大小用于批量下载的总进度；估不出来时返回 `None`。
    pub async fn estimate_size(&self, target: &DownloadTarget) -> Option<u64> {
        if self.is_delegated(target) {
            return Some(self.external.estimate_size(target).await);
        }
        self.ranged
            .probe_size(&target.url, target.referer.as_deref())
            .await
            .ok()
            .flatten()
    }

    pub async fn download(
        &self,
        target: &DownloadTarget,
        destination: &Path,
        worker_count: usize,
        pbar: &ProgressBar,
    ) -> AppResult<DownloadJob> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut job = DownloadJob::new(target.url.clone(), destination, worker_count)
            .with_referer(target.referer.clone());

        if self.is_delegated(target) {
            info!("'{}' 交给外部下载器处理", target.url);
            self.external.download(&mut job, target, pbar).await?;
            return Ok(job);
        }

        match self.ranged.probe_size(&target.url, target.referer.as_deref()).await? {
            Some(total) => {
                job.total_bytes = Some(total);
                self.ranged.download(&mut job, pbar).await?;
            }
            None => {
                debug!("无法获取 '{}' 的大小", target.url);
                job.status = JobStatus::Failed;
                return Err(AppError::SizeUnknown(target.url.clone()));
            }
        }
        Ok(job)
    }
}

pub fn is_streaming_url(url: &str) -> bool {
    Url::parse(url).is_ok_and(|u| {
        let path = u.path().to_ascii_lowercase();
        path.ends_with(".m3u8") || path.ends_with(".mpd")
    })
}
