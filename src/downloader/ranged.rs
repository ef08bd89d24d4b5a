// src/downloader/ranged.rs

use super::{
    job::{DownloadJob, JobStatus},
    retry::RetryPolicy,
};
use crate::{client::RobustClient, config::AppConfig, error::*};
use futures::StreamExt;
use indicatif::ProgressBar;
use log::{debug, error, info, warn};
use reqwest::{StatusCode, header};
use std::{
    ops::Range,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
    task::JoinSet,
};

/// 把 `[0, total)` 切成 `workers` 段连续区间，余数归最后一段。
/// 调用前 `workers` 已被限制在 `[1, total]`。
pub fn partition_ranges(total: u64, workers: usize) -> Vec<Range<u64>> {
    let workers = clamp_workers(total, workers) as u64;
    let chunk = total / workers;
    (0..workers)
        .map(|i| {
            let start = i * chunk;
            let end = if i == workers - 1 { total } else { start + chunk };
            start..end
        })
        .collect()
}

pub fn clamp_workers(total: u64, workers: usize) -> usize {
    let upper = total.clamp(1, usize::MAX as u64) as usize;
    workers.clamp(1, upper)
}

/// 从 `Content-Range: bytes 0-0/12345` 中取出总大小
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    value
        .rsplit_once('/')
        .and_then(|(_, total)| total.trim().parse().ok())
}

#[derive(Clone)]
pub struct RangedDownloader {
    http_client: Arc<RobustClient>,
    retry: RetryPolicy,
}

impl RangedDownloader {
    pub fn new(http_client: Arc<RobustClient>, config: Arc<AppConfig>) -> Self {
        Self {
            http_client,
            retry: RetryPolicy::new(config.retry_attempts, config.retry_backoff_step),
        }
    }

    /// 先发 HEAD；被拒绝或拿不到长度时改用 1 字节的范围请求。
    pub async fn probe_size(&self, url: &str, referer: Option<&str>) -> AppResult<Option<u64>> {
        let client = &self.http_client.plain;
        let mut head = client.head(url);
        if let Some(referer) = referer {
            head = head.header(header::REFERER, referer);
        }
        match head.send().await {
            Ok(res) if res.status().is_success() => {
                if let Some(len) = header_u64(&res, header::CONTENT_LENGTH).filter(|l| *l > 0) {
                    debug!("HEAD {} 得到大小 {}", url, len);
                    return Ok(Some(len));
                }
            }
            Ok(res) if res.status() == StatusCode::NOT_FOUND => {
                return Err(AppError::NotFound(url.to_string()));
            }
            Ok(res) => debug!("HEAD {} 被拒绝: {}", url, res.status()),
            Err(e) => debug!("HEAD {} 失败: {}", url, e),
        }

        let mut probe = client.get(url).header(header::RANGE, "bytes=0-0");
        if let Some(referer) = referer {
            probe = probe.header(header::REFERER, referer);
        }
        let probe = &probe;
        let res = self
            .retry
            .run("大小探测", move |_| async move {
                let request = probe
                    .try_clone()
                    .ok_or_else(|| AppError::SizeUnknown(url.to_string()))?;
                Ok::<_, AppError>(request.send().await?)
            })
            .await?;
        let total = match res.status() {
            StatusCode::PARTIAL_CONTENT => res
                .headers()
                .get(header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total),
            StatusCode::NOT_FOUND => return Err(AppError::NotFound(url.to_string())),
            s if s.is_success() => header_u64(&res, header::CONTENT_LENGTH),
            s => {
                warn!("范围探测 {} 返回 {}", url, s);
                None
            }
        };
        debug!("范围探测 {} 得到大小 {:?}", url, total);
        Ok(total.filter(|t| *t > 0))
    }

    /// 完整流程：并发下载所有分段，再按顺序合并。
    pub async fn download(&self, job: &mut DownloadJob, pbar: &ProgressBar) -> AppResult<()> {
        let result = async {
            self.fetch_parts(job, pbar).await?;
            combine_parts(job).await
        }
        .await;
        if result.is_err() {
            job.status = JobStatus::Failed;
            remove_files(&job.part_files).await;
        }
        result
    }

    /// 每个 worker 下载一段到自己的分段文件。任一 worker 失败则整个任务失败。
    pub async fn fetch_parts(&self, job: &mut DownloadJob, pbar: &ProgressBar) -> AppResult<()> {
        let total = job
            .total_bytes
            .ok_or_else(|| AppError::SizeUnknown(job.url.clone()))?;
        job.worker_count = clamp_workers(total, job.worker_count);
        let ranges = partition_ranges(total, job.worker_count);
        job.part_files = (0..ranges.len()).map(|i| job.part_path(i)).collect();
        job.status = JobStatus::Downloading;
        info!(
            "分段下载 '{}': {} 字节, {} 个 worker",
            job.destination.display(),
            total,
            ranges.len()
        );

        let mut workers = JoinSet::new();
        for (index, range) in ranges.into_iter().enumerate() {
            let worker = RangeWorker {
                index,
                range,
                url: job.url.clone(),
                referer: job.referer.clone(),
                part: job.part_files[index].clone(),
                client: self.http_client.plain.clone(),
                retry: self.retry,
                counter: job.bytes_received.clone(),
                pbar: pbar.clone(),
            };
            workers.spawn(worker.run());
        }

        while let Some(joined) = workers.join_next().await {
            let outcome = joined.map_err(|e| AppError::PartialDownload {
                index: usize::MAX,
                reason: e.to_string(),
            })?;
            if let Err(e) = outcome {
                error!("'{}' 的分段下载失败: {}", job.destination.display(), e);
                workers.abort_all();
                job.status = JobStatus::Failed;
                return Err(e);
            }
        }
        Ok(())
    }
}

pub async fn combine_parts(job: &mut DownloadJob) -> AppResult<()> {
    let total = job
        .total_bytes
        .ok_or_else(|| AppError::SizeUnknown(job.url.clone()))?;
    job.status = JobStatus::Combining;

    let mut sum = 0;
    for part in &job.part_files {
        sum += fs::metadata(part).await?.len();
    }
    if sum != total {
        return Err(AppError::PartialDownload {
            index: job.part_files.len(),
            reason: format!("分段总大小 {} 与预期 {} 不符", sum, total),
        });
    }

    let staging = job.sibling_path("combining");
    let mut output = File::create(&staging).await?;
    for part in &job.part_files {
        let mut input = File::open(part).await?;
        tokio::io::copy(&mut input, &mut output).await?;
    }
    output.flush().await?;
    output.sync_all().await?;
    drop(output);

    let combined = fs::metadata(&staging).await?.len();
    if combined != total {
        let _ = fs::remove_file(&staging).await;
        return Err(AppError::PartialDownload {
            index: job.part_files.len(),
            reason: format!("合并后大小 {} 与预期 {} 不符", combined, total),
        });
    }
    fs::rename(&staging, &job.destination).await?;
    remove_files(&job.part_files).await;
    job.status = JobStatus::Complete;
    debug!("已合并 {} 个分段到 '{}'", job.part_files.len(), job.destination.display());
    Ok(())
}

async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("删除分段文件 '{}' 失败: {}", path.display(), e);
        }
    }
}

fn header_u64(res: &reqwest::Response, name: header::HeaderName) -> Option<u64> {
    res.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

struct RangeWorker {
    index: usize,
    range: Range<u64>,
    url: String,
    referer: Option<String>,
    part: PathBuf,
    client: reqwest::Client,
    retry: RetryPolicy,
    counter: Arc<AtomicU64>,
    pbar: ProgressBar,
}

impl RangeWorker {
    async fn run(self) -> AppResult<()> {
        // 本段已计入共享计数器的字节数；重试时只补计超出部分
        let counted = AtomicU64::new(0);
        let label = format!("分段 {}", self.index);
        let (this, counted) = (&self, &counted);
        self.retry
            .run(&label, move |_| this.attempt(counted))
            .await
            .map_err(|e| match e {
                e @ AppError::PartialDownload { .. } => e,
                e => AppError::PartialDownload {
                    index: self.index,
                    reason: e.to_string(),
                },
            })
    }

    async fn attempt(&self, counted: &AtomicU64) -> AppResult<()> {
        let expected = self.range.end - self.range.start;
        let mut request = self.client.get(&self.url).header(
            header::RANGE,
            format!("bytes={}-{}", self.range.start, self.range.end - 1),
        );
        if let Some(referer) = &self.referer {
            request = request.header(header::REFERER, referer);
        }
        let res = request.send().await?.error_for_status()?;
        let whole_file = res.status() == StatusCode::OK && self.range.start == 0;
        if res.status() != StatusCode::PARTIAL_CONTENT && !whole_file {
            return Err(AppError::PartialDownload {
                index: self.index,
                reason: format!("服务器不支持范围请求 ({})", res.status()),
            });
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.part)
            .await?;
        let mut written = 0u64;
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let take = chunk.len().min((expected - written) as usize);
            file.write_all(&chunk[..take]).await?;
            written += take as u64;
            self.account(written, counted);
            if written >= expected {
                break;
            }
        }
        file.flush().await?;

        if written != expected {
            return Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("分段 {} 只收到 {}/{} 字节", self.index, written, expected),
            )));
        }
        Ok(())
    }

    fn account(&self, written: u64, counted: &AtomicU64) {
        let before = counted.fetch_max(written, Ordering::Relaxed);
        if written > before {
            let delta = written - before;
            self.counter.fetch_add(delta, Ordering::Relaxed);
            self.pbar.inc(delta);
        }
    }
}

pub fn part_sizes(paths: &[PathBuf]) -> u64 {
    paths
        .iter()
        .filter_map(|p| p.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_last_range_absorbs_remainder() {
        let ranges = partition_ranges(10, 3);
        assert_eq!(ranges, vec![0..3, 3..6, 6..10]);
        assert_eq!(ranges.iter().map(|r| r.end - r.start).sum::<u64>(), 10);
    }

    #[test]
    fn test_partition_even_split() {
        assert_eq!(partition_ranges(100, 4), vec![0..25, 25..50, 50..75, 75..100]);
    }

    #[test]
    fn test_workers_clamped_to_size() {
        assert_eq!(clamp_workers(2, 8), 2);
        assert_eq!(clamp_workers(100, 0), 1);
        assert_eq!(partition_ranges(2, 8).len(), 2);
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 0-0/104857600"), Some(104857600));
        assert_eq!(parse_content_range_total("bytes 0-0/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }
}
