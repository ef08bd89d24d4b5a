// src/downloader/batch.rs

use super::{
    DownloadManager,
    job::{DownloadTarget, Downloader},
};
use crate::{
    config::AppConfig,
    constants,
    error::*,
    extractor::StreamResolver,
    models::{DownloadStatus, EpisodeRef, StreamDescriptor},
    quality::QualitySelector,
    ui, utils,
};
use futures::{StreamExt, stream};
use indicatif::{HumanBytes, ProgressBar};
use log::{debug, error, info};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;

/// `<输出目录>/<系列名>/Episode <n>.<扩展名>`
pub fn episode_destination(output_dir: &Path, episode: &EpisodeRef, url: &str) -> AppResult<PathBuf> {
    let relative = Path::new(&utils::sanitize_filename(&episode.series.title)).join(format!(
        "Episode {}.{}",
        utils::sanitize_filename(&episode.number),
        utils::extension_from_url(url)
    ));
    utils::secure_join_path(output_dir, &relative)
}

/// 干跑阶段确定的一项待下载任务
struct PlannedDownload {
    name: String,
    target: DownloadTarget,
    destination: PathBuf,
    estimate: Option<u64>,
}

/// 单集下载与按范围批量下载。
#[derive(Clone)]
pub struct BatchDownloader {
    downloader: Downloader,
    resolver: Arc<dyn StreamResolver>,
    selector: Arc<QualitySelector>,
    config: Arc<AppConfig>,
    manager: DownloadManager,
    cancellation: CancellationToken,
}

impl BatchDownloader {
    pub fn new(
        downloader: Downloader,
        resolver: Arc<dyn StreamResolver>,
        selector: Arc<QualitySelector>,
        config: Arc<AppConfig>,
        manager: DownloadManager,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            downloader,
            resolver,
            selector,
            config,
            manager,
            cancellation,
        }
    }

    pub fn manager(&self) -> &DownloadManager {
        &self.manager
    }

    /// 下载已解析好的一集，返回本地文件路径。已存在的文件直接复用。
    pub async fn download_resolved(
        &self,
        episode: &EpisodeRef,
        descriptor: &StreamDescriptor,
    ) -> AppResult<PathBuf> {
        let variant = self.selector.select(descriptor)?;
        let target = DownloadTarget {
            url: variant.url.clone(),
            kind: descriptor.kind,
            referer: descriptor.referer.clone(),
        };
        let destination = episode_destination(&self.config.output_dir, episode, &target.url)?;
        let name = episode.display_name();
        self.manager.start_batch(1);
        if destination.exists() {
            self.manager.record_skip(&name, "文件已存在");
            ui::info(&format!("'{}' 已存在，直接使用本地文件", destination.display()));
            return Ok(destination);
        }

        let estimate = self.downloader.estimate_size(&target).await;
        let pbar = match estimate {
            Some(total) => ui::new_bytes_progress_bar(total, "下载"),
            None => ui::new_spinner("下载"),
        };
        pbar.set_message(utils::truncate_text(&name, constants::FILENAME_TRUNCATE_LENGTH));
        let result = self
            .downloader
            .download(&target, &destination, self.config.workers, &pbar)
            .await;
        pbar.finish_and_clear();
        match result {
            Ok(_) => {
                self.manager.record_success();
                ui::ok(&format!("{} 下载完成", name));
                Ok(destination)
            }
            Err(e) => {
                self.manager.record_failure(&name, DownloadStatus::from(&e));
                Err(e)
            }
        }
    }

    /// 批量下载：先干跑找出缺失且可解析的集并汇总大小，再在并发上限内下载。
    pub async fn run(&self, episodes: &[EpisodeRef]) -> AppResult<()> {
        self.manager.start_batch(episodes.len());
        if episodes.is_empty() {
            return Ok(());
        }

        ui::info(&format!("正在检查 {} 集...", episodes.len()));
        let planned: Vec<PlannedDownload> = stream::iter(episodes.iter().cloned())
            .map(|episode| async move { self.plan(&episode).await })
            .buffered(self.config.batch_concurrency)
            .filter_map(|p| async move { p })
            .collect()
            .await;

        if self.cancellation.is_cancelled() {
            return Err(AppError::UserInterrupt);
        }
        if planned.is_empty() {
            ui::info("没有需要下载的剧集。");
            self.manager.print_report();
            return Ok(());
        }

        let total: u64 = planned.iter().filter_map(|p| p.estimate).sum();
        ui::plain("");
        ui::info(&format!(
            "开始下载 {} 集 (估算总大小: {}) (并发数: {}, 每集 {} 个连接)...",
            planned.len(),
            HumanBytes(total),
            self.config.batch_concurrency,
            self.config.workers
        ));
        let pbar = ui::new_bytes_progress_bar(total, "下载");
        let semaphore = Arc::new(Semaphore::new(self.config.batch_concurrency));

        let mut tasks = JoinSet::new();
        for item in planned {
            let this = self.clone();
            let semaphore = semaphore.clone();
            let pbar = pbar.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if this.cancellation.is_cancelled() {
                    return;
                }
                this.download_planned(item, &pbar).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("批量下载任务异常结束: {}", e);
            }
        }
        pbar.finish_and_clear();

        if self.cancellation.is_cancelled() {
            return Err(AppError::UserInterrupt);
        }
        self.manager.print_report();
        Ok(())
    }

    async fn plan(&self, episode: &EpisodeRef) -> Option<PlannedDownload> {
        if self.cancellation.is_cancelled() {
            return None;
        }
        let name = episode.display_name();
        let planned = async {
            let descriptor = self.resolver.resolve(episode).await?;
            let variant = self.selector.select(&descriptor)?;
            let target = DownloadTarget {
                url: variant.url.clone(),
                kind: descriptor.kind,
                referer: descriptor.referer.clone(),
            };
            let destination = episode_destination(&self.config.output_dir, episode, &target.url)?;
            Ok::<_, AppError>((target, destination))
        }
        .await;

        match planned {
            Ok((_, destination)) if destination.exists() => {
                self.manager.record_skip(&name, "文件已存在");
                None
            }
            Ok((target, destination)) => {
                let estimate = self.downloader.estimate_size(&target).await;
                debug!("{} 估算大小 {:?}", name, estimate);
                Some(PlannedDownload {
                    name,
                    target,
                    destination,
                    estimate,
                })
            }
            Err(e) => {
                error!("{} 解析失败: {}", name, e);
                ui::warn(&format!("{} 解析失败，已跳过: {}", name, e));
                self.manager.record_failure(&name, DownloadStatus::from(&e));
                None
            }
        }
    }

    async fn download_planned(&self, item: PlannedDownload, pbar: &ProgressBar) {
        info!("开始下载 {} -> {}", item.name, item.destination.display());
        let result = self
            .downloader
            .download(&item.target, &item.destination, self.config.workers, pbar)
            .await;

        match result {
            Ok(_) => {
                self.manager.record_success();
                let (symbol, _, _) = DownloadStatus::Success.get_display_info();
                pbar.println(format!("{} {}", symbol, item.name));
            }
            Err(e) => {
                let status = DownloadStatus::from(&e);
                self.manager.record_failure(&item.name, status);
                let (symbol, color_fn, default_msg) = status.get_display_info();
                pbar.println(format!(
                    "{} {} {}",
                    symbol,
                    item.name,
                    color_fn(format!("失败: {} (详情: {})", default_msg, e).into())
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EpisodeSource, SeriesRef};

    #[test]
    fn test_episode_destination_layout() {
        let dir = tempfile::tempdir().unwrap();
        let episode = EpisodeRef {
            number: "5".into(),
            series: Arc::new(SeriesRef {
                key: "show".into(),
                title: "Show: Part/2".into(),
                mode: None,
                skip_id: None,
            }),
            source: EpisodeSource::Page("https://site.example/show/ep-5".into()),
            duration_hint: None,
        };

        let path = episode_destination(dir.path(), &episode, "https://cdn.example/v/ep5.MKV?t=1").unwrap();
        let base = dunce::canonicalize(dir.path()).unwrap();
        assert_eq!(path, base.join("Show Part 2").join("Episode 5.mkv"));

        let path = episode_destination(dir.path(), &episode, "https://cdn.example/hls/master.m3u8").unwrap();
        assert_eq!(path.file_name().unwrap(), "Episode 5.mp4");
    }
}
