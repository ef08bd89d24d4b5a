// src/downloader/mod.rs

mod batch;
mod external;
mod job;
mod ranged;
mod retry;

pub use batch::{BatchDownloader, episode_destination};
pub use external::{ExternalDownloader, parse_percent};
pub use job::{DownloadJob, DownloadTarget, Downloader, JobStatus, is_streaming_url};
pub use ranged::{
    RangedDownloader, clamp_workers, combine_parts, parse_content_range_total, part_sizes,
    partition_ranges,
};
pub use retry::RetryPolicy;

use crate::{models::DownloadStatus, symbols, ui};
use colored::*;
use itertools::Itertools;
use log::info;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Ledger {
    stats: DownloadStats,
    /// (剧集名, 原因)
    skipped: Vec<(String, String)>,
    failed: Vec<(String, String)>,
}

/// 记录一批下载的成功、跳过与失败，结束时按原因分组输出报告。
#[derive(Clone, Default)]
pub struct DownloadManager {
    ledger: Arc<Mutex<Ledger>>,
}

impl DownloadManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn start_batch(&self, total: usize) {
        info!("开始新一批下载任务，总数: {}", total);
        *self.ledger() = Ledger {
            stats: DownloadStats {
                total,
                ..Default::default()
            },
            ..Default::default()
        };
    }

    pub fn record_success(&self) {
        self.ledger().stats.success += 1;
    }

    pub fn record_skip(&self, name: &str, reason: &str) {
        info!("跳过 '{}'，原因: {}", name, reason);
        let mut ledger = self.ledger();
        ledger.stats.skipped += 1;
        ledger.skipped.push((name.to_string(), reason.to_string()));
    }

    pub fn record_failure(&self, name: &str, status: DownloadStatus) {
        log::error!("'{}' 下载失败，状态: {:?}", name, status);
        let (_, _, reason) = status.get_display_info();
        let mut ledger = self.ledger();
        ledger.stats.failed += 1;
        ledger.failed.push((name.to_string(), reason.to_string()));
    }

    pub fn get_stats(&self) -> DownloadStats {
        self.ledger().stats.clone()
    }

    pub fn did_all_succeed(&self) -> bool {
        self.ledger().stats.failed == 0
    }

    pub fn print_report(&self) {
        let ledger = self.ledger();
        let stats = &ledger.stats;
        info!(
            "下载报告: Total={}, Success={}, Skipped={}, Failed={}",
            stats.total, stats.success, stats.skipped, stats.failed
        );

        if !ledger.skipped.is_empty() || !ledger.failed.is_empty() {
            ui::print_sub_header("下载详情报告");
            if !ledger.skipped.is_empty() {
                println!("\n{} 跳过 ({}集):", *symbols::INFO, stats.skipped);
                print_grouped(&ledger.skipped, |s| s.cyan());
            }
            if !ledger.failed.is_empty() {
                println!("\n{} 失败 ({}集):", *symbols::ERROR, stats.failed);
                print_grouped(&ledger.failed, |s| s.red());
            }
        }
        ui::print_sub_header("任务总结");
        if stats.total > 0 && stats.failed == 0 {
            println!(
                "{} 全部 {} 集已完成 ({} 集已存在)。",
                *symbols::OK,
                stats.total,
                stats.skipped
            );
        } else {
            println!(
                "{} | {} | {}",
                format!("成功: {}", stats.success).green(),
                format!("失败: {}", stats.failed).red(),
                format!("跳过: {}", stats.skipped).yellow()
            );
        }
    }
}

fn print_grouped(items: &[(String, String)], color_fn: fn(ColoredString) -> ColoredString) {
    let grouped = items
        .iter()
        .map(|(name, reason)| (reason, name))
        .into_group_map();
    for reason in grouped.keys().sorted() {
        println!("  - {}", color_fn(format!("原因: {}", reason).into()));
        for name in grouped[reason].iter().sorted() {
            println!("    - {}", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_counts_and_resets() {
        let manager = DownloadManager::new();
        manager.start_batch(3);
        manager.record_success();
        manager.record_skip("A - 第 1 集", "文件已存在");
        manager.record_failure("A - 第 2 集", DownloadStatus::PartialError);
        assert_eq!(
            manager.get_stats(),
            DownloadStats {
                total: 3,
                success: 1,
                skipped: 1,
                failed: 1
            }
        );
        assert!(!manager.did_all_succeed());

        manager.start_batch(1);
        assert!(manager.did_all_succeed());
        assert_eq!(manager.get_stats().total, 1);
    }
}
