// src/config.rs

pub mod loader;

use self::loader::{load_or_create_external_config, resolve_player_command};
use crate::{cli::Cli, constants, error::AppResult};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkConfig {
    pub connect_timeout_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DownloadConfig {
    pub output_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub batch_concurrency: Option<usize>,
    pub retry_attempts: Option<u32>,
    pub retry_backoff_step_ms: Option<u64>,
    pub external_command: Option<String>,
    pub external_args: Option<Vec<String>>,
    pub delegated_hosts: Option<Vec<String>>,
    pub playlist_size_estimate_mb: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlayerConfig {
    pub command: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    pub resume_threshold_secs: Option<f64>,
    pub resume_tolerance_secs: Option<f64>,
    pub duration_floor_secs: Option<f64>,
    pub first_frame_attempts: Option<u32>,
    pub first_frame_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourcesConfig {
    pub embed_domains: Option<Vec<String>>,
    pub opaque_api_base: Option<String>,
    pub opaque_link_base: Option<String>,
    pub opaque_referer: Option<String>,
    pub opaque_plain_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SkipTimesConfig {
    /// 例如 "https://api.aniskip.com/v2/skip-times/{id}/{episode}?types=op&types=ed&episodeLength=0"
    pub api_template: Option<String>,
    pub lookup_timeout_ms: Option<u64>,
    #[serde(default)]
    pub chapter_marker_providers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExternalConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub skip_times: SkipTimesConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

impl ExternalConfig {
    /// 首次运行时写入磁盘的默认配置，把所有可调项都显式列出来方便用户修改。
    pub(crate) fn default_app_config() -> Self {
        Self {
            network: NetworkConfig {
                connect_timeout_secs: Some(10),
                timeout_secs: Some(30),
                max_retries: Some(3),
                user_agent: None,
            },
            download: DownloadConfig {
                output_dir: None,
                workers: Some(constants::download::DEFAULT_WORKERS),
                batch_concurrency: Some(constants::download::DEFAULT_BATCH_CONCURRENCY),
                retry_attempts: Some(constants::download::RETRY_ATTEMPTS),
                retry_backoff_step_ms: Some(constants::download::RETRY_BACKOFF_STEP_MS),
                external_command: Some(constants::download::EXTERNAL_DOWNLOADER.into()),
                external_args: None,
                delegated_hosts: Some(to_strings(constants::sources::DELEGATED_HOSTS)),
                playlist_size_estimate_mb: Some(constants::download::PLAYLIST_SIZE_ESTIMATE_MB),
            },
            player: PlayerConfig {
                command: Some(constants::player::DEFAULT_COMMAND.into()),
                extra_args: vec![],
                resume_threshold_secs: Some(constants::player::RESUME_THRESHOLD_SECS),
                resume_tolerance_secs: Some(constants::player::RESUME_TOLERANCE_SECS),
                duration_floor_secs: Some(constants::player::DURATION_FLOOR_SECS),
                first_frame_attempts: Some(constants::player::FIRST_FRAME_ATTEMPTS),
                first_frame_interval_ms: Some(constants::player::FIRST_FRAME_INTERVAL_MS),
            },
            sources: SourcesConfig {
                embed_domains: Some(to_strings(constants::sources::EMBED_DOMAINS)),
                opaque_api_base: Some(constants::sources::OPAQUE_API_BASE.into()),
                opaque_link_base: Some(constants::sources::OPAQUE_LINK_BASE.into()),
                opaque_referer: Some(constants::sources::OPAQUE_REFERER.into()),
                opaque_plain_template: Some(constants::sources::OPAQUE_PLAIN_TEMPLATE.into()),
            },
            skip_times: SkipTimesConfig {
                api_template: None,
                lookup_timeout_ms: Some(constants::player::SKIP_LOOKUP_TIMEOUT_MS),
                chapter_marker_providers: vec![],
            },
            store_path: None,
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// 合并命令行参数、环境变量与配置文件后的最终配置，运行期间只读。
#[derive(Debug, Clone)]
pub struct AppConfig {
    // 网络
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub max_retries: u32,
    // 下载
    pub output_dir: PathBuf,
    pub workers: usize,
    pub batch_concurrency: usize,
    pub retry_attempts: u32,
    pub retry_backoff_step: Duration,
    pub external_downloader: String,
    pub external_args: Vec<String>,
    pub delegated_hosts: Vec<String>,
    pub playlist_size_estimate: u64,
    // 播放
    pub player_command: String,
    pub player_args: Vec<String>,
    pub resume_threshold: f64,
    pub resume_tolerance: f64,
    pub duration_floor: f64,
    pub first_frame_attempts: u32,
    pub first_frame_interval: Duration,
    pub command_timeout: Duration,
    // 来源
    pub embed_domains: Vec<String>,
    pub opaque_api_base: String,
    pub opaque_link_base: String,
    pub opaque_referer: String,
    pub opaque_plain_template: String,
    // 片头片尾
    pub skip_api_template: Option<String>,
    pub skip_lookup_timeout: Duration,
    pub chapter_marker_providers: Vec<String>,
    // 观看进度
    pub store_path: PathBuf,
}

impl AppConfig {
    pub fn new(args: &Cli) -> AppResult<Self> {
        let external_config = load_or_create_external_config()?;
        let mut config = Self::from_external(external_config.clone());

        let (player, source) = resolve_player_command(args.player.as_deref(), &external_config);
        log::debug!("播放器命令 '{}' 来自 {}", player, source);
        config.player_command = player;
        config.player_args.extend(args.player_args.iter().cloned());

        if let Some(output) = &args.output {
            config.output_dir = output.clone();
        }
        if let Some(workers) = args.workers {
            config.workers = workers.max(1);
        }
        if let Some(jobs) = args.jobs {
            config.batch_concurrency = jobs.max(1);
        }
        if config.store_path.as_os_str().is_empty() {
            config.store_path = loader::default_store_path()?;
        }
        Ok(config)
    }

    /// 只根据配置文件内容构建，未设置的项回落到内置默认值。
    pub fn from_external(external: ExternalConfig) -> Self {
        let ExternalConfig {
            network,
            download,
            player,
            sources,
            skip_times,
            store_path,
        } = external;

        Self {
            user_agent: network
                .user_agent
                .unwrap_or_else(|| constants::USER_AGENT.into()),
            connect_timeout: Duration::from_secs(network.connect_timeout_secs.unwrap_or(10)),
            timeout: Duration::from_secs(network.timeout_secs.unwrap_or(30)),
            max_retries: network.max_retries.unwrap_or(3),

            output_dir: download
                .output_dir
                .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_SAVE_DIR)),
            workers: download
                .workers
                .unwrap_or(constants::download::DEFAULT_WORKERS)
                .max(1),
            batch_concurrency: download
                .batch_concurrency
                .unwrap_or(constants::download::DEFAULT_BATCH_CONCURRENCY)
                .max(1),
            retry_attempts: download
                .retry_attempts
                .unwrap_or(constants::download::RETRY_ATTEMPTS),
            retry_backoff_step: Duration::from_millis(
                download
                    .retry_backoff_step_ms
                    .unwrap_or(constants::download::RETRY_BACKOFF_STEP_MS),
            ),
            external_downloader: download
                .external_command
                .unwrap_or_else(|| constants::download::EXTERNAL_DOWNLOADER.into()),
            external_args: download.external_args.unwrap_or_default(),
            delegated_hosts: download
                .delegated_hosts
                .unwrap_or_else(|| to_strings(constants::sources::DELEGATED_HOSTS)),
            playlist_size_estimate: download
                .playlist_size_estimate_mb
                .unwrap_or(constants::download::PLAYLIST_SIZE_ESTIMATE_MB)
                * 1024
                * 1024,

            player_command: player
                .command
                .unwrap_or_else(|| constants::player::DEFAULT_COMMAND.into()),
            player_args: player.extra_args,
            resume_threshold: player
                .resume_threshold_secs
                .unwrap_or(constants::player::RESUME_THRESHOLD_SECS),
            resume_tolerance: player
                .resume_tolerance_secs
                .unwrap_or(constants::player::RESUME_TOLERANCE_SECS),
            duration_floor: player
                .duration_floor_secs
                .unwrap_or(constants::player::DURATION_FLOOR_SECS),
            first_frame_attempts: player
                .first_frame_attempts
                .unwrap_or(constants::player::FIRST_FRAME_ATTEMPTS)
                .max(1),
            first_frame_interval: Duration::from_millis(
                player
                    .first_frame_interval_ms
                    .unwrap_or(constants::player::FIRST_FRAME_INTERVAL_MS),
            ),
            command_timeout: Duration::from_millis(constants::player::COMMAND_TIMEOUT_MS),

            embed_domains: sources
                .embed_domains
                .unwrap_or_else(|| to_strings(constants::sources::EMBED_DOMAINS)),
            opaque_api_base: sources
                .opaque_api_base
                .unwrap_or_else(|| constants::sources::OPAQUE_API_BASE.into()),
            opaque_link_base: sources
                .opaque_link_base
                .unwrap_or_else(|| constants::sources::OPAQUE_LINK_BASE.into()),
            opaque_referer: sources
                .opaque_referer
                .unwrap_or_else(|| constants::sources::OPAQUE_REFERER.into()),
            opaque_plain_template: sources
                .opaque_plain_template
                .unwrap_or_else(|| constants::sources::OPAQUE_PLAIN_TEMPLATE.into()),

            skip_api_template: skip_times.api_template,
            skip_lookup_timeout: Duration::from_millis(
                skip_times
                    .lookup_timeout_ms
                    .unwrap_or(constants::player::SKIP_LOOKUP_TIMEOUT_MS),
            ),
            chapter_marker_providers: skip_times.chapter_marker_providers,

            store_path: store_path.unwrap_or_default(),
        }
    }
}

#[cfg(any(test, feature = "testing"))]
impl Default for AppConfig {
    fn default() -> Self {
        let mut config = Self::from_external(ExternalConfig::default());
        config.user_agent = "test-agent/1.0".to_string();
        config.connect_timeout = Duration::from_secs(5);
        config.timeout = Duration::from_secs(15);
        config.retry_backoff_step = Duration::from_millis(10);
        config.store_path = std::env::temp_dir().join("ep-dl-test-progress.json");
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_sections_fall_back_to_defaults() {
        let external: ExternalConfig =
            serde_json::from_str(r#"{"download": {"workers": 8}}"#).unwrap();
        let config = AppConfig::from_external(external);
        assert_eq!(config.workers, 8);
        assert_eq!(config.batch_concurrency, constants::download::DEFAULT_BATCH_CONCURRENCY);
        assert_eq!(config.player_command, "mpv");
        assert_eq!(config.playlist_size_estimate, 350 * 1024 * 1024);
        assert!(config.skip_api_template.is_none());
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        let external: ExternalConfig =
            serde_json::from_str(r#"{"download": {"workers": 0, "batch_concurrency": 0}}"#).unwrap();
        let config = AppConfig::from_external(external);
        assert_eq!(config.workers, 1);
        assert_eq!(config.batch_concurrency, 1);
    }

    #[test]
    fn test_default_config_round_trips_through_json() {
        let json = serde_json::to_string_pretty(&ExternalConfig::default_app_config()).unwrap();
        let parsed: ExternalConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.player.command.as_deref(), Some("mpv"));
    }
}
