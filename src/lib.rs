// src/lib.rs

pub mod cli;
pub mod client;
pub mod config;
pub mod constants;
pub mod downloader;
pub mod episodes;
pub mod error;
pub mod extractor;
pub mod models;
pub mod player;
pub mod presence;
pub mod quality;
pub mod skiptimes;
pub mod store;
pub mod symbols;
pub mod ui;
pub mod utils;
pub mod workflows;

use crate::{
    cli::Cli,
    client::RobustClient,
    config::AppConfig,
    downloader::{BatchDownloader, DownloadManager, Downloader},
    episodes::{EpisodeProvider, ListEpisodes, OpaqueEpisodes, TemplateEpisodes},
    error::{AppError, AppResult},
    extractor::{SourceAdapter, StreamResolver},
    models::{EpisodeRef, EpisodeSource, SeriesRef},
    player::TokioClock,
    presence::LogPresence,
    quality::{QualityPolicy, QualityPrompt, QualitySelector, TerminalPrompt},
    skiptimes::{HttpSkipTimes, NoSkipTimes, SkipTimeSource},
    store::JsonFileStore,
    workflows::{FrontEnd, Orchestrator, PlaybackMode, PlaybackOptions, PlaybackServices, ResumePolicy},
};
use anyhow::anyhow;
use itertools::Itertools;
use log::{debug, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// 一次运行内共享的状态与工具
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub http_client: Arc<RobustClient>,
    pub manager: DownloadManager,
    pub resolver: Arc<dyn StreamResolver>,
    pub selector: Arc<QualitySelector>,
    pub cancellation: CancellationToken,
    pub non_interactive: bool,
}

impl AppContext {
    pub fn new(
        config: Arc<AppConfig>,
        policy: QualityPolicy,
        non_interactive: bool,
        cancellation: CancellationToken,
    ) -> AppResult<Self> {
        let http_client = Arc::new(RobustClient::new(config.clone())?);
        let resolver: Arc<dyn StreamResolver> =
            Arc::new(SourceAdapter::new(http_client.clone(), config.clone()));
        let prompt: Option<Box<dyn QualityPrompt>> = if non_interactive {
            None
        } else {
            Some(Box::new(TerminalPrompt))
        };
        Ok(Self {
            config,
            http_client,
            manager: DownloadManager::new(),
            resolver,
            selector: Arc::new(QualitySelector::new(policy, prompt)),
            cancellation,
            non_interactive,
        })
    }

    pub fn batch_downloader(&self) -> BatchDownloader {
        BatchDownloader::new(
            Downloader::new(self.http_client.clone(), self.config.clone()),
            self.resolver.clone(),
            self.selector.clone(),
            self.config.clone(),
            self.manager.clone(),
            self.cancellation.clone(),
        )
    }
}

/// 库的公共入口点，由 `main.rs` 调用
pub async fn run_from_cli(args: Arc<Cli>, cancellation: CancellationToken) -> AppResult<()> {
    debug!("CLI 参数: {:?}", args);
    let config = Arc::new(AppConfig::new(&args)?);
    debug!("加载的应用配置: {:?}", config);

    let non_interactive = args.yes || !ui::stdin_is_interactive();
    let policy: QualityPolicy = args.quality.parse()?;
    let context = AppContext::new(config, policy, non_interactive, cancellation)?;

    if args.interactive {
        return run_interactive(&args, &context).await;
    }
    let episodes = episodes_from_args(&args)?;
    info!("共 {} 集待处理", episodes.len());
    dispatch(&args, &context, &episodes).await
}

async fn dispatch(args: &Cli, context: &AppContext, episodes: &[EpisodeRef]) -> AppResult<()> {
    if args.download {
        let batch = context.batch_downloader();
        batch.run(episodes).await?;
        return if batch.manager().did_all_succeed() {
            Ok(())
        } else {
            Err(AppError::Other(anyhow!("部分剧集下载失败")))
        };
    }

    let options = playback_options(args, context.non_interactive);
    let mut orchestrator = Orchestrator::new(context, playback_services(context), options);
    orchestrator.run(episodes, 0).await
}

fn playback_options(args: &Cli, non_interactive: bool) -> PlaybackOptions {
    PlaybackOptions {
        mode: if args.download_first {
            PlaybackMode::DownloadFirst
        } else {
            PlaybackMode::StreamOnly
        },
        front_end: if non_interactive {
            FrontEnd::Headless
        } else {
            FrontEnd::Terminal
        },
        resume: if args.no_resume {
            ResumePolicy::Never
        } else if non_interactive {
            ResumePolicy::Always
        } else {
            ResumePolicy::Ask
        },
    }
}

fn playback_services(context: &AppContext) -> PlaybackServices {
    let skip_times: Arc<dyn SkipTimeSource> = match &context.config.skip_api_template {
        Some(template) => Arc::new(HttpSkipTimes::new(context.http_client.clone(), template.clone())),
        None => Arc::new(NoSkipTimes),
    };
    PlaybackServices {
        store: Arc::new(JsonFileStore::new(context.config.store_path.clone())),
        presence: Arc::new(LogPresence),
        skip_times,
        clock: Arc::new(TokioClock),
    }
}

/// 由页面链接或链接模板得到系列名：主机名加上除单集部分以外的路径。
/// 模板中含 `{ep}` 的路径段、单集链接的最后一段都视为单集部分。
pub fn series_name_from_link(link: &str) -> Option<String> {
    let is_template = link.contains("{ep}");
    let url = Url::parse(&link.replace("{ep}", "%7Bep%7D")).ok()?;
    let host = url.host_str()?;
    let mut segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    if is_template {
        segments.retain(|seg| !seg.contains("%7Bep%7D"));
    } else if segments.len() > 1 {
        segments.pop();
    }
    Some(std::iter::once(host).chain(segments).join("/"))
}

/// 系列标题：优先使用 --title，否则取链接的主机名与系列路径，或 ID 本身
fn series_from_args(args: &Cli, fallback: &str) -> Arc<SeriesRef> {
    let title = args
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| series_name_from_link(fallback))
        .unwrap_or_else(|| fallback.to_string());
    Arc::new(SeriesRef {
        key: if args.id.is_some() {
            fallback.to_string()
        } else {
            title.to_lowercase()
        },
        title,
        mode: Some(args.mode.as_str().to_string()),
        skip_id: args.skip_id.clone(),
    })
}

fn episodes_from_args(args: &Cli) -> AppResult<Vec<EpisodeRef>> {
    let range = args
        .episodes
        .as_deref()
        .map(utils::parse_episode_range)
        .transpose()?;

    if let Some(url) = &args.url {
        Url::parse(url).map_err(|_| AppError::UserInputError(format!("无效的链接: '{}'", url)))?;
        let number = range.map_or(1, |(start, _)| start);
        return Ok(vec![EpisodeRef {
            number: number.to_string(),
            series: series_from_args(args, url),
            source: EpisodeSource::Page(url.clone()),
            duration_hint: None,
        }]);
    }

    let provider: Box<dyn EpisodeProvider> = if let Some(id) = &args.id {
        let range = range.ok_or_else(|| AppError::UserInputError("--id 需要 --episodes".into()))?;
        Box::new(OpaqueEpisodes::new(series_from_args(args, id), id.clone(), range))
    } else if let Some(template) = &args.url_template {
        let range = range.ok_or_else(|| AppError::UserInputError("--url-template 需要 --episodes".into()))?;
        Box::new(TemplateEpisodes::new(series_from_args(args, template), template.clone(), range)?)
    } else if let Some(path) = &args.list {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "list".to_string());
        let provider = ListEpisodes::new(series_from_args(args, &name), path.clone());
        let all = provider.episodes()?;
        return Ok(match range {
            Some((start, end)) => all
                .into_iter()
                .filter(|e| e.number.parse::<u32>().is_ok_and(|n| n >= start && n <= end))
                .collect(),
            None => all,
        });
    } else {
        return Err(AppError::UserInputError("请指定运行模式".into()));
    };
    provider.episodes()
}

async fn run_interactive(args: &Cli, context: &AppContext) -> AppResult<()> {
    ui::print_header("交互模式");
    ui::plain(&format!(
        "在此模式下，你可以逐一输入剧集页面链接，或 系列ID 加集数。按 {} 可随时退出。",
        *symbols::CTRL_C
    ));

    loop {
        let input = match ui::prompt("请输入剧集链接或系列 ID", None) {
            Ok(input) if !input.is_empty() => input,
            Ok(_) => break,
            Err(_) => return Err(AppError::UserInterrupt),
        };
        let result = async {
            let episodes = if utils::is_opaque_id(&input) {
                let range = ui::prompt("请输入集数范围", Some("1"))
                    .map_err(|_| AppError::UserInterrupt)
                    .and_then(|r| utils::parse_episode_range(&r))?;
                let mut id_args = args.clone();
                id_args.id = Some(input.clone());
                OpaqueEpisodes::new(series_from_args(&id_args, &input), input.clone(), range).episodes()?
            } else if Url::parse(&input).is_ok() {
                vec![EpisodeRef {
                    number: "1".to_string(),
                    series: series_from_args(args, &input),
                    source: EpisodeSource::Page(input.clone()),
                    duration_hint: None,
                }]
            } else {
                return Err(AppError::UserInputError(format!(
                    "输入 '{}' 既不是有效的链接，也不是有效的 ID。",
                    input
                )));
            };
            dispatch(args, context, &episodes).await
        }
        .await;

        match result {
            Ok(()) => {}
            Err(AppError::UserInterrupt) => return Err(AppError::UserInterrupt),
            Err(e @ AppError::PlayerSpawn(_)) => return Err(e),
            Err(e) => {
                log::error!("交互模式任务 '{}' 失败: {}", input, e);
                ui::error(&format!("处理时发生错误: {}", e));
            }
        }
    }

    ui::plain("");
    ui::info("退出交互模式。");
    Ok(())
}
