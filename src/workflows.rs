// src/workflows.rs

//! 逐集播放的编排：解析、选清晰度、(可选) 先下载、启动播放器、续播、
//! 跳过片头片尾、进度上报、预加载下一集以及集数切换。

use crate::{
    AppContext,
    config::AppConfig,
    downloader::BatchDownloader,
    error::*,
    extractor::StreamResolver,
    models::{EpisodeRef, SkipIntervals, SourceKind, StreamDescriptor, format_clock, host_matches},
    player::{
        Clock, LaunchOptions, PlaybackSession, PlayerCommand, PlayerController, save_snapshot,
        spawn_tracker,
    },
    presence::PresenceSink,
    quality::QualitySelector,
    skiptimes::SkipTimeSource,
    store::ProgressStore,
    symbols, ui,
};
use colored::*;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    StreamOnly,
    DownloadFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontEnd {
    /// 每集结束后显示切换菜单
    Terminal,
    /// 不询问，按顺序自动播放下一集
    Headless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePolicy {
    Ask,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Next,
    Previous,
    Select(usize),
    Replay,
    Quit,
}

#[derive(Debug, Clone, Copy)]
pub struct PlaybackOptions {
    pub mode: PlaybackMode,
    pub front_end: FrontEnd,
    pub resume: ResumePolicy,
}

/// 播放过程依赖的外部协作方
#[derive(Clone)]
pub struct PlaybackServices {
    pub store: Arc<dyn ProgressStore>,
    pub presence: Arc<dyn PresenceSink>,
    pub skip_times: Arc<dyn SkipTimeSource>,
    pub clock: Arc<dyn Clock>,
}

/// 保存的位置低于阈值时不续播；`Ask` 时由 `ask` 决定。
pub fn resume_decision(
    saved: Option<f64>,
    threshold: f64,
    policy: ResumePolicy,
    ask: impl FnOnce(f64) -> bool,
) -> Option<f64> {
    let position = saved.filter(|p| *p >= threshold)?;
    match policy {
        ResumePolicy::Never => None,
        ResumePolicy::Always => Some(position),
        ResumePolicy::Ask => ask(position).then_some(position),
    }
}

/// 来源家族是否改用章节标记表示跳过区间
pub fn uses_chapter_markers(provider: &str, providers: &[String]) -> bool {
    providers
        .iter()
        .any(|p| p.eq_ignore_ascii_case(provider) || host_matches(provider, std::slice::from_ref(p)))
}

struct Preload {
    index: usize,
    handle: JoinHandle<AppResult<StreamDescriptor>>,
}

/// 同一时间最多只有一个活动的播放会话。切换集数时先结束旧会话再启动新会话。
pub struct Orchestrator {
    config: Arc<AppConfig>,
    resolver: Arc<dyn StreamResolver>,
    selector: Arc<QualitySelector>,
    batch: BatchDownloader,
    controller: PlayerController,
    services: PlaybackServices,
    options: PlaybackOptions,
    cancellation: CancellationToken,
    active: Option<Arc<PlaybackSession>>,
    tracker: Option<JoinHandle<()>>,
    preload: Option<Preload>,
    carried_tracks: (Option<Value>, Option<Value>),
}

impl Orchestrator {
    pub fn new(context: &AppContext, services: PlaybackServices, options: PlaybackOptions) -> Self {
        Self {
            config: context.config.clone(),
            resolver: context.resolver.clone(),
            selector: context.selector.clone(),
            batch: context.batch_downloader(),
            controller: PlayerController::new(context.config.clone(), services.clock.clone()),
            services,
            options,
            cancellation: context.cancellation.clone(),
            active: None,
            tracker: None,
            preload: None,
            carried_tracks: (None, None),
        }
    }

    /// 从 `start` 开始播放，直到用户退出或 (无人值守时) 播放完最后一集。
    pub async fn run(&mut self, episodes: &[EpisodeRef], start: usize) -> AppResult<()> {
        if episodes.is_empty() {
            return Err(AppError::UserInputError("没有可播放的剧集".to_string()));
        }
        let mut index = start.min(episodes.len() - 1);
        let outcome = loop {
            if self.cancellation.is_cancelled() {
                break Err(AppError::UserInterrupt);
            }
            let navigation = match self.play_episode(episodes, index).await {
                Ok(navigation) => navigation,
                Err(e @ (AppError::UserInterrupt | AppError::PlayerSpawn(_))) => break Err(e),
                Err(e) => {
                    error!("{} 播放失败: {}", episodes[index].display_name(), e);
                    ui::error(&format!("{} 播放失败: {}", episodes[index].display_name(), e));
                    self.after_episode(episodes, index)
                }
            };
            match self.apply_navigation(navigation, index, episodes.len()) {
                Some(next) => index = next,
                None => break Ok(()),
            }
        };
        self.teardown().await;
        if let Some(preload) = self.preload.take() {
            preload.handle.abort();
        }
        outcome
    }

    fn apply_navigation(&self, navigation: Navigation, index: usize, len: usize) -> Option<usize> {
        match navigation {
            Navigation::Next if index + 1 < len => Some(index + 1),
            Navigation::Next => {
                ui::info("已经是最后一集。");
                None
            }
            Navigation::Previous => Some(index.saturating_sub(1)),
            Navigation::Select(n) if n < len => Some(n),
            Navigation::Select(_) => Some(index),
            Navigation::Replay => Some(index),
            Navigation::Quit => None,
        }
    }

    /// 播放一集并返回下一步操作。任何错误都会先结束当前会话。
    pub async fn play_episode(&mut self, episodes: &[EpisodeRef], index: usize) -> AppResult<Navigation> {
        self.teardown().await;
        let episode = &episodes[index];
        ui::print_sub_header(&episode.display_name());

        let descriptor = self.resolve(episode, index).await?;
        let variant = self.selector.select(&descriptor)?.clone();
        debug!("选择清晰度 '{}': {}", variant.label, variant.url);

        let (url, kind, referer) = match self.options.mode {
            PlaybackMode::DownloadFirst => {
                let path = self.batch.download_resolved(episode, &descriptor).await?;
                (path.to_string_lossy().into_owned(), SourceKind::Direct, None)
            }
            PlaybackMode::StreamOnly => (variant.url, descriptor.kind, descriptor.referer.clone()),
        };

        let skip_lookup = self.spawn_skip_lookup(episode);
        let resume_at = self.resume_position(episode).await;

        let launch = LaunchOptions {
            url,
            title: episode.display_name(),
            referer,
            start_at: resume_at.filter(|_| kind != SourceKind::AdaptivePlaylist),
            extra_args: vec![],
        };
        let session = match self.controller.start(episode, kind, launch).await {
            Ok(session) => session,
            Err(e) => {
                if let Some(handle) = skip_lookup {
                    handle.abort();
                }
                return Err(e);
            }
        };
        self.take_over(session, &descriptor, resume_at, skip_lookup, episodes, index)
            .await
    }

    /// 新会话成为唯一的活动会话，出错时立即结束它
    async fn take_over(
        &mut self,
        session: Arc<PlaybackSession>,
        descriptor: &StreamDescriptor,
        resume_at: Option<f64>,
        skip_lookup: Option<JoinHandle<AppResult<SkipIntervals>>>,
        episodes: &[EpisodeRef],
        index: usize,
    ) -> AppResult<Navigation> {
        self.active = Some(session.clone());
        let outcome = self
            .drive(&session, descriptor, resume_at, skip_lookup, episodes, index)
            .await;
        if outcome.is_err() {
            self.teardown().await;
        }
        outcome
    }

    async fn drive(
        &mut self,
        session: &Arc<PlaybackSession>,
        descriptor: &StreamDescriptor,
        resume_at: Option<f64>,
        skip_lookup: Option<JoinHandle<AppResult<SkipIntervals>>>,
        episodes: &[EpisodeRef],
        index: usize,
    ) -> AppResult<Navigation> {
        if session.wait_first_frame().await? {
            println!("{} 正在播放 {}", *symbols::PLAY, session.episode().display_name());
            if let Some(target) = resume_at {
                if session
                    .resume(target, session.kind() != SourceKind::AdaptivePlaylist)
                    .await?
                {
                    let text = format!("从 {} 继续播放", format_clock(target));
                    if let Err(e) = session.send(PlayerCommand::ShowText(text)).await {
                        debug!("无法在播放器中显示提示: {}", e);
                    }
                } else {
                    ui::warn(&format!("未能跳转到上次的位置 {}", format_clock(target)));
                }
            }
            if let Some(handle) = skip_lookup {
                self.apply_skip_lookup(session, descriptor, handle).await;
            }
            let (aid, sid) = self.carried_tracks.clone();
            session.apply_tracks(aid, sid).await;
            self.tracker = Some(spawn_tracker(
                session.clone(),
                self.services.store.clone(),
                self.services.presence.clone(),
                self.services.clock.clone(),
            ));
        } else {
            if let Some(handle) = skip_lookup {
                handle.abort();
            }
            ui::warn("播放器长时间没有开始播放，观看进度将不会被记录。");
        }
        self.preload_next(episodes, index);

        tokio::select! {
            _ = session.wait_exit() => {}
            _ = self.cancellation.cancelled() => return Err(AppError::UserInterrupt),
        }
        info!("{} 的播放器已退出", session.episode().display_name());

        let (aid, sid) = session.tracks();
        if aid.is_some() || sid.is_some() {
            self.carried_tracks = (aid, sid);
        }
        self.teardown().await;
        save_snapshot(self.services.store.as_ref(), session, &session.snapshot()).await;

        Ok(self.after_episode(episodes, index))
    }

    fn after_episode(&self, episodes: &[EpisodeRef], index: usize) -> Navigation {
        match self.options.front_end {
            FrontEnd::Headless => Navigation::Next,
            FrontEnd::Terminal => navigation_menu(episodes, index),
        }
    }

    /// 预加载的结果属于这一集时直接使用，否则重新解析
    async fn resolve(&mut self, episode: &EpisodeRef, index: usize) -> AppResult<StreamDescriptor> {
        match self.preload.take() {
            Some(preload) if preload.index == index => match preload.handle.await {
                Ok(Ok(descriptor)) => {
                    debug!("使用预加载的 {}", episode.display_name());
                    return Ok(descriptor);
                }
                Ok(Err(e)) => debug!("预加载失败，重新解析: {}", e),
                Err(e) => debug!("预加载任务异常: {}", e),
            },
            Some(preload) => preload.handle.abort(),
            None => {}
        }
        self.resolver.resolve(episode).await
    }

    fn preload_next(&mut self, episodes: &[EpisodeRef], index: usize) {
        if let Some(previous) = self.preload.take() {
            previous.handle.abort();
        }
        let Some(next) = episodes.get(index + 1).cloned() else {
            return;
        };
        let resolver = self.resolver.clone();
        let handle = tokio::spawn(async move { resolver.resolve(&next).await });
        self.preload = Some(Preload {
            index: index + 1,
            handle,
        });
    }

    fn spawn_skip_lookup(&self, episode: &EpisodeRef) -> Option<JoinHandle<AppResult<SkipIntervals>>> {
        let series_id = episode.series.skip_id.clone()?;
        let number = episode.number.clone();
        let source = self.services.skip_times.clone();
        Some(tokio::spawn(async move { source.lookup(&series_id, &number).await }))
    }

    /// 查询较慢时放弃跳过，不影响播放
    async fn apply_skip_lookup(
        &self,
        session: &PlaybackSession,
        descriptor: &StreamDescriptor,
        mut handle: JoinHandle<AppResult<SkipIntervals>>,
    ) {
        let intervals = match tokio::time::timeout(self.config.skip_lookup_timeout, &mut handle).await {
            Ok(Ok(Ok(intervals))) => intervals,
            Ok(Ok(Err(e))) => {
                debug!("片头片尾查询失败: {}", e);
                return;
            }
            Ok(Err(e)) => {
                debug!("片头片尾查询任务异常: {}", e);
                return;
            }
            Err(_) => {
                handle.abort();
                debug!("片头片尾查询超时");
                return;
            }
        };
        let use_chapters = uses_chapter_markers(&descriptor.provider, &self.config.chapter_marker_providers);
        if let Err(e) = session.apply_skip(intervals, use_chapters).await {
            warn!("应用跳过区间失败: {}", e);
        }
    }

    async fn resume_position(&self, episode: &EpisodeRef) -> Option<f64> {
        if self.options.resume == ResumePolicy::Never {
            return None;
        }
        let saved = match self
            .services
            .store
            .get(&episode.series.key, &episode.number)
            .await
        {
            Ok(record) => record.map(|r| r.position),
            Err(e) => {
                warn!("读取观看进度失败: {}", e);
                None
            }
        };
        resume_decision(saved, self.config.resume_threshold, self.options.resume, |position| {
            ui::confirm(
                &format!("上次看到 {}，是否继续播放?", format_clock(position)),
                true,
            )
        })
    }

    /// 结束活动会话与其后台任务。可重复调用。
    pub async fn teardown(&mut self) {
        if let Some(session) = self.active.take() {
            session.stop().await;
        }
        if let Some(tracker) = self.tracker.take() {
            let _ = tracker.await;
        }
    }
}

fn navigation_menu(episodes: &[EpisodeRef], index: usize) -> Navigation {
    let has_next = index + 1 < episodes.len();
    let options = vec![
        "下一集".to_string(),
        "上一集".to_string(),
        "重播本集".to_string(),
        "选择集数".to_string(),
        "退出".to_string(),
    ];
    loop {
        let choice = match ui::selection_menu(
            &options,
            &format!("{} 播放结束", episodes[index].display_name()),
            "请输入数字选择下一步操作",
            if has_next { "1" } else { "5" },
        ) {
            Ok(choice) => choice,
            Err(_) => return Navigation::Quit,
        };
        match choice.trim() {
            "1" => return Navigation::Next,
            "2" => return Navigation::Previous,
            "3" => return Navigation::Replay,
            "4" => {
                let Ok(input) = ui::prompt("请输入集数", None) else {
                    return Navigation::Quit;
                };
                match episodes.iter().position(|e| e.number == input.trim()) {
                    Some(i) => return Navigation::Select(i),
                    None => eprintln!("{} 没有第 {} 集。", *symbols::WARN, input.trim().yellow()),
                }
            }
            "5" | "q" => return Navigation::Quit,
            other => eprintln!("{} 无效的选择 '{}'。", *symbols::ERROR, other),
        }
    }
}
