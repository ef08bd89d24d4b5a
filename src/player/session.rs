// src/player/session.rs

use super::{
    clock::{Clock, poll_until},
    ipc::{ControlChannel, unique_channel_path},
    protocol::{PROPERTY_UNAVAILABLE, PlayerCommand, SeekMode, property},
};
use crate::{
    config::AppConfig,
    constants,
    error::*,
    models::{EpisodeRef, SkipIntervals, SourceKind},
};
use log::{debug, info, warn};
use serde_json::{Value, json};
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    process::{Child, Command},
    sync::{Notify, watch},
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Starting,
    AwaitingFirstFrame,
    Playing,
    Paused,
    Ended,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: PlaybackState,
    pub position: f64,
    pub duration: Option<f64>,
    pub paused: bool,
}

struct SessionStatus {
    state: PlaybackState,
    position: f64,
    duration: Option<f64>,
    paused: bool,
    audio_track: Option<Value>,
    subtitle_track: Option<Value>,
    skip: SkipIntervals,
}

/// 启动播放器所需的参数
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub url: String,
    pub title: String,
    pub referer: Option<String>,
    /// 直链来源可以在启动参数里直接指定起始位置
    pub start_at: Option<f64>,
    pub extra_args: Vec<String>,
}

impl LaunchOptions {
    pub fn to_args(&self, channel_path: &Path) -> Vec<String> {
        let mut args = self.extra_args.clone();
        args.push(format!("--input-ipc-server={}", channel_path.display()));
        if !self.title.is_empty() {
            args.push(format!("--force-media-title={}", self.title));
        }
        if let Some(referer) = &self.referer {
            args.push(format!("--referrer={}", referer));
        }
        if let Some(start) = self.start_at {
            args.push(format!("--start=+{:.0}", start));
        }
        args.push(self.url.clone());
        args
    }
}

/// 播放器时长过小时的兜底：优先用剧集自带的时长提示，否则用下限。
pub fn effective_duration(reported: Option<f64>, hint: Option<f64>, floor: f64) -> f64 {
    match reported {
        Some(d) if d >= floor => d,
        _ => hint.filter(|h| *h >= floor).unwrap_or(floor),
    }
}

/// 负责启动播放器进程并建立控制通道。
pub struct PlayerController {
    config: Arc<AppConfig>,
    clock: Arc<dyn Clock>,
}

impl PlayerController {
    pub fn new(config: Arc<AppConfig>, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    pub async fn start(
        &self,
        episode: &EpisodeRef,
        kind: SourceKind,
        mut launch: LaunchOptions,
    ) -> AppResult<Arc<PlaybackSession>> {
        let channel_path = unique_channel_path();
        let mut extra = self.config.player_args.clone();
        extra.append(&mut launch.extra_args);
        launch.extra_args = extra;
        let args = launch.to_args(&channel_path);
        info!("启动播放器 '{}': {:?}", self.config.player_command, args);

        let child = Command::new(&self.config.player_command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AppError::PlayerSpawn(format!("'{}': {}", self.config.player_command, e)))?;
        let watcher = ProcessWatcher::spawn(child);

        let exit_rx = &watcher.exited;
        let path = channel_path.as_path();
        let timeout = self.config.command_timeout;
        let connected = poll_until(
            self.clock.as_ref(),
            constants::player::CONNECT_ATTEMPTS,
            Duration::from_millis(constants::player::CONNECT_INTERVAL_MS),
            move |_| async move {
                let exited = *exit_rx.borrow();
                if exited {
                    return Err(AppError::PlayerProcess(
                        "播放器在建立控制通道前退出".to_string(),
                    ));
                }
                Ok(ControlChannel::connect(path, timeout).await.ok())
            },
        )
        .await;

        let channel = match connected {
            Ok(Some(channel)) => channel,
            other => {
                watcher.kill.notify_one();
                remove_channel_file(&channel_path);
                return Err(match other {
                    Err(e) => e,
                    _ => AppError::PlayerProcess(format!(
                        "无法连接播放器控制通道 {}",
                        channel_path.display()
                    )),
                });
            }
        };
        debug!("已连接控制通道 {}", channel_path.display());

        Ok(Arc::new(PlaybackSession::new(
            channel,
            channel_path,
            episode.clone(),
            kind,
            self.config.clone(),
            self.clock.clone(),
            Exit::Process(watcher),
        )))
    }
}

struct ProcessWatcher {
    exited: watch::Receiver<bool>,
    kill: Arc<Notify>,
}

impl ProcessWatcher {
    fn spawn(mut child: Child) -> Self {
        let (tx, rx) = watch::channel(false);
        let kill = Arc::new(Notify::new());
        let kill_signal = kill.clone();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => debug!("播放器进程退出: {:?}", status),
                _ = kill_signal.notified() => {
                    warn!("播放器未在规定时间内退出，强制结束");
                    let _ = child.kill().await;
                }
            }
            let _ = tx.send(true);
        });
        Self { exited: rx, kill }
    }
}

enum Exit {
    Process(ProcessWatcher),
    /// 没有子进程 (测试中直接接入控制通道)，停止即视为退出
    Detached(watch::Sender<bool>, watch::Receiver<bool>),
}

impl Exit {
    fn receiver(&self) -> watch::Receiver<bool> {
        match self {
            Exit::Process(w) => w.exited.clone(),
            Exit::Detached(_, rx) => rx.clone(),
        }
    }
}

/// 一个正在运行的播放器进程及其控制通道。
pub struct PlaybackSession {
    channel_path: PathBuf,
    channel: ControlChannel,
    episode: EpisodeRef,
    kind: SourceKind,
    status: Mutex<SessionStatus>,
    exit: Exit,
    stop_token: CancellationToken,
    stopped: AtomicBool,
    config: Arc<AppConfig>,
    clock: Arc<dyn Clock>,
}

impl PlaybackSession {
    fn new(
        channel: ControlChannel,
        channel_path: PathBuf,
        episode: EpisodeRef,
        kind: SourceKind,
        config: Arc<AppConfig>,
        clock: Arc<dyn Clock>,
        exit: Exit,
    ) -> Self {
        Self {
            channel_path,
            channel,
            episode,
            kind,
            status: Mutex::new(SessionStatus {
                state: PlaybackState::Starting,
                position: 0.0,
                duration: None,
                paused: false,
                audio_track: None,
                subtitle_track: None,
                skip: SkipIntervals::default(),
            }),
            exit,
            stop_token: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            config,
            clock,
        }
    }

    /// 在已有的控制通道上建立会话，不管理子进程
    #[cfg(any(test, feature = "testing"))]
    pub fn attach(
        channel: ControlChannel,
        episode: EpisodeRef,
        kind: SourceKind,
        config: Arc<AppConfig>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (tx, rx) = watch::channel(false);
        Arc::new(Self::new(
            channel,
            unique_channel_path(),
            episode,
            kind,
            config,
            clock,
            Exit::Detached(tx, rx),
        ))
    }

    fn status(&self) -> MutexGuard<'_, SessionStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn channel_path(&self) -> &Path {
        &self.channel_path
    }

    pub fn episode(&self) -> &EpisodeRef {
        &self.episode
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn state(&self) -> PlaybackState {
        self.status().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let status = self.status();
        SessionSnapshot {
            state: status.state,
            position: status.position,
            duration: status.duration,
            paused: status.paused,
        }
    }

    /// 最近一次读取到的 (音轨, 字幕轨)
    pub fn tracks(&self) -> (Option<Value>, Option<Value>) {
        let status = self.status();
        (status.audio_track.clone(), status.subtitle_track.clone())
    }

    pub fn skip_intervals(&self) -> SkipIntervals {
        self.status().skip
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop_token.clone()
    }

    pub fn has_exited(&self) -> bool {
        let rx = self.exit.receiver();
        let exited = *rx.borrow();
        exited
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        !self.channel.is_closed()
    }

    pub async fn send(&self, command: PlayerCommand) -> AppResult<super::protocol::Response> {
        if self.is_stopped() {
            return Err(AppError::PlayerProcess("会话已结束".to_string()));
        }
        self.channel.request(&command).await
    }

    pub async fn get_property(&self, name: &'static str) -> AppResult<Option<Value>> {
        let response = self.send(PlayerCommand::GetProperty(name)).await?;
        if response.is_success() {
            return Ok(response.value().cloned());
        }
        match response.error.as_deref() {
            Some(PROPERTY_UNAVAILABLE) => Ok(None),
            other => Err(AppError::PlayerProcess(format!(
                "读取属性 {} 失败: {}",
                name,
                other.unwrap_or("未知错误")
            ))),
        }
    }

    pub async fn set_property(&self, name: &'static str, value: Value) -> AppResult<()> {
        let response = self.send(PlayerCommand::SetProperty(name, value)).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(AppError::PlayerProcess(format!(
                "设置属性 {} 失败: {}",
                name,
                response.error.unwrap_or_default()
            )))
        }
    }

    async fn position(&self) -> AppResult<Option<f64>> {
        Ok(self
            .get_property(property::TIME_POS)
            .await?
            .and_then(|v| v.as_f64()))
    }

    /// 轮询当前位置直到首次得到非空值，随后读取一次时长并缓存。
    /// 在限定次数内没有画面时返回 `Ok(false)`。
    pub async fn wait_first_frame(&self) -> AppResult<bool> {
        self.status().state = PlaybackState::AwaitingFirstFrame;
        let first = poll_until(
            self.clock.as_ref(),
            self.config.first_frame_attempts,
            self.config.first_frame_interval,
            move |_| async move {
                if self.has_exited() {
                    return Err(AppError::PlayerProcess("播放器在开始播放前退出".to_string()));
                }
                self.position().await
            },
        )
        .await?;

        let Some(position) = first else {
            warn!("{} 在限定时间内没有开始播放", self.episode.display_name());
            return Ok(false);
        };

        let reported = self
            .get_property(property::DURATION)
            .await?
            .and_then(|v| v.as_f64());
        let duration = effective_duration(
            reported,
            self.episode.duration_hint,
            self.config.duration_floor,
        );
        if reported != Some(duration) {
            debug!("播放器报告的时长 {:?} 不可信，改用 {}", reported, duration);
        }

        let mut status = self.status();
        status.state = PlaybackState::Playing;
        status.position = position;
        status.duration = Some(duration);
        info!("{} 开始播放 (时长 {:.0}s)", self.episode.display_name(), duration);
        Ok(true)
    }

    /// 设置片头片尾跳过区间。`use_chapters` 为真时改用章节标记。
    pub async fn apply_skip(&self, intervals: SkipIntervals, use_chapters: bool) -> AppResult<()> {
        if intervals.is_empty() {
            return Ok(());
        }
        if use_chapters {
            let mut chapters = Vec::new();
            if let Some(op) = intervals.op {
                if op.start > 0.0 {
                    chapters.push(json!({"title": "Prologue", "time": 0.0}));
                }
                chapters.push(json!({"title": "Opening", "time": op.start}));
                chapters.push(json!({"title": "Episode", "time": op.end}));
            }
            if let Some(ed) = intervals.ed {
                chapters.push(json!({"title": "Ending", "time": ed.start}));
                chapters.push(json!({"title": "Preview", "time": ed.end}));
            }
            self.set_property(property::CHAPTER_LIST, Value::Array(chapters))
                .await?;
        } else {
            for (name, interval) in [("op", intervals.op), ("ed", intervals.ed)] {
                let Some(interval) = interval else { continue };
                for (edge, value) in [("start", interval.start), ("end", interval.end)] {
                    self.send(PlayerCommand::AppendScriptOpt(
                        format!("skip-{}_{}", name, edge),
                        format!("{:.3}", value),
                    ))
                    .await?;
                }
            }
        }
        debug!("已应用跳过区间: {:?}", intervals);
        self.status().skip = intervals;
        Ok(())
    }

    /// 续播。自适应流的过早 seek 会被忽略，因此按递增间隔重试并核对实际位置。
    pub async fn resume(&self, target: f64, started_at_target: bool) -> AppResult<bool> {
        let tolerance = self.config.resume_tolerance;
        if started_at_target
            && self.kind != SourceKind::AdaptivePlaylist
            && let Some(pos) = self.position().await?
            && (pos - target).abs() <= tolerance
        {
            return Ok(true);
        }
        let (attempts, step) = match self.kind {
            SourceKind::AdaptivePlaylist => (
                constants::player::RESUME_SEEK_ATTEMPTS,
                Duration::from_millis(constants::player::RESUME_SEEK_STEP_MS),
            ),
            _ => (2, Duration::from_millis(constants::player::RESUME_SEEK_STEP_MS)),
        };
        self.seek_and_verify(target, attempts, step, tolerance).await
    }

    pub async fn seek_and_verify(
        &self,
        target: f64,
        attempts: u32,
        step: Duration,
        tolerance: f64,
    ) -> AppResult<bool> {
        for attempt in 1..=attempts {
            self.clock.sleep(step * attempt).await;
            let response = self
                .send(PlayerCommand::Seek(target, SeekMode::Absolute))
                .await?;
            if !response.is_success() {
                debug!("第 {} 次 seek 被拒绝: {:?}", attempt, response.error);
                continue;
            }
            self.clock.sleep(step).await;
            if let Some(pos) = self.position().await? {
                if (pos - target).abs() <= tolerance {
                    info!("已续播到 {:.0}s (第 {} 次尝试)", pos, attempt);
                    self.status().position = pos;
                    return Ok(true);
                }
                debug!("seek 后位置 {:.1} 与目标 {:.1} 相差过大", pos, target);
            }
        }
        warn!("续播到 {:.0}s 失败", target);
        Ok(false)
    }

    /// 读取位置与暂停状态，更新并返回会话快照
    pub async fn refresh(&self) -> AppResult<SessionSnapshot> {
        let position = self.position().await?;
        let paused = self
            .get_property(property::PAUSE)
            .await?
            .and_then(|v| v.as_bool());
        let mut status = self.status();
        if let Some(pos) = position {
            status.position = pos;
        }
        if let Some(paused) = paused {
            status.paused = paused;
            if matches!(status.state, PlaybackState::Playing | PlaybackState::Paused) {
                status.state = if paused {
                    PlaybackState::Paused
                } else {
                    PlaybackState::Playing
                };
            }
        }
        Ok(SessionSnapshot {
            state: status.state,
            position: status.position,
            duration: status.duration,
            paused: status.paused,
        })
    }

    /// 读取当前音轨与字幕轨，供下一集沿用
    pub async fn read_tracks(&self) -> (Option<Value>, Option<Value>) {
        let aid = self.get_property(property::AUDIO_TRACK).await.ok().flatten();
        let sid = self.get_property(property::SUBTITLE_TRACK).await.ok().flatten();
        let mut status = self.status();
        status.audio_track = aid.clone();
        status.subtitle_track = sid.clone();
        (aid, sid)
    }

    pub async fn apply_tracks(&self, aid: Option<Value>, sid: Option<Value>) {
        for (name, value) in [(property::AUDIO_TRACK, aid), (property::SUBTITLE_TRACK, sid)] {
            if let Some(value) = value
                && let Err(e) = self.set_property(name, value).await
            {
                debug!("沿用轨道 {} 失败: {}", name, e);
            }
        }
    }

    /// 等待播放器进程退出 (用户关闭窗口或播放结束)
    pub async fn wait_exit(&self) {
        let mut rx = self.exit.receiver();
        let _ = rx.wait_for(|exited| *exited).await;
        let mut status = self.status();
        if status.state != PlaybackState::Quit {
            status.state = PlaybackState::Ended;
        }
    }

    /// 结束会话：通知后台任务停止，请播放器自行退出，关闭控制通道。可重复调用。
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_token.cancel();

        if !self.has_exited() && !self.channel.is_closed() {
            match self.channel.request(&PlayerCommand::Quit).await {
                Ok(_) => debug!("已发送退出命令"),
                Err(e) => debug!("发送退出命令失败: {}", e),
            }
        }
        self.channel.close().await;

        match &self.exit {
            Exit::Process(watcher) => {
                let grace = Duration::from_millis(constants::player::QUIT_GRACE_MS);
                let mut rx = watcher.exited.clone();
                if tokio::time::timeout(grace, rx.wait_for(|e| *e)).await.is_err() {
                    watcher.kill.notify_one();
                    let _ = tokio::time::timeout(grace, rx.wait_for(|e| *e)).await;
                }
            }
            Exit::Detached(tx, _) => {
                let _ = tx.send(true);
            }
        }
        remove_channel_file(&self.channel_path);

        let mut status = self.status();
        if status.state != PlaybackState::Ended {
            status.state = PlaybackState::Quit;
        }
        info!("{} 的播放会话已结束", self.episode.display_name());
    }
}

fn remove_channel_file(path: &Path) {
    if cfg!(unix)
        && path.exists()
        && let Err(e) = std::fs::remove_file(path)
    {
        debug!("删除控制通道文件 {} 失败: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_duration_floor() {
        assert_eq!(effective_duration(Some(1420.0), Some(1400.0), 60.0), 1420.0);
        assert_eq!(effective_duration(Some(2.0), Some(1400.0), 60.0), 1400.0);
        assert_eq!(effective_duration(Some(2.0), None, 60.0), 60.0);
        assert_eq!(effective_duration(None, Some(10.0), 60.0), 60.0);
    }

    #[test]
    fn test_launch_args() {
        let launch = LaunchOptions {
            url: "https://cdn.x/ep.mp4".into(),
            title: "Show - 第 1 集".into(),
            referer: Some("https://site.x/".into()),
            start_at: Some(300.4),
            extra_args: vec!["--fs".into()],
        };
        let args = launch.to_args(Path::new("/tmp/ep.sock"));
        assert_eq!(args.first().map(String::as_str), Some("--fs"));
        assert!(args.contains(&"--input-ipc-server=/tmp/ep.sock".to_string()));
        assert!(args.contains(&"--start=+300".to_string()));
        assert!(args.contains(&"--referrer=https://site.x/".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://cdn.x/ep.mp4"));
    }
}
