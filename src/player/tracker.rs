// src/player/tracker.rs

use super::{
    clock::Clock,
    session::{PlaybackSession, PlaybackState, SessionSnapshot},
};
use crate::{constants::player, models::NowPlaying, presence::PresenceSink, store::ProgressStore};
use log::{debug, warn};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;

/// 前几次快速上报，之后放慢
pub fn report_interval(updates: u32) -> Duration {
    if updates < player::PROGRESS_FAST_UPDATES {
        Duration::from_secs(player::PROGRESS_FAST_INTERVAL_SECS)
    } else {
        Duration::from_secs(player::PROGRESS_SLOW_INTERVAL_SECS)
    }
}

pub fn now_playing(session: &PlaybackSession, snapshot: &SessionSnapshot) -> NowPlaying {
    let episode = session.episode();
    NowPlaying {
        series: episode.series.title.clone(),
        episode: episode.number.clone(),
        position: snapshot.position,
        duration: snapshot.duration.unwrap_or_default(),
        paused: snapshot.paused,
    }
}

/// 把快照写入进度存储。首帧之前的快照没有意义，直接忽略。
pub async fn save_snapshot(
    store: &dyn ProgressStore,
    session: &PlaybackSession,
    snapshot: &SessionSnapshot,
) {
    let Some(duration) = snapshot.duration else {
        return;
    };
    let episode = session.episode();
    if let Err(e) = store
        .put(
            &episode.series.key,
            &episode.number,
            snapshot.position,
            duration,
            &episode.series.title,
        )
        .await
    {
        warn!("保存 {} 的观看进度失败: {}", episode.display_name(), e);
    }
}

/// 后台轮询播放位置，写入进度存储并发布"正在播放"状态。
/// 会话的停止信号、进程退出或控制通道断开都会结束轮询。
pub fn spawn_tracker(
    session: Arc<PlaybackSession>,
    store: Arc<dyn ProgressStore>,
    presence: Arc<dyn PresenceSink>,
    clock: Arc<dyn Clock>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let token = session.stop_token();
        let mut updates = 0u32;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = clock.sleep(report_interval(updates)) => {}
            }
            if session.has_exited() || !session.is_connected() {
                break;
            }
            let snapshot = match session.refresh().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    debug!("读取播放进度失败: {}", e);
                    continue;
                }
            };
            if !matches!(snapshot.state, PlaybackState::Playing | PlaybackState::Paused) {
                continue;
            }
            updates += 1;
            // 播放器退出后无法再查询，趁还在播放时记下轨道供下一集沿用
            session.read_tracks().await;
            save_snapshot(store.as_ref(), &session, &snapshot).await;
            presence.publish(&now_playing(&session, &snapshot));
        }
        debug!("{} 的进度轮询已结束", session.episode().display_name());
    })
}
