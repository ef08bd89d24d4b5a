// src/presence.rs

use crate::models::NowPlaying;
use log::debug;

/// "正在播放"状态的展示方。发布失败不影响播放，因此没有返回值。
pub trait PresenceSink: Send + Sync {
    fn publish(&self, now_playing: &NowPlaying);
}

pub struct LogPresence;

impl PresenceSink for LogPresence {
    fn publish(&self, now_playing: &NowPlaying) {
        debug!("正在播放: {}", now_playing);
    }
}

pub struct NullPresence;

impl PresenceSink for NullPresence {
    fn publish(&self, _now_playing: &NowPlaying) {}
}
