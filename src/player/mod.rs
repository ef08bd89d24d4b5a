// src/player/mod.rs

//! 外部播放器的进程管理与控制通道。

pub mod clock;
pub mod ipc;
pub mod protocol;
mod session;
mod tracker;

pub use clock::{Clock, TokioClock, poll_until};
pub use ipc::{ControlChannel, unique_channel_path};
pub use protocol::{PlayerCommand, Response, SeekMode};
pub use session::{
    LaunchOptions, PlaybackSession, PlaybackState, PlayerController, SessionSnapshot,
    effective_duration,
};
pub use tracker::{now_playing, report_interval, save_snapshot, spawn_tracker};

#[cfg(any(test, feature = "testing"))]
pub use clock::InstantClock;
