// src/constants.rs

pub const UI_WIDTH: usize = 88;
pub const FILENAME_TRUNCATE_LENGTH: usize = 65;
pub const MAX_FILENAME_BYTES: usize = 200;
pub const CONFIG_DIR_NAME: &str = concat!(".", clap::crate_name!());
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const LOG_FILE_NAME: &str = "ep-dl.log";
pub const LOG_FALLBACK_FILE_NAME: &str = "ep-dl-fallback.log";
pub const STORE_FILE_NAME: &str = "progress.json";
pub const DEFAULT_SAVE_DIR: &str = "downloads";
pub const DEFAULT_VIDEO_QUALITY: &str = "best";
pub const DEFAULT_EXTENSION: &str = "mp4";
pub const PLAYER_ENV_KEY: &str = "EP_DL_PLAYER";
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

pub mod download {
    pub const DEFAULT_WORKERS: usize = 4;
    pub const DEFAULT_BATCH_CONCURRENCY: usize = 3;
    pub const RETRY_ATTEMPTS: u32 = 3;
    pub const RETRY_BACKOFF_STEP_MS: u64 = 1000;
    pub const EXTERNAL_DOWNLOADER: &str = "yt-dlp";
    pub const EXTERNAL_POLL_INTERVAL_MS: u64 = 500;
    /// 无法探测大小的播放列表按此估算 (MiB)
    pub const PLAYLIST_SIZE_ESTIMATE_MB: u64 = 350;
    /// 每个媒体分片的估算大小 (KiB)，用于细化播放列表估算
    pub const SEGMENT_SIZE_ESTIMATE_KB: u64 = 1536;
    pub const PART_FILE_SUFFIX: &str = "part";
}

pub mod player {
    pub const DEFAULT_COMMAND: &str = "mpv";
    pub const RESUME_THRESHOLD_SECS: f64 = 30.0;
    pub const RESUME_TOLERANCE_SECS: f64 = 5.0;
    pub const RESUME_SEEK_ATTEMPTS: u32 = 5;
    pub const RESUME_SEEK_STEP_MS: u64 = 500;
    pub const DURATION_FLOOR_SECS: f64 = 60.0;
    pub const FIRST_FRAME_ATTEMPTS: u32 = 60;
    pub const FIRST_FRAME_INTERVAL_MS: u64 = 500;
    pub const CONNECT_ATTEMPTS: u32 = 50;
    pub const CONNECT_INTERVAL_MS: u64 = 100;
    pub const COMMAND_TIMEOUT_MS: u64 = 2000;
    pub const QUIT_GRACE_MS: u64 = 3000;
    pub const PROGRESS_FAST_UPDATES: u32 = 5;
    pub const PROGRESS_FAST_INTERVAL_SECS: u64 = 2;
    pub const PROGRESS_SLOW_INTERVAL_SECS: u64 = 10;
    pub const SKIP_LOOKUP_TIMEOUT_MS: u64 = 3000;
}

pub mod sources {
    pub const EMBED_DOMAINS: &[&str] = &[
        "streamtape.com",
        "dood.watch",
        "filemoon.sx",
        "mp4upload.com",
        "ok.ru",
        "sibnet.ru",
    ];
    pub const DELEGATED_HOSTS: &[&str] = &["ok.ru", "filemoon.sx", "dood.watch"];
    pub const OPAQUE_API_BASE: &str = "https://api.allanime.day";
    pub const OPAQUE_LINK_BASE: &str = "https://allanime.day";
    pub const OPAQUE_REFERER: &str = "https://allmanga.to";
    pub const OPAQUE_EPISODE_QUERY: &str = "query($showId:String!,$translationType:VaildTranslationTypeEnumType!,$episodeString:String!){episode(showId:$showId,translationType:$translationType,episodeString:$episodeString){episodeString sourceUrls}}";
    pub const OPAQUE_PLAIN_TEMPLATE: &str = "{site}/bangumi/{id}/p-{episode}-{mode}";
}
