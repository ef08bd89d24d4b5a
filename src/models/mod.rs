// src/models/mod.rs

pub mod api;

use crate::error::AppError;
use crate::symbols;
use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use url::Url;

/// 剧集所属的系列。`key` 用作进度存储的系列键。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRef {
    pub key: String,
    pub title: String,
    /// 不透明 ID 来源需要的翻译类型 (sub / dub)
    pub mode: Option<String>,
    /// 跳过片头片尾数据集使用的外部 ID
    pub skip_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeSource {
    Page(String),
    Opaque(String),
}

/// 由剧集列表提供方创建，本模块只读。
#[derive(Debug, Clone)]
pub struct EpisodeRef {
    pub number: String,
    pub series: Arc<SeriesRef>,
    pub source: EpisodeSource,
    pub duration_hint: Option<f64>,
}

impl EpisodeRef {
    pub fn display_name(&self) -> String {
        format!("{} - 第 {} 集", self.series.title, self.number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SourceKind {
    #[default]
    Direct,
    AdaptivePlaylist,
    Embed,
}

impl SourceKind {
    /// 根据地址形态判断来源类型；`embed_domains` 为已知第三方嵌入站点。
    pub fn classify(url: &str, embed_domains: &[String]) -> Self {
        let Ok(parsed) = Url::parse(url) else {
            return SourceKind::Direct;
        };
        if parsed.path().to_lowercase().ends_with(".m3u8") {
            return SourceKind::AdaptivePlaylist;
        }
        if parsed
            .host_str()
            .is_some_and(|host| host_matches(host, embed_domains))
        {
            return SourceKind::Embed;
        }
        SourceKind::Direct
    }
}

pub fn host_matches(host: &str, domains: &[String]) -> bool {
    domains
        .iter()
        .any(|d| host == d || host.ends_with(&format!(".{}", d)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamVariant {
    pub label: String,
    pub url: String,
}

/// 一次解析的结果，不在重试之间缓存。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub variants: Vec<StreamVariant>,
    pub kind: SourceKind,
    /// 来源家族名称 (页面主机名或提供方名称)
    pub provider: String,
    pub referer: Option<String>,
}

impl StreamDescriptor {
    pub fn single(url: String, label: String, kind: SourceKind, provider: String) -> Self {
        Self {
            variants: vec![StreamVariant { label, url }],
            kind,
            provider,
            referer: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
}

/// 片头 (op) 与片尾 (ed) 的跳过区间
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SkipIntervals {
    pub op: Option<Interval>,
    pub ed: Option<Interval>,
}

impl SkipIntervals {
    pub fn is_empty(&self) -> bool {
        self.op.is_none() && self.ed.is_none()
    }
}

/// 推送给状态展示方的"正在播放"摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowPlaying {
    pub series: String,
    pub episode: String,
    pub position: f64,
    pub duration: f64,
    pub paused: bool,
}

impl fmt::Display for NowPlaying {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} 第 {} 集 [{}/{}]{}",
            self.series,
            self.episode,
            format_clock(self.position),
            format_clock(self.duration),
            if self.paused { " (暂停)" } else { "" }
        )
    }
}

pub fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DownloadStatus {
    Success,
    Skipped,
    NotFound,
    ParseError,
    UnsupportedSource,
    HttpError,
    NetworkError,
    ConnectionError,
    TimeoutError,
    PartialError,
    SizeUnknown,
    ExternalToolError,
    IoError,
    UnexpectedError,
}

impl DownloadStatus {
    pub fn get_display_info(
        &self,
    ) -> (
        &'static ColoredString,
        fn(ColoredString) -> ColoredString,
        &'static str,
    ) {
        match self {
            DownloadStatus::Success => (&symbols::OK, |s| s.green(), "下载成功"),
            DownloadStatus::Skipped => (&symbols::SKIP, |s| s.bright_black(), "文件已存在，跳过"),
            DownloadStatus::NotFound => (&symbols::WARN, |s| s.yellow(), "未找到视频源"),
            DownloadStatus::ParseError => (&symbols::ERROR, |s| s.red(), "页面结构无法解析"),
            DownloadStatus::UnsupportedSource => (&symbols::WARN, |s| s.yellow(), "不支持的视频源"),
            DownloadStatus::HttpError => (&symbols::ERROR, |s| s.red(), "服务器返回错误"),
            DownloadStatus::NetworkError => (&symbols::ERROR, |s| s.red(), "网络请求失败"),
            DownloadStatus::ConnectionError => (&symbols::ERROR, |s| s.red(), "无法建立连接"),
            DownloadStatus::TimeoutError => (&symbols::WARN, |s| s.yellow(), "网络连接超时"),
            DownloadStatus::PartialError => (&symbols::ERROR, |s| s.red(), "分段下载失败"),
            DownloadStatus::SizeUnknown => (&symbols::ERROR, |s| s.red(), "无法确定文件大小"),
            DownloadStatus::ExternalToolError => (&symbols::ERROR, |s| s.red(), "外部下载器失败"),
            DownloadStatus::IoError => (&symbols::ERROR, |s| s.red(), "本地文件读写错误"),
            DownloadStatus::UnexpectedError => {
                (&symbols::ERROR, |s| s.red(), "发生未预期的程序错误")
            }
        }
    }
}

impl From<&AppError> for DownloadStatus {
    fn from(error: &AppError) -> Self {
        match error {
            AppError::Network(err)
            | AppError::NetworkMiddleware(reqwest_middleware::Error::Reqwest(err)) => {
                if err.is_timeout() {
                    DownloadStatus::TimeoutError
                } else if err.is_connect() {
                    DownloadStatus::ConnectionError
                } else if err.is_status() {
                    DownloadStatus::HttpError
                } else {
                    DownloadStatus::NetworkError
                }
            }
            AppError::NetworkMiddleware(_) => DownloadStatus::NetworkError,
            AppError::NotFound(_) => DownloadStatus::NotFound,
            AppError::Parse(_) | AppError::ApiParseFailed { .. } | AppError::M3u8Parse(_) => {
                DownloadStatus::ParseError
            }
            AppError::UnsupportedSource(_) => DownloadStatus::UnsupportedSource,
            AppError::PartialDownload { .. } => DownloadStatus::PartialError,
            AppError::SizeUnknown(_) => DownloadStatus::SizeUnknown,
            AppError::ExternalTool(_) => DownloadStatus::ExternalToolError,
            AppError::Io(_) => DownloadStatus::IoError,
            _ => DownloadStatus::UnexpectedError,
        }
    }
}
