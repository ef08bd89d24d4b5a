// src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("网络请求失败: {0}")]
    Network(#[from] reqwest::Error),
    #[error("网络中间件错误: {0}")]
    NetworkMiddleware(#[from] reqwest_middleware::Error),
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),
    #[error("无法解析来自 '{url}' 的响应: {source}")]
    ApiParseFailed {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("页面结构无法解析 ({0})，站点布局可能已变更")]
    Parse(String),
    #[error("URL 解析错误: {0}")]
    Url(#[from] url::ParseError),
    #[error("未找到可播放的视频源: {0}")]
    NotFound(String),
    #[error("不支持的视频源: {0}")]
    UnsupportedSource(String),
    #[error("播放器进程错误: {0}")]
    PlayerProcess(String),
    #[error("无法启动播放器: {0}")]
    PlayerSpawn(String),
    #[error("分段下载失败 (第 {index} 段): {reason}")]
    PartialDownload { index: usize, reason: String },
    #[error("无法确定文件大小: {0}")]
    SizeUnknown(String),
    #[error("外部下载器执行失败: {0}")]
    ExternalTool(String),
    #[error("M3U8 解析错误: {0}")]
    M3u8Parse(String),
    #[error("用户中断")]
    UserInterrupt,
    #[error("{0}")] // 只打印内部信息，不加任何前缀
    UserInputError(String),
    #[error("未知错误: {0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// 可以重试的瞬时错误：超时、连接被重置或拒绝等。
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Network(err)
            | AppError::NetworkMiddleware(reqwest_middleware::Error::Reqwest(err)) => {
                err.is_timeout()
                    || err.is_connect()
                    || (err.is_body() && err.status().is_none())
                    || err
                        .status()
                        .is_some_and(|s| s.is_server_error() || s.as_u16() == 429)
            }
            AppError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
