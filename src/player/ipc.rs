// src/player/ipc.rs

use super::protocol::{PlayerCommand, Response};
use crate::error::*;
use log::{debug, trace};
use std::{
    path::{Path, PathBuf},
    sync::{
        LazyLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines},
    sync::Mutex,
};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

static CHANNEL_SEQ: LazyLock<AtomicU64> = LazyLock::new(|| AtomicU64::new(0));

/// 每个播放器进程独占的通道路径：进程号 + 序号 + 纳秒时间戳
pub fn unique_channel_path() -> PathBuf {
    let seq = CHANNEL_SEQ.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    let name = format!("ep-dl-mpv-{}-{}-{}", std::process::id(), seq, nanos);
    if cfg!(windows) {
        PathBuf::from(format!(r"\\.\pipe\{}", name))
    } else {
        std::env::temp_dir().join(format!("{}.sock", name))
    }
}

struct ChannelIo {
    lines: Lines<BufReader<BoxedReader>>,
    writer: BoxedWriter,
}

/// 与播放器的控制连接。所有命令经由同一个互斥锁串行收发。
pub struct ControlChannel {
    io: Mutex<ChannelIo>,
    next_id: AtomicU64,
    timeout: Duration,
    closed: AtomicBool,
}

impl ControlChannel {
    pub fn from_stream<S>(stream: S, timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let reader: BoxedReader = Box::new(reader);
        Self {
            io: Mutex::new(ChannelIo {
                lines: BufReader::new(reader).lines(),
                writer: Box::new(writer),
            }),
            next_id: AtomicU64::new(1),
            timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// 连接一次；播放器还没创建通道时返回 I/O 错误，由调用方决定是否重试。
    pub async fn connect(path: &Path, timeout: Duration) -> AppResult<Self> {
        #[cfg(unix)]
        {
            let stream = tokio::net::UnixStream::connect(path).await?;
            Ok(Self::from_stream(stream, timeout))
        }
        #[cfg(windows)]
        {
            let stream = tokio::net::windows::named_pipe::ClientOptions::new().open(path)?;
            Ok(Self::from_stream(stream, timeout))
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn request(&self, command: &PlayerCommand) -> AppResult<Response> {
        if self.is_closed() {
            return Err(AppError::PlayerProcess("控制通道已关闭".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut payload = serde_json::to_string(&command.to_request(id))?;
        payload.push('\n');

        let mut io = self.io.lock().await;
        let exchange = async {
            io.writer.write_all(payload.as_bytes()).await?;
            io.writer.flush().await?;
            trace!("-> {}", payload.trim_end());
            loop {
                let Some(line) = io.lines.next_line().await? else {
                    return Err(AppError::PlayerProcess("播放器关闭了控制通道".to_string()));
                };
                trace!("<- {}", line);
                let Ok(response) = serde_json::from_str::<Response>(&line) else {
                    debug!("忽略无法解析的控制通道消息: {}", line);
                    continue;
                };
                if response.is_event() {
                    continue;
                }
                match response.request_id {
                    Some(rid) if rid == id => return Ok(response),
                    // 没有 request_id 的旧版本回复按顺序对应
                    None => return Ok(response),
                    Some(_) => continue,
                }
            }
        };
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => {
                if let Err(AppError::PlayerProcess(_) | AppError::Io(_)) = &result {
                    self.closed.store(true, Ordering::Release);
                }
                result
            }
            Err(_) => Err(AppError::PlayerProcess(format!(
                "命令 {:?} 在 {:?} 内没有响应",
                command, self.timeout
            ))),
        }
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut io = self.io.lock().await;
        let _ = io.writer.shutdown().await;
        debug!("控制通道已关闭");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_channel_paths_are_unique() {
        let a = unique_channel_path();
        let b = unique_channel_path();
        assert_ne!(a, b);
        assert!(a.to_string_lossy().contains(&std::process::id().to_string()));
    }

    #[tokio::test]
    async fn test_request_skips_events_and_matches_id() {
        let (client, server) = tokio::io::duplex(4096);
        let channel = ControlChannel::from_stream(client, Duration::from_secs(2));

        let fake = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut lines = BufReader::new(read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let req: serde_json::Value = serde_json::from_str(&line).unwrap();
            let id = req["request_id"].as_u64().unwrap();
            let reply = format!(
                "{{\"event\":\"file-loaded\"}}\n{{\"error\":\"success\",\"data\":12.5,\"request_id\":{}}}\n",
                id
            );
            write.write_all(reply.as_bytes()).await.unwrap();
            line
        });

        let response = channel
            .request(&PlayerCommand::GetProperty("time-pos"))
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.value().and_then(|v| v.as_f64()), Some(12.5));
        let sent = fake.await.unwrap();
        assert!(sent.contains("\"get_property\""));
    }

    #[tokio::test]
    async fn test_closed_channel_rejects_commands() {
        let (client, mut server) = tokio::io::duplex(64);
        let channel = ControlChannel::from_stream(client, Duration::from_millis(200));
        channel.close().await;
        assert!(channel.is_closed());
        assert!(matches!(
            channel.request(&PlayerCommand::Quit).await,
            Err(AppError::PlayerProcess(_))
        ));
        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_peer_hangup_marks_closed() {
        let (client, server) = tokio::io::duplex(64);
        let channel = ControlChannel::from_stream(client, Duration::from_secs(1));
        drop(server);
        assert!(channel.request(&PlayerCommand::Quit).await.is_err());
        assert!(channel.is_closed());
    }
}
