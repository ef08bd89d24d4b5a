// src/player/protocol.rs

//! 播放器控制通道的消息格式：每行一个 JSON 对象。
//!
//! 请求 `{"command":[...],"request_id":N}`，
//! 响应 `{"error":"success","data":...,"request_id":N}`；
//! 带 `event` 字段的行是异步事件，与请求无关。

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub mod property {
    pub const TIME_POS: &str = "time-pos";
    pub const DURATION: &str = "duration";
    pub const PAUSE: &str = "pause";
    pub const AUDIO_TRACK: &str = "aid";
    pub const SUBTITLE_TRACK: &str = "sid";
    pub const SCRIPT_OPTS: &str = "script-opts";
    pub const CHAPTER_LIST: &str = "chapter-list";
}

pub const SUCCESS: &str = "success";
pub const PROPERTY_UNAVAILABLE: &str = "property unavailable";

#[derive(Debug, Serialize)]
pub struct Request {
    pub command: Vec<Value>,
    pub request_id: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Response {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub request_id: Option<u64>,
    #[serde(default)]
    pub event: Option<String>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.error.as_deref() == Some(SUCCESS)
    }

    pub fn is_event(&self) -> bool {
        self.event.is_some()
    }

    /// `null` 与"属性暂不可用"都视为没有值
    pub fn value(&self) -> Option<&Value> {
        self.data.as_ref().filter(|v| !v.is_null())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    Absolute,
    Relative,
}

impl SeekMode {
    fn as_str(&self) -> &'static str {
        match self {
            SeekMode::Absolute => "absolute",
            SeekMode::Relative => "relative",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    GetProperty(&'static str),
    SetProperty(&'static str, Value),
    Seek(f64, SeekMode),
    /// 以 `key=value` 追加一条脚本选项
    AppendScriptOpt(String, String),
    ShowText(String),
    Quit,
}

impl PlayerCommand {
    pub fn to_args(&self) -> Vec<Value> {
        match self {
            PlayerCommand::GetProperty(name) => vec![json!("get_property"), json!(name)],
            PlayerCommand::SetProperty(name, value) => {
                vec![json!("set_property"), json!(name), value.clone()]
            }
            PlayerCommand::Seek(seconds, mode) => {
                vec![json!("seek"), json!(seconds), json!(mode.as_str())]
            }
            PlayerCommand::AppendScriptOpt(key, value) => vec![
                json!("change-list"),
                json!(property::SCRIPT_OPTS),
                json!("append"),
                json!(format!("{}={}", key, value)),
            ],
            PlayerCommand::ShowText(text) => vec![json!("show-text"), json!(text)],
            PlayerCommand::Quit => vec![json!("quit")],
        }
    }

    pub fn to_request(&self, request_id: u64) -> Request {
        Request {
            command: self.to_args(),
            request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let req = PlayerCommand::Seek(300.0, SeekMode::Absolute).to_request(7);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"command": ["seek", 300.0, "absolute"], "request_id": 7})
        );
        let req = PlayerCommand::AppendScriptOpt("skip-op_start".into(), "10.5".into()).to_request(1);
        assert_eq!(
            req.command,
            vec![json!("change-list"), json!("script-opts"), json!("append"), json!("skip-op_start=10.5")]
        );
    }

    #[test]
    fn test_response_value_and_events() {
        let unavailable: Response =
            serde_json::from_str(r#"{"error":"property unavailable","request_id":3}"#).unwrap();
        assert!(!unavailable.is_success());
        assert!(unavailable.value().is_none());

        let null_pos: Response =
            serde_json::from_str(r#"{"data":null,"error":"success","request_id":4}"#).unwrap();
        assert!(null_pos.is_success());
        assert!(null_pos.value().is_none());

        let event: Response = serde_json::from_str(r#"{"event":"playback-restart"}"#).unwrap();
        assert!(event.is_event());
    }
}
