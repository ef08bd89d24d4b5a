// src/utils.rs

use crate::{constants, error::*};
use anyhow::Context;
use regex::Regex;
use std::{
    ffi::OsStr,
    path::{Component, Path, PathBuf},
    sync::LazyLock,
};
use url::Url;

/// 部分站点不提供可导航的页面，而是一个短的字母数字标识
static OPAQUE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{6,32}$").unwrap());
static ILLEGAL_CHARS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[\\/*?:"<>|]"#).unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static MEDIA_EXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(mp4|mkv|webm|m4v|mov|avi|ts)$").unwrap());

pub fn is_opaque_id(text: &str) -> bool {
    OPAQUE_ID_RE.is_match(text) && Url::parse(text).is_err()
}

pub fn sanitize_filename(name: &str) -> String {
    let original_name = name.trim();
    if original_name.is_empty() { return "unknown".to_string(); }

    let stem = Path::new(original_name)
        .file_stem()
        .unwrap_or_else(|| OsStr::new(original_name))
        .to_string_lossy()
        .to_uppercase();
    let windows_reserved = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];

    let mut name = if windows_reserved.contains(&stem.as_ref()) {
        format!("_{}", original_name)
    } else {
        original_name.to_string()
    };

    name = ILLEGAL_CHARS_RE.replace_all(&name, " ").into_owned();
    name = WHITESPACE_RE.replace_all(&name, " ").trim().to_string();
    name = name.trim_matches(|c: char| c == '.' || c.is_whitespace()).to_string();
    if name.is_empty() { return "unnamed".to_string(); }

    if name.len() > constants::MAX_FILENAME_BYTES {
        name = safe_truncate_utf8(&name, constants::MAX_FILENAME_BYTES).to_string();
    }
    name
}

fn safe_truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes { return s; }
    let mut i = max_bytes;
    while i > 0 && !s.is_char_boundary(i) { i -= 1; }
    &s[..i]
}

pub fn truncate_text(text: &str, max_width: usize) -> String {
    let mut width = 0;
    let mut end_pos = 0;
    for (i, c) in text.char_indices() {
        width += if c.is_ascii() { 1 } else { 2 };
        if width > max_width.saturating_sub(3) {
            end_pos = i;
            break;
        }
    }
    if end_pos == 0 { text.to_string() } else { format!("{}...", &text[..end_pos]) }
}

/// 解析连续的集数范围，如 "3" 或 "1-12"。起止颠倒时自动交换。
pub fn parse_episode_range(range: &str) -> AppResult<(u32, u32)> {
    let range = range.trim();
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|_| AppError::UserInputError(format!("无效的集数范围: '{}'", range)))
    };
    let (start, end) = match range.split_once('-') {
        Some((a, b)) => (parse(a)?, parse(b)?),
        None => {
            let n = parse(range)?;
            (n, n)
        }
    };
    if start == 0 || end == 0 {
        return Err(AppError::UserInputError("集数从 1 开始计数".to_string()));
    }
    Ok((start.min(end), start.max(end)))
}

/// 从 URL 路径推断媒体文件扩展名；播放列表与无扩展名的地址都按 mp4 保存。
pub fn extension_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            MEDIA_EXT_RE
                .captures(u.path())
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_lowercase())
        })
        .filter(|ext| ext != "ts")
        .unwrap_or_else(|| constants::DEFAULT_EXTENSION.to_string())
}

pub fn secure_join_path(base_dir: &Path, relative_path: &Path) -> AppResult<PathBuf> {
    std::fs::create_dir_all(base_dir)?;
    let resolved_base = dunce::canonicalize(base_dir).with_context(|| format!("基础目录 '{:?}' 不存在或无法访问", base_dir))?;
    let mut final_path = resolved_base.clone();
    for component in relative_path.components() {
        match component {
            Component::Normal(part) => final_path.push(part),
            Component::ParentDir => return Err(AppError::UserInputError("检测到路径遍历 '..'".to_string())),
            _ => continue,
        }
    }
    if !final_path.starts_with(&resolved_base) {
        return Err(AppError::UserInputError(format!("非法的保存路径: '{:?}'", relative_path)));
    }
    Ok(final_path)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_episode_range() {
        assert_eq!(parse_episode_range("1-12").unwrap(), (1, 12));
        assert_eq!(parse_episode_range(" 7 ").unwrap(), (7, 7));
        // 起止颠倒
        assert_eq!(parse_episode_range("5-2").unwrap(), (2, 5));
        assert!(parse_episode_range("0-3").is_err());
        assert!(parse_episode_range("a-b").is_err());
        assert!(parse_episode_range("").is_err());
    }

    #[test]
    fn test_is_opaque_id() {
        assert!(is_opaque_id("ReooPAxPMsHM4KPMY"));
        assert!(!is_opaque_id("https://example.com/watch/1"));
        assert!(!is_opaque_id("abc"));
        assert!(!is_opaque_id("has space inside"));
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(extension_from_url("https://cdn.example.com/v/ep1.MKV?t=1"), "mkv");
        assert_eq!(extension_from_url("https://cdn.example.com/hls/master.m3u8"), "mp4");
        assert_eq!(extension_from_url("https://cdn.example.com/seg/001.ts"), "mp4");
        assert_eq!(extension_from_url("not a url"), "mp4");
    }

    #[test]
    fn test_sanitize_filename() {
        // 测试非法字符
        assert_eq!(sanitize_filename("a\\b/c:d*e?f\"g<h>i|j"), "a b c d e f g h i j".to_string());

        // 测试首尾空格和点
        assert_eq!(sanitize_filename(" . my show. "), "my show".to_string());

        // 测试 Windows 保留字 (大小写不敏感)
        assert_eq!(sanitize_filename("CON.txt"), "_CON.txt".to_string());

        // 测试空或只有非法字符的输入
        assert_eq!(sanitize_filename(""), "unknown".to_string());
        assert_eq!(sanitize_filename("<>|"), "unnamed".to_string());

        let very_long_name = "长".repeat(100);
        assert!(sanitize_filename(&very_long_name).len() <= constants::MAX_FILENAME_BYTES);
    }

    #[test]
    fn test_secure_join_rejects_traversal() {
        let dir = std::env::temp_dir().join("ep-dl-utils-test");
        assert!(secure_join_path(&dir, Path::new("../escape")).is_err());
        let joined = secure_join_path(&dir, Path::new("Show/Episode 1.mp4")).unwrap();
        assert!(joined.ends_with("Show/Episode 1.mp4"));
    }
}
