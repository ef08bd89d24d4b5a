// src/extractor/utils.rs

use crate::{
    error::*,
    models::{SourceKind, StreamDescriptor, StreamVariant, api::SourceListResponse},
};
use percent_encoding::percent_decode_str;
use url::Url;

/// 页面属性值里常见的实体与转义
pub fn html_unescape(raw: &str) -> String {
    raw.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x2F;", "/")
        .replace("\\/", "/")
}

/// 把从页面中取到的引用整理为绝对地址：去实体、解百分号编码、相对路径补全。
pub fn normalize_reference(raw: &str, base: &Url) -> AppResult<String> {
    let mut value = html_unescape(raw.trim());
    let lower = value.to_ascii_lowercase();
    if lower.starts_with("http%3a") || lower.starts_with("https%3a") {
        value = percent_decode_str(&value).decode_utf8_lossy().into_owned();
    }
    if value.starts_with("//") {
        value = format!("{}:{}", base.scheme(), value);
    }
    Ok(base.join(&value)?.to_string())
}

/// 引用本身是否是列出多个清晰度的 JSON 端点
pub fn looks_like_json_endpoint(url: &str) -> bool {
    Url::parse(url).is_ok_and(|u| {
        let path = u.path().to_ascii_lowercase();
        path.ends_with(".json") || path.contains("/api/") || path.ends_with("/sources")
    })
}

/// 将 `{"data":[{"src","label"}]}` 转换为多清晰度描述；空列表视为未找到。
pub fn descriptor_from_source_list(
    list: SourceListResponse,
    base: &Url,
    embed_domains: &[String],
    provider: String,
) -> AppResult<StreamDescriptor> {
    let variants = list
        .data
        .into_iter()
        .filter(|entry| !entry.src.trim().is_empty())
        .map(|entry| {
            Ok(StreamVariant {
                url: normalize_reference(&entry.src, base)?,
                label: entry.label,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    let Some(first) = variants.first() else {
        return Err(AppError::NotFound(format!("{} 的清晰度列表为空", base)));
    };
    let kind = SourceKind::classify(&first.url, embed_domains);
    Ok(StreamDescriptor {
        variants,
        kind,
        provider,
        referer: Some(base.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_reference() {
        let base = Url::parse("https://site.example/watch/show/ep-1").unwrap();
        assert_eq!(
            normalize_reference("/media/ep1.mp4?a=1&amp;b=2", &base).unwrap(),
            "https://site.example/media/ep1.mp4?a=1&b=2"
        );
        assert_eq!(
            normalize_reference("//cdn.example/v.m3u8", &base).unwrap(),
            "https://cdn.example/v.m3u8"
        );
        assert_eq!(
            normalize_reference("https%3A%2F%2Fcdn.example%2Fv.mp4", &base).unwrap(),
            "https://cdn.example/v.mp4"
        );
    }

    #[test]
    fn test_looks_like_json_endpoint() {
        assert!(looks_like_json_endpoint("https://a.b/api/source/123"));
        assert!(looks_like_json_endpoint("https://a.b/ep/1/sources.json"));
        assert!(!looks_like_json_endpoint("https://a.b/ep/1/video.mp4"));
    }
}
