// src/extractor/page.rs

use super::{StreamResolver, utils as extractor_utils};
use crate::{
    client::RobustClient,
    config::AppConfig,
    error::*,
    models::{
        EpisodeRef, EpisodeSource, SourceKind, StreamDescriptor, api::SourceListResponse,
        host_matches,
    },
};
use async_trait::async_trait;
use log::{debug, info};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use url::Url;

static VIDEO_SRC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<video\b[^>]*?\ssrc\s*=\s*["']([^"']+)["']"#).unwrap());
static VIDEO_SOURCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<video\b.*?<source\b[^>]*?\ssrc\s*=\s*["']([^"']+)["']"#).unwrap()
});
static ABSOLUTE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>\\]+"#).unwrap());
static MEDIA_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[^\s"'<>\\]+?\.(?:mp4|m3u8|mkv|webm)(?:\?[^\s"'<>\\]*)?"#).unwrap()
});

/// 按优先级排列的数据属性
const DATA_ATTRIBUTES: &[&str] = &["data-video-src", "data-stream-src", "data-sources", "data-src"];

static DATA_ATTRIBUTE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    DATA_ATTRIBUTES
        .iter()
        .map(|attr| {
            Regex::new(&format!(r#"(?i){}\s*=\s*["']([^"']+)["']"#, regex::escape(attr))).unwrap()
        })
        .collect()
});

/// 通过抓取剧集页面解析视频源。
pub struct PageResolver {
    http_client: Arc<RobustClient>,
    config: Arc<AppConfig>,
}

impl PageResolver {
    pub fn new(http_client: Arc<RobustClient>, config: Arc<AppConfig>) -> Self {
        Self {
            http_client,
            config,
        }
    }

    pub async fn resolve_page(&self, page_url: &str) -> AppResult<StreamDescriptor> {
        let page = Url::parse(page_url)?;
        info!("开始解析页面: {}", page);
        let body = self.http_client.get_text(page.as_str(), None).await?;

        let reference = self
            .find_reference(&body)
            .ok_or_else(|| AppError::NotFound(format!("页面 {} 中没有可识别的视频引用", page)))?;
        let reference = extractor_utils::normalize_reference(&reference, &page)?;
        debug!("页面 {} 中找到视频引用: {}", page, reference);

        let provider = page.host_str().unwrap_or_default().to_string();
        if extractor_utils::looks_like_json_endpoint(&reference) {
            let endpoint = Url::parse(&reference)?;
            let list: SourceListResponse = self
                .http_client
                .fetch_json(endpoint.as_str(), Some(page.as_str()))
                .await?;
            debug!("JSON 端点 {} 返回 {} 个清晰度", endpoint, list.data.len());
            let mut descriptor = extractor_utils::descriptor_from_source_list(
                list,
                &endpoint,
                &self.config.embed_domains,
                provider,
            )?;
            descriptor.referer = Some(page.to_string());
            return Ok(descriptor);
        }

        let kind = SourceKind::classify(&reference, &self.config.embed_domains);
        let mut descriptor = StreamDescriptor::single(reference, String::new(), kind, provider);
        descriptor.referer = Some(page.to_string());
        Ok(descriptor)
    }

    /// 依次尝试: 原生 video 元素 -> 已知数据属性 -> 第三方嵌入地址 -> 直链媒体地址
    fn find_reference(&self, body: &str) -> Option<String> {
        if let Some(src) = capture_first(&VIDEO_SRC_RE, body).or_else(|| capture_first(&VIDEO_SOURCE_RE, body)) {
            debug!("命中 video 元素");
            return Some(src);
        }
        for (attr, re) in DATA_ATTRIBUTES.iter().zip(DATA_ATTRIBUTE_RES.iter()) {
            if let Some(value) = capture_first(re, body) {
                debug!("命中数据属性 {}", attr);
                return Some(value);
            }
        }

        let text = extractor_utils::html_unescape(body);
        if let Some(embed) = ABSOLUTE_URL_RE.find_iter(&text).map(|m| m.as_str()).find(|candidate| {
            Url::parse(candidate)
                .ok()
                .and_then(|u| u.host_str().map(|h| host_matches(h, &self.config.embed_domains)))
                .unwrap_or(false)
        }) {
            debug!("命中第三方嵌入地址");
            return Some(embed.to_string());
        }
        MEDIA_URL_RE.find(&text).map(|m| {
            debug!("命中直链媒体地址");
            m.as_str().to_string()
        })
    }
}

fn capture_first(re: &Regex, body: &str) -> Option<String> {
    re.captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl StreamResolver for PageResolver {
    async fn resolve(&self, episode: &EpisodeRef) -> AppResult<StreamDescriptor> {
        match &episode.source {
            EpisodeSource::Page(url) => self.resolve_page(url).await,
            EpisodeSource::Opaque(id) => Err(AppError::UnsupportedSource(format!(
                "'{}' 不是页面链接",
                id
            ))),
        }
    }
}
