// src/extractor/opaque.rs

use super::{StreamResolver, decoder};
use crate::{
    client::RobustClient,
    config::AppConfig,
    constants,
    error::*,
    models::{
        EpisodeRef, EpisodeSource, SourceKind, StreamDescriptor, StreamVariant,
        api::{EpisodeApiResponse, LinkListResponse, SourceUrlEntry},
    },
};
use async_trait::async_trait;
use itertools::Itertools;
use log::{debug, info, warn};
use regex::Regex;
use serde_json::json;
use std::sync::{Arc, LazyLock};
use url::Url;

static SOURCE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""sourceUrl":"([^"]+)"(?:[^{}]*?"sourceName":"([^"]*)")?"#).unwrap()
});

/// 获取某一集的候选来源列表
#[async_trait]
trait SourceListStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch_entries(
        &self,
        id: &str,
        mode: &str,
        episode: &str,
    ) -> AppResult<Vec<SourceUrlEntry>>;
}

/// 直接调用站点的查询接口
struct ApiStrategy {
    http_client: Arc<RobustClient>,
    config: Arc<AppConfig>,
}

#[async_trait]
impl SourceListStrategy for ApiStrategy {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn fetch_entries(
        &self,
        id: &str,
        mode: &str,
        episode: &str,
    ) -> AppResult<Vec<SourceUrlEntry>> {
        let mut url = Url::parse(&self.config.opaque_api_base)?.join("api")?;
        let variables = json!({
            "showId": id,
            "translationType": mode,
            "episodeString": episode,
        });
        url.query_pairs_mut()
            .append_pair("variables", &variables.to_string())
            .append_pair("query", constants::sources::OPAQUE_EPISODE_QUERY);

        let response: EpisodeApiResponse = self
            .http_client
            .fetch_json(url.as_str(), Some(&self.config.opaque_referer))
            .await?;
        let entries = response
            .data
            .and_then(|d| d.episode)
            .map(|e| e.source_urls)
            .unwrap_or_default();
        if entries.is_empty() {
            return Err(AppError::NotFound(format!(
                "接口没有返回 {} 第 {} 集 ({}) 的来源",
                id, episode, mode
            )));
        }
        Ok(entries)
    }
}

/// 接口不可用时退回到抓取播放页，从内嵌数据里找 sourceUrl
struct PageScanStrategy {
    http_client: Arc<RobustClient>,
    config: Arc<AppConfig>,
}

impl PageScanStrategy {
    fn page_url(&self, id: &str, mode: &str, episode: &str) -> String {
        self.config
            .opaque_plain_template
            .replace("{site}", self.config.opaque_referer.trim_end_matches('/'))
            .replace("{id}", id)
            .replace("{episode}", episode)
            .replace("{mode}", mode)
    }
}

#[async_trait]
impl SourceListStrategy for PageScanStrategy {
    fn name(&self) -> &'static str {
        "page-scan"
    }

    async fn fetch_entries(
        &self,
        id: &str,
        mode: &str,
        episode: &str,
    ) -> AppResult<Vec<SourceUrlEntry>> {
        let url = self.page_url(id, mode, episode);
        let body = self
            .http_client
            .get_text(&url, Some(&self.config.opaque_referer))
            .await?
            .replace("\\\"", "\"")
            .replace("\\u002F", "/");

        let found: Vec<_> = SOURCE_URL_RE
            .captures_iter(&body)
            .filter_map(|c| {
                let source_url = c.get(1)?.as_str().to_string();
                let source_name = c.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
                Some((source_url, source_name))
            })
            .unique_by(|(u, _)| u.clone())
            .collect();
        if found.is_empty() {
            return Err(AppError::NotFound(format!("播放页 {} 中没有 sourceUrl", url)));
        }
        // 页面中的出现顺序即优先级
        let total = found.len();
        Ok(found
            .into_iter()
            .enumerate()
            .map(|(i, (source_url, source_name))| SourceUrlEntry {
                source_url,
                source_name,
                priority: (total - i) as f64,
            })
            .collect())
    }
}

/// 不透明 ID 来源：先取得候选来源列表，再把混淆链接还原为可播放的清晰度列表。
pub struct OpaqueResolver {
    http_client: Arc<RobustClient>,
    config: Arc<AppConfig>,
    strategies: Vec<Box<dyn SourceListStrategy>>,
}

impl OpaqueResolver {
    pub fn new(http_client: Arc<RobustClient>, config: Arc<AppConfig>) -> Self {
        let strategies: Vec<Box<dyn SourceListStrategy>> = vec![
            Box::new(ApiStrategy {
                http_client: http_client.clone(),
                config: config.clone(),
            }),
            Box::new(PageScanStrategy {
                http_client: http_client.clone(),
                config: config.clone(),
            }),
        ];
        Self {
            http_client,
            config,
            strategies,
        }
    }

    pub async fn resolve_opaque(
        &self,
        id: &str,
        mode: &str,
        episode: &str,
    ) -> AppResult<StreamDescriptor> {
        info!("解析不透明 ID: {} 第 {} 集 ({})", id, episode, mode);
        let entries = self.fetch_entries(id, mode, episode).await?;

        let mut last_error = None;
        for entry in entries
            .into_iter()
            .sorted_by(|a, b| b.priority.total_cmp(&a.priority))
        {
            match self.descriptor_from_entry(&entry).await {
                Ok(Some(descriptor)) => {
                    debug!(
                        "来源 '{}' 提供 {} 个清晰度",
                        descriptor.provider,
                        descriptor.variants.len()
                    );
                    return Ok(descriptor);
                }
                Ok(None) => debug!("跳过无法识别的来源: {}", entry.source_url),
                Err(e) => {
                    warn!("来源 '{}' 解析失败: {}", entry.source_name, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            AppError::NotFound(format!("{} 第 {} 集没有可用的来源", id, episode))
        }))
    }

    async fn fetch_entries(
        &self,
        id: &str,
        mode: &str,
        episode: &str,
    ) -> AppResult<Vec<SourceUrlEntry>> {
        let mut last_error = None;
        for strategy in &self.strategies {
            match strategy.fetch_entries(id, mode, episode).await {
                Ok(entries) => {
                    debug!("策略 '{}' 找到 {} 个来源", strategy.name(), entries.len());
                    return Ok(entries);
                }
                Err(e) => {
                    warn!("策略 '{}' 失败: {}", strategy.name(), e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| AppError::NotFound(id.to_string())))
    }

    async fn descriptor_from_entry(
        &self,
        entry: &SourceUrlEntry,
    ) -> AppResult<Option<StreamDescriptor>> {
        let provider = entry.source_name.clone();
        let referer = Some(self.config.opaque_referer.clone());

        if let Some(token) = entry.source_url.strip_prefix("--") {
            let links_url = self.links_url(&decoder::decode(token))?;
            debug!("还原后的链接文档地址: {}", links_url);
            let document: LinkListResponse = self
                .http_client
                .fetch_json(links_url.as_str(), referer.as_deref())
                .await?;

            let any_hls = document.links.iter().any(|l| l.hls);
            let variants: Vec<StreamVariant> = document
                .links
                .into_iter()
                .filter(|l| !l.link.is_empty())
                .map(|l| StreamVariant {
                    label: l.resolution_str,
                    url: l.link,
                })
                .collect();
            let Some(first) = variants.first() else {
                return Err(AppError::NotFound(format!("链接文档 {} 为空", links_url)));
            };
            let kind = if any_hls {
                SourceKind::AdaptivePlaylist
            } else {
                SourceKind::classify(&first.url, &self.config.embed_domains)
            };
            return Ok(Some(StreamDescriptor {
                variants,
                kind,
                provider,
                referer,
            }));
        }

        if entry.source_url.starts_with("http://") || entry.source_url.starts_with("https://") {
            let kind = SourceKind::classify(&entry.source_url, &self.config.embed_domains);
            let mut descriptor =
                StreamDescriptor::single(entry.source_url.clone(), String::new(), kind, provider);
            descriptor.referer = referer;
            return Ok(Some(descriptor));
        }
        Ok(None)
    }

    fn links_url(&self, decoded: &str) -> AppResult<Url> {
        let path = rewrite_clock_path(decoded);
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(Url::parse(&path)?);
        }
        Ok(Url::parse(&self.config.opaque_link_base)?.join(&path)?)
    }
}

/// `/clock` 端点返回 HTML，`/clock.json` 才是链接文档
fn rewrite_clock_path(path: &str) -> String {
    if path.contains("/clock") && !path.contains("/clock.json") {
        path.replacen("/clock", "/clock.json", 1)
    } else {
        path.to_string()
    }
}

#[async_trait]
impl StreamResolver for OpaqueResolver {
    async fn resolve(&self, episode: &EpisodeRef) -> AppResult<StreamDescriptor> {
        let EpisodeSource::Opaque(id) = &episode.source else {
            return Err(AppError::UnsupportedSource(format!(
                "{} 不是不透明 ID 来源",
                episode.display_name()
            )));
        };
        let Some(mode) = episode.series.mode.as_deref() else {
            return Err(AppError::UnsupportedSource(format!(
                "'{}' 缺少翻译类型 (sub/dub)",
                id
            )));
        };
        if episode.number.trim().is_empty() {
            return Err(AppError::UnsupportedSource(format!("'{}' 缺少集数", id)));
        }
        self.resolve_opaque(id, mode, episode.number.trim()).await
    }
}
