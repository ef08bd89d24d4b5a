// src/extractor/mod.rs

pub mod decoder;
pub mod opaque;
pub mod page;
mod utils;

use crate::{
    client::RobustClient,
    config::AppConfig,
    error::*,
    models::{EpisodeRef, EpisodeSource, StreamDescriptor},
};
use async_trait::async_trait;
use std::sync::Arc;

pub use self::{opaque::OpaqueResolver, page::PageResolver};

/// 把一集解析为可播放或可下载的视频源描述。每次调用都会重新请求。
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve(&self, episode: &EpisodeRef) -> AppResult<StreamDescriptor>;
}

/// 按剧集来源形态分派到页面解析或不透明 ID 解析。
pub struct SourceAdapter {
    page: PageResolver,
    opaque: OpaqueResolver,
}

impl SourceAdapter {
    pub fn new(http_client: Arc<RobustClient>, config: Arc<AppConfig>) -> Self {
        Self {
            page: PageResolver::new(http_client.clone(), config.clone()),
            opaque: OpaqueResolver::new(http_client, config),
        }
    }
}

#[async_trait]
impl StreamResolver for SourceAdapter {
    async fn resolve(&self, episode: &EpisodeRef) -> AppResult<StreamDescriptor> {
        let descriptor = match &episode.source {
            EpisodeSource::Page(_) => self.page.resolve(episode).await?,
            EpisodeSource::Opaque(_) => self.opaque.resolve(episode).await?,
        };
        log::info!(
            "{} 解析完成: {} 个清晰度, 类型 {:?}, 来源 {}",
            episode.display_name(),
            descriptor.variants.len(),
            descriptor.kind,
            descriptor.provider
        );
        Ok(descriptor)
    }
}
