// src/episodes.rs

//! 剧集列表提供方：把命令行给出的模板、ID 或链接文件展开成 `EpisodeRef` 列表。

use crate::{
    error::*,
    models::{EpisodeRef, EpisodeSource, SeriesRef},
};
use log::debug;
use std::{path::PathBuf, sync::Arc};

pub trait EpisodeProvider: Send + Sync {
    fn series(&self) -> Arc<SeriesRef>;
    fn episodes(&self) -> AppResult<Vec<EpisodeRef>>;
}

/// 页面链接模板，`{ep}` 替换为集数
pub struct TemplateEpisodes {
    series: Arc<SeriesRef>,
    template: String,
    range: (u32, u32),
}

impl TemplateEpisodes {
    pub fn new(series: Arc<SeriesRef>, template: impl Into<String>, range: (u32, u32)) -> AppResult<Self> {
        let template = template.into();
        if !template.contains("{ep}") {
            return Err(AppError::UserInputError(format!(
                "链接模板 '{}' 中缺少 {{ep}} 占位符",
                template
            )));
        }
        Ok(Self {
            series,
            template,
            range,
        })
    }
}

impl EpisodeProvider for TemplateEpisodes {
    fn series(&self) -> Arc<SeriesRef> {
        self.series.clone()
    }

    fn episodes(&self) -> AppResult<Vec<EpisodeRef>> {
        Ok((self.range.0..=self.range.1)
            .map(|n| EpisodeRef {
                number: n.to_string(),
                series: self.series.clone(),
                source: EpisodeSource::Page(self.template.replace("{ep}", &n.to_string())),
                duration_hint: None,
            })
            .collect())
    }
}

/// 不透明系列 ID + 集数范围
pub struct OpaqueEpisodes {
    series: Arc<SeriesRef>,
    id: String,
    range: (u32, u32),
}

impl OpaqueEpisodes {
    pub fn new(series: Arc<SeriesRef>, id: impl Into<String>, range: (u32, u32)) -> Self {
        Self {
            series,
            id: id.into(),
            range,
        }
    }
}

impl EpisodeProvider for OpaqueEpisodes {
    fn series(&self) -> Arc<SeriesRef> {
        self.series.clone()
    }

    fn episodes(&self) -> AppResult<Vec<EpisodeRef>> {
        Ok((self.range.0..=self.range.1)
            .map(|n| EpisodeRef {
                number: n.to_string(),
                series: self.series.clone(),
                source: EpisodeSource::Opaque(self.id.clone()),
                duration_hint: None,
            })
            .collect())
    }
}

/// 文本文件中每行一个页面链接，空行与 `#` 开头的行忽略，按顺序从 1 编号
pub struct ListEpisodes {
    series: Arc<SeriesRef>,
    path: PathBuf,
}

impl ListEpisodes {
    pub fn new(series: Arc<SeriesRef>, path: impl Into<PathBuf>) -> Self {
        Self {
            series,
            path: path.into(),
        }
    }

    pub fn parse(series: &Arc<SeriesRef>, content: &str) -> Vec<EpisodeRef> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .enumerate()
            .map(|(i, url)| EpisodeRef {
                number: (i + 1).to_string(),
                series: series.clone(),
                source: EpisodeSource::Page(url.to_string()),
                duration_hint: None,
            })
            .collect()
    }
}

impl EpisodeProvider for ListEpisodes {
    fn series(&self) -> Arc<SeriesRef> {
        self.series.clone()
    }

    fn episodes(&self) -> AppResult<Vec<EpisodeRef>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            AppError::UserInputError(format!("无法读取链接文件 '{}': {}", self.path.display(), e))
        })?;
        let episodes = Self::parse(&self.series, &content);
        debug!("从 {} 读取到 {} 个链接", self.path.display(), episodes.len());
        if episodes.is_empty() {
            return Err(AppError::UserInputError(format!(
                "链接文件 '{}' 中没有任何链接",
                self.path.display()
            )));
        }
        Ok(episodes)
    }
}
