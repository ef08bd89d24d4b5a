// src/models/api.rs

use serde::Deserialize;

// --- 多清晰度 JSON 端点 ---

/// `{"data":[{"src":<url>,"label":<string>}, ...]}`
#[derive(Deserialize, Debug, Clone)]
pub struct SourceListResponse {
    pub data: Vec<SourceEntry>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SourceEntry {
    pub src: String,
    #[serde(default)]
    pub label: String,
}

/// 不透明 ID 来源的链接文档: `{"links":[{"link","resolutionStr","hls"}]}`
#[derive(Deserialize, Debug, Clone)]
pub struct LinkListResponse {
    pub links: Vec<LinkEntry>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LinkEntry {
    pub link: String,
    #[serde(default)]
    pub resolution_str: String,
    #[serde(default)]
    pub hls: bool,
}

// --- 不透明 ID 的剧集 API ---

#[derive(Deserialize, Debug, Clone)]
pub struct EpisodeApiResponse {
    pub data: Option<EpisodeApiData>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct EpisodeApiData {
    pub episode: Option<EpisodeApiEpisode>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeApiEpisode {
    #[serde(default)]
    pub source_urls: Vec<SourceUrlEntry>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SourceUrlEntry {
    pub source_url: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub priority: f64,
}

// --- 片头片尾数据集 ---

#[derive(Deserialize, Debug, Clone)]
pub struct SkipTimesResponse {
    #[serde(default)]
    pub found: bool,
    #[serde(default)]
    pub results: Vec<SkipTimeResult>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SkipTimeResult {
    pub interval: SkipTimeInterval,
    pub skip_type: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SkipTimeInterval {
    pub start_time: f64,
    pub end_time: f64,
}
