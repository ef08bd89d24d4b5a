// src/skiptimes.rs

use crate::{
    client::RobustClient,
    error::*,
    models::{
        Interval, SkipIntervals,
        api::{SkipTimeResult, SkipTimesResponse},
    },
};
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

/// 片头片尾区间数据集
#[async_trait]
pub trait SkipTimeSource: Send + Sync {
    async fn lookup(&self, series_id: &str, episode: &str) -> AppResult<SkipIntervals>;
}

pub struct NoSkipTimes;

#[async_trait]
impl SkipTimeSource for NoSkipTimes {
    async fn lookup(&self, _series_id: &str, _episode: &str) -> AppResult<SkipIntervals> {
        Ok(SkipIntervals::default())
    }
}

/// 按模板 (`{id}`、`{episode}`) 请求 JSON 数据集
pub struct HttpSkipTimes {
    http_client: Arc<RobustClient>,
    template: String,
}

impl HttpSkipTimes {
    pub fn new(http_client: Arc<RobustClient>, template: impl Into<String>) -> Self {
        Self {
            http_client,
            template: template.into(),
        }
    }

    pub fn lookup_url(&self, series_id: &str, episode: &str) -> String {
        self.template
            .replace("{id}", series_id)
            .replace("{episode}", episode)
    }
}

/// 同类区间只取第一条；`mixed-op`/`mixed-ed` 视同 `op`/`ed`。
pub fn intervals_from_response(response: &SkipTimesResponse) -> SkipIntervals {
    if !response.found {
        return SkipIntervals::default();
    }
    let pick = |kind: &str| {
        response
            .results
            .iter()
            .find(|r: &&SkipTimeResult| r.skip_type.trim_start_matches("mixed-") == kind)
            .map(|r| Interval {
                start: r.interval.start_time,
                end: r.interval.end_time,
            })
            .filter(|i| i.end > i.start)
    };
    SkipIntervals {
        op: pick("op"),
        ed: pick("ed"),
    }
}

#[async_trait]
impl SkipTimeSource for HttpSkipTimes {
    async fn lookup(&self, series_id: &str, episode: &str) -> AppResult<SkipIntervals> {
        let url = self.lookup_url(series_id, episode);
        let response: SkipTimesResponse = match self.http_client.fetch_json(&url, None).await {
            Ok(response) => response,
            // 数据集里没有这一集
            Err(AppError::NotFound(_)) => return Ok(SkipIntervals::default()),
            Err(e) => return Err(e),
        };
        let intervals = intervals_from_response(&response);
        debug!("{} 第 {} 集跳过区间: {:?}", series_id, episode, intervals);
        Ok(intervals)
    }
}
