// src/client.rs

use crate::{config::AppConfig, error::*};
use anyhow::anyhow;
use log::debug;
use reqwest::{IntoUrl, Response, StatusCode, header};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// 元数据请求走带指数退避重试的中间件客户端；
/// 分段下载使用 `plain`，重试由下载器自己的线性退避策略负责。
#[derive(Clone)]
pub struct RobustClient {
    pub client: ClientWithMiddleware,
    pub plain: reqwest::Client,
    config: Arc<AppConfig>,
}

impl RobustClient {
    pub fn new(config: Arc<AppConfig>) -> AppResult<Self> {
        let plain = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.workers * config.batch_concurrency * 2)
            .build()
            .map_err(|e| AppError::Other(anyhow!("HTTP 客户端初始化失败: {}", e)))?;

        let retry_policy =
            ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
        let client = ClientBuilder::new(plain.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            plain,
            config,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn get<T: IntoUrl>(&self, url: T) -> AppResult<Response> {
        self.get_with_referer(url, None).await
    }

    pub async fn get_with_referer<T: IntoUrl>(
        &self,
        url: T,
        referer: Option<&str>,
    ) -> AppResult<Response> {
        let url = url.into_url()?;
        let mut request = self.client.get(url.clone());
        if let Some(referer) = referer {
            request = request.header(header::REFERER, referer);
        }
        let res = request.send().await?;
        debug!("GET {} -> {}", url, res.status());
        if matches!(res.status(), StatusCode::NOT_FOUND | StatusCode::GONE) {
            return Err(AppError::NotFound(format!("{} ({})", url, res.status())));
        }
        Ok(res.error_for_status()?)
    }

    pub async fn get_text(&self, url: &str, referer: Option<&str>) -> AppResult<String> {
        Ok(self.get_with_referer(url, referer).await?.text().await?)
    }

    /// 获取并反序列化 JSON；结构不符时返回 `ApiParseFailed`，提示站点接口可能已变更。
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> AppResult<T> {
        let body = self.get_text(url, referer).await?;
        serde_json::from_str(&body).map_err(|source| AppError::ApiParseFailed {
            url: url.to_string(),
            source,
        })
    }
}
