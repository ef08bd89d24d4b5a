// src/store.rs

//! 观看进度存储。播放逻辑只依赖 `ProgressStore`，具体存储方式可替换。

use crate::error::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub series_key: String,
    pub episode_key: String,
    pub position: f64,
    pub duration: f64,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(&self, series_key: &str, episode_key: &str) -> AppResult<Option<ProgressRecord>>;

    /// 按 (系列键, 剧集键) 插入或覆盖
    async fn put(
        &self,
        series_key: &str,
        episode_key: &str,
        position: f64,
        duration: f64,
        title: &str,
    ) -> AppResult<()>;
}

fn new_record(
    series_key: &str,
    episode_key: &str,
    position: f64,
    duration: f64,
    title: &str,
) -> ProgressRecord {
    ProgressRecord {
        series_key: series_key.to_string(),
        episode_key: episode_key.to_string(),
        position,
        duration,
        title: title.to_string(),
        updated_at: Utc::now(),
    }
}

/// 进程内存储，退出即丢失
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, String), ProgressRecord>>,
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn get(&self, series_key: &str, episode_key: &str) -> AppResult<Option<ProgressRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .get(&(series_key.to_string(), episode_key.to_string()))
            .cloned())
    }

    async fn put(
        &self,
        series_key: &str,
        episode_key: &str,
        position: f64,
        duration: f64,
        title: &str,
    ) -> AppResult<()> {
        let record = new_record(series_key, episode_key, position, duration, title);
        self.records
            .lock()
            .await
            .insert((series_key.to_string(), episode_key.to_string()), record);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    records: Vec<ProgressRecord>,
}

/// 单个 JSON 文件保存全部记录。每次写入都整体重写，先写临时文件再替换。
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> AppResult<StoreDocument> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(StoreDocument::default()),
            Ok(content) => match serde_json::from_str(&content) {
                Ok(doc) => Ok(doc),
                Err(e) => {
                    warn!("进度文件 '{}' 已损坏，将重新创建: {}", self.path.display(), e);
                    Ok(StoreDocument::default())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, doc: &StoreDocument) -> AppResult<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(doc)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ProgressStore for JsonFileStore {
    async fn get(&self, series_key: &str, episode_key: &str) -> AppResult<Option<ProgressRecord>> {
        let _guard = self.lock.lock().await;
        let doc = self.load().await?;
        Ok(doc
            .records
            .into_iter()
            .find(|r| r.series_key == series_key && r.episode_key == episode_key))
    }

    async fn put(
        &self,
        series_key: &str,
        episode_key: &str,
        position: f64,
        duration: f64,
        title: &str,
    ) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        let record = new_record(series_key, episode_key, position, duration, title);
        match doc
            .records
            .iter_mut()
            .find(|r| r.series_key == series_key && r.episode_key == episode_key)
        {
            Some(existing) => *existing = record,
            None => doc.records.push(record),
        }
        self.save(&doc).await?;
        debug!(
            "已保存进度 {}#{} = {:.0}/{:.0}",
            series_key, episode_key, position, duration
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_upserts() {
        let store = MemoryStore::default();
        store.put("show", "1", 10.0, 1400.0, "Show").await.unwrap();
        store.put("show", "1", 320.0, 1400.0, "Show").await.unwrap();
        let record = store.get("show", "1").await.unwrap().unwrap();
        assert_eq!(record.position, 320.0);
        assert!(store.get("show", "2").await.unwrap().is_none());
    }
}
