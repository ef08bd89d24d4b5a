// src/config/loader.rs

use crate::{
    config::ExternalConfig, // 只需要从父模块导入结构体定义
    constants,
    error::{AppError, AppResult},
};
use anyhow::{Context, anyhow};
use log::{debug, info};
use std::{fs, path::PathBuf};

pub(crate) fn config_dir() -> AppResult<PathBuf> {
    let path = dirs::home_dir()
        .ok_or_else(|| AppError::Other(anyhow!("无法获取用户主目录")))?
        .join(constants::CONFIG_DIR_NAME);
    Ok(path)
}

pub(super) fn get_config_path() -> AppResult<PathBuf> {
    Ok(config_dir()?.join(constants::CONFIG_FILE_NAME))
}

pub(super) fn default_store_path() -> AppResult<PathBuf> {
    Ok(config_dir()?.join(constants::STORE_FILE_NAME))
}

pub(crate) fn load_or_create_external_config() -> AppResult<ExternalConfig> {
    let config_path = get_config_path()?;
    if config_path.is_file() {
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("读取配置文件 '{}' 失败", config_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("解析配置文件 '{}' 失败", config_path.display()))
            .map_err(AppError::from)
    } else {
        info!("配置文件 {:?} 不存在，将创建默认配置。", config_path);
        let config = ExternalConfig::default_app_config();

        if let Some(dir) = config_path.parent() {
            fs::create_dir_all(dir)?;
        }

        let json_content = serde_json::to_string_pretty(&config)?;
        fs::write(&config_path, json_content)?;

        Ok(config)
    }
}

/// 按 命令行参数 > 环境变量 > 配置文件 > 内置默认值 的顺序确定播放器命令，
/// 同时返回来源说明用于日志。
pub fn resolve_player_command(
    cli_player: Option<&str>,
    external: &ExternalConfig,
) -> (String, String) {
    if let Some(player) = cli_player
        && !player.trim().is_empty()
    {
        debug!("使用来自命令行参数的播放器");
        return (player.trim().to_string(), "命令行参数".to_string());
    }
    if let Ok(player) = std::env::var(constants::PLAYER_ENV_KEY)
        && !player.trim().is_empty()
    {
        debug!("使用来自环境变量 {} 的播放器", constants::PLAYER_ENV_KEY);
        return (
            player.trim().to_string(),
            format!("环境变量 ({})", constants::PLAYER_ENV_KEY),
        );
    }
    if let Some(player) = external.player.command.as_deref()
        && !player.trim().is_empty()
    {
        debug!("使用来自本地配置文件的播放器");
        return (player.trim().to_string(), "本地配置文件".to_string());
    }
    (
        constants::player::DEFAULT_COMMAND.to_string(),
        "内置默认值".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_player_wins() {
        let external = ExternalConfig::default_app_config();
        let (player, source) = resolve_player_command(Some("vlc"), &external);
        assert_eq!(player, "vlc");
        assert_eq!(source, "命令行参数");
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let mut external = ExternalConfig::default();
        external.player.command = Some("  ".into());
        // 环境变量可能在测试机上存在，只断言空白值不会被采用
        let (player, _) = resolve_player_command(Some(""), &external);
        assert!(!player.trim().is_empty());
    }
}
