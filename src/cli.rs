// src/cli.rs

use crate::constants;
use clap::{Parser, ValueEnum, crate_version};
use std::path::PathBuf;

/// 定义日志输出级别
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// 不透明 ID 来源的翻译类型
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum TranslationMode {
    Sub,
    Dub,
}

impl TranslationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationMode::Sub => "sub",
            TranslationMode::Dub => "dub",
        }
    }
}

// command 属性
#[derive(Parser, Debug, Clone)]
#[command(
    version = crate_version!(),
    about,
    long_about = None,
    arg_required_else_help = true,
    disable_help_flag = true,
    disable_version_flag = true,
)]
#[command(group(
    clap::ArgGroup::new("run_mode")
        .required(true)
        .args(&["interactive", "url", "id", "url_template", "list"]),
))]
pub struct Cli {
    // --- 运行模式 (Mode) ---
    /// 启动交互式会话，逐一输入剧集页面链接或 ID
    #[arg(short, long, action = clap::ArgAction::SetTrue, help_heading = "Mode")]
    pub interactive: bool,
    /// 指定单集页面链接
    #[arg(long, help_heading = "Mode")]
    pub url: Option<String>,
    /// 通过不透明的系列 ID 播放或下载 (需配合 --episodes 使用)
    #[arg(long, help_heading = "Mode", requires = "episodes")]
    pub id: Option<String>,
    /// 剧集页面链接模板，用 {ep} 表示集数 (需配合 --episodes 使用)
    #[arg(long, value_name = "TEMPLATE", help_heading = "Mode", requires = "episodes")]
    pub url_template: Option<String>,
    /// 从文本文件读取剧集页面链接 (每行一个，按顺序编号)
    #[arg(short, long, value_name = "FILE", help_heading = "Mode")]
    pub list: Option<PathBuf>,

    // --- 选项 (Options) ---
    /// 集数范围，例如 '1-12' 或 '5'
    #[arg(short, long, value_name = "RANGE", help_heading = "Options")]
    pub episodes: Option<String>,
    /// 选择清晰度: 'best'(最高), 'worst'(最低), 'ask'(询问一次), 或具体值 '720' 等
    #[arg(short='q', long, default_value_t = constants::DEFAULT_VIDEO_QUALITY.to_string(), help_heading = "Options")]
    pub quality: String,
    /// 批量下载而不是播放
    #[arg(short, long, action = clap::ArgAction::SetTrue, help_heading = "Options")]
    pub download: bool,
    /// 先下载到本地，再从本地文件播放
    #[arg(long, action = clap::ArgAction::SetTrue, help_heading = "Options", conflicts_with = "download")]
    pub download_first: bool,
    /// 每个文件的分段下载线程数
    #[arg(short, long, value_parser = clap::value_parser!(usize), help_heading = "Options")]
    pub workers: Option<usize>,
    /// 批量模式下同时下载的剧集数
    #[arg(short, long, value_parser = clap::value_parser!(usize), help_heading = "Options")]
    pub jobs: Option<usize>,
    /// 设置文件保存目录
    #[arg(short, long, value_name = "DIR", help_heading = "Options")]
    pub output: Option<PathBuf>,
    /// 播放器命令 (默认 mpv，也可通过环境变量 EP_DL_PLAYER 指定)
    #[arg(long, help_heading = "Options")]
    pub player: Option<String>,
    /// 追加传给播放器的参数 (可重复)
    #[arg(long = "player-arg", value_name = "ARG", allow_hyphen_values = true, help_heading = "Options")]
    pub player_args: Vec<String>,
    /// 系列标题 (用于保存目录和观看进度)
    #[arg(long, help_heading = "Options")]
    pub title: Option<String>,
    /// [ID模式] 翻译类型
    #[arg(long, value_enum, default_value_t = TranslationMode::Sub, help_heading = "Options")]
    pub mode: TranslationMode,
    /// 片头片尾数据集使用的系列 ID
    #[arg(long, help_heading = "Options")]
    pub skip_id: Option<String>,
    /// 不询问、不恢复上次观看进度
    #[arg(long, action = clap::ArgAction::SetTrue, help_heading = "Options")]
    pub no_resume: bool,
    /// 非交互模式: 不弹出任何提示，使用默认选择
    #[arg(short = 'y', long, action = clap::ArgAction::SetTrue, help_heading = "Options")]
    pub yes: bool,

    // --- 通用选项 (General) ---
    /// 显示此帮助信息并退出
    #[arg(short = 'h', long, action = clap::ArgAction::Help, global = true, help_heading = "General")]
    _help: Option<bool>,
    /// 显示版本信息并退出
    #[arg(short = 'V', long, action = clap::ArgAction::Version, global = true, help_heading = "General")]
    _version: Option<bool>,
    /// (隐藏参数) 设置日志文件的输出级别，用于调试
    #[arg(long, value_enum, default_value_t = LogLevel::Off, global = true, hide = true)]
    pub log_level: LogLevel,
}
