// src/quality.rs

use crate::{
    error::*,
    models::{StreamDescriptor, StreamVariant},
    ui,
};
use log::{debug, info, warn};
use regex::Regex;
use std::{
    cmp::Reverse,
    str::FromStr,
    sync::{LazyLock, Mutex},
};

static FIRST_DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityPolicy {
    Best,
    Worst,
    Label(String),
    Interactive,
}

impl FromStr for QualityPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_lowercase().as_str() {
            "" | "best" => Ok(Self::Best),
            "worst" => Ok(Self::Worst),
            "ask" | "interactive" => Ok(Self::Interactive),
            _ => Ok(Self::Label(value.to_string())),
        }
    }
}

/// 标签中第一段数字；没有数字的标签视为 0。
pub fn numeric_rank(label: &str) -> u64 {
    FIRST_DIGITS_RE
        .find(label)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// 交互选择清晰度的方式，测试中可替换。
pub trait QualityPrompt: Send + Sync {
    /// 返回用户选中的标签；`None` 表示无法提示或用户取消。
    fn choose(&self, labels: &[String]) -> Option<String>;
}

pub struct TerminalPrompt;

impl QualityPrompt for TerminalPrompt {
    fn choose(&self, labels: &[String]) -> Option<String> {
        if !ui::stdin_is_interactive() {
            return None;
        }
        let choice = ui::selection_menu(
            labels,
            "检测到多种清晰度，请选择",
            "请输入数字选择清晰度 (直接回车选择最高)",
            "1",
        )
        .ok()?;
        let index = choice.trim().parse::<usize>().ok()?;
        labels.get(index.checked_sub(1)?).cloned()
    }
}

/// 按策略从多个清晰度中选出一个。交互选出的标签在本次运行内记住。
pub struct QualitySelector {
    policy: QualityPolicy,
    prompt: Option<Box<dyn QualityPrompt>>,
    remembered: Mutex<Option<String>>,
}

impl QualitySelector {
    pub fn new(policy: QualityPolicy, prompt: Option<Box<dyn QualityPrompt>>) -> Self {
        Self {
            policy,
            prompt,
            remembered: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &QualityPolicy {
        &self.policy
    }

    pub fn select<'a>(&self, descriptor: &'a StreamDescriptor) -> AppResult<&'a StreamVariant> {
        let variants = &descriptor.variants;
        if variants.is_empty() {
            return Err(AppError::NotFound(format!(
                "来源 {} 没有任何清晰度",
                descriptor.provider
            )));
        }
        if variants.len() == 1 {
            return Ok(&variants[0]);
        }

        let chosen = match &self.policy {
            QualityPolicy::Best => pick_best(variants),
            QualityPolicy::Worst => pick_worst(variants),
            QualityPolicy::Label(label) => pick_label(variants, label),
            QualityPolicy::Interactive => self.pick_interactive(variants),
        };
        debug!("清晰度策略 {:?} 选中: '{}'", self.policy, chosen.label);
        Ok(chosen)
    }

    fn pick_interactive<'a>(&self, variants: &'a [StreamVariant]) -> &'a StreamVariant {
        let mut remembered = self.remembered.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(label) = remembered.as_deref() {
            return pick_label(variants, label);
        }

        let labels: Vec<String> = variants.iter().map(|v| v.label.clone()).collect();
        let choice = self.prompt.as_ref().and_then(|p| p.choose(&labels));
        match choice {
            Some(label) => {
                info!("用户选择清晰度 '{}'，本次运行内沿用", label);
                let picked = pick_label(variants, &label);
                *remembered = Some(label);
                picked
            }
            None => {
                warn!("无法交互选择清晰度，改用最高清晰度");
                pick_best(variants)
            }
        }
    }
}

fn pick_best(variants: &[StreamVariant]) -> &StreamVariant {
    // 同分时保留靠前的
    variants
        .iter()
        .rev()
        .max_by_key(|v| numeric_rank(&v.label))
        .unwrap_or(&variants[0])
}

fn pick_worst(variants: &[StreamVariant]) -> &StreamVariant {
    variants
        .iter()
        .min_by_key(|v| numeric_rank(&v.label))
        .unwrap_or(&variants[0])
}

fn pick_label<'a>(variants: &'a [StreamVariant], label: &str) -> &'a StreamVariant {
    let wanted = label.to_lowercase();
    if let Some(exact) = variants
        .iter()
        .find(|v| v.label.to_lowercase().contains(&wanted))
    {
        return exact;
    }
    let target = numeric_rank(label);
    // 距离相同时取较高的清晰度
    variants
        .iter()
        .min_by_key(|v| {
            let rank = numeric_rank(&v.label);
            (rank.abs_diff(target), Reverse(rank))
        })
        .unwrap_or(&variants[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn descriptor(labels: &[&str]) -> StreamDescriptor {
        StreamDescriptor {
            variants: labels
                .iter()
                .map(|l| StreamVariant {
                    label: l.to_string(),
                    url: format!("u{}", l),
                })
                .collect(),
            kind: SourceKind::Direct,
            provider: "test".into(),
            referer: None,
        }
    }

    struct CountingPrompt {
        answer: Option<String>,
        calls: Arc<AtomicUsize>,
    }

    impl QualityPrompt for CountingPrompt {
        fn choose(&self, _labels: &[String]) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    #[test]
    fn test_numeric_rank() {
        assert_eq!(numeric_rank("1080p"), 1080);
        assert_eq!(numeric_rank("hls 720p 60fps"), 720);
        assert_eq!(numeric_rank("auto"), 0);
    }

    #[test]
    fn test_best_from_json_shape() {
        let d = descriptor(&["480", "720"]);
        let selector = QualitySelector::new(QualityPolicy::Best, None);
        assert_eq!(selector.select(&d).unwrap().url, "u720");
    }

    #[test]
    fn test_best_and_worst_ignore_order() {
        let d = descriptor(&["720p", "auto", "1080p", "360p"]);
        let best = QualitySelector::new(QualityPolicy::Best, None);
        let worst = QualitySelector::new(QualityPolicy::Worst, None);
        assert_eq!(best.select(&d).unwrap().label, "1080p");
        assert_eq!(worst.select(&d).unwrap().label, "auto");
    }

    #[test]
    fn test_single_variant_wins_for_any_policy() {
        let d = descriptor(&["360p"]);
        for policy in [
            QualityPolicy::Best,
            QualityPolicy::Worst,
            QualityPolicy::Label("1080".into()),
            QualityPolicy::Interactive,
        ] {
            let selector = QualitySelector::new(policy, None);
            assert_eq!(selector.select(&d).unwrap().label, "360p");
        }
    }

    #[test]
    fn test_label_substring_then_nearest() {
        let d = descriptor(&["360p", "720p", "1080p"]);
        let exact = QualitySelector::new(QualityPolicy::Label("720".into()), None);
        assert_eq!(exact.select(&d).unwrap().label, "720p");
        let nearest = QualitySelector::new(QualityPolicy::Label("900".into()), None);
        assert_eq!(nearest.select(&d).unwrap().label, "1080p");
        let low = QualitySelector::new(QualityPolicy::Label("480".into()), None);
        assert_eq!(low.select(&d).unwrap().label, "360p");
    }

    #[test]
    fn test_label_tie_prefers_higher_regardless_of_order() {
        let d = descriptor(&["1080p", "720p", "360p"]);
        let tie = QualitySelector::new(QualityPolicy::Label("900".into()), None);
        assert_eq!(tie.select(&d).unwrap().label, "1080p");
        let d = descriptor(&["480p", "240p"]);
        let tie = QualitySelector::new(QualityPolicy::Label("360".into()), None);
        assert_eq!(tie.select(&d).unwrap().label, "480p");
    }

    #[test]
    fn test_empty_descriptor_is_not_found() {
        let selector = QualitySelector::new(QualityPolicy::Best, None);
        assert!(matches!(
            selector.select(&descriptor(&[])),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_interactive_prompts_once_and_remembers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let selector = QualitySelector::new(
            QualityPolicy::Interactive,
            Some(Box::new(CountingPrompt {
                answer: Some("480p".into()),
                calls: calls.clone(),
            })),
        );
        let first = descriptor(&["480p", "1080p"]);
        let second = descriptor(&["1080p", "480p", "720p"]);
        assert_eq!(selector.select(&first).unwrap().label, "480p");
        assert_eq!(selector.select(&second).unwrap().label, "480p");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interactive_without_prompt_falls_back_to_best() {
        let selector = QualitySelector::new(QualityPolicy::Interactive, None);
        assert_eq!(
            selector.select(&descriptor(&["480p", "1080p"])).unwrap().label,
            "1080p"
        );
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("BEST".parse::<QualityPolicy>().unwrap(), QualityPolicy::Best);
        assert_eq!("ask".parse::<QualityPolicy>().unwrap(), QualityPolicy::Interactive);
        assert_eq!(
            "720p".parse::<QualityPolicy>().unwrap(),
            QualityPolicy::Label("720p".into())
        );
    }
}
