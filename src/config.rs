use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::net::structure::{DEFAULT_TOKEN, Weight};

/// Suspension of an external transition either costs nothing or is counted
/// as a round that fired nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuspendPolicy {
    #[default]
    Skip,
    Record,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct MarkConfig {
    pub place: String,
    #[serde(default = "default_color")]
    pub color: String,
    pub count: Weight,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_firing_limit")]
    pub firing_limit: Option<u64>,
    #[serde(default)]
    pub suspend_policy: SuspendPolicy,
    /// 外部迁移路径 → 处理器注册名
    #[serde(default)]
    pub handlers: IndexMap<String, String>,
    /// 需要记录令牌变化日志的库所
    #[serde(default)]
    pub listeners: Vec<String>,
    #[serde(default)]
    pub marks: Vec<MarkConfig>,
    #[serde(default = "default_quoted_report")]
    pub quoted_report: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            seed: None,
            firing_limit: default_firing_limit(),
            suspend_policy: SuspendPolicy::default(),
            handlers: IndexMap::new(),
            listeners: Vec::new(),
            marks: Vec::new(),
            quoted_report: default_quoted_report(),
        }
    }
}

impl RunnerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: RunnerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }
}

fn default_firing_limit() -> Option<u64> {
    Some(100)
}

fn default_color() -> String {
    DEFAULT_TOKEN.to_string()
}

fn default_quoted_report() -> bool {
    true
}
