use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:1080";
pub const DEFAULT_SLOW_STAGE_MS: u64 = 1000;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// 服务配置，启动后只读
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 监听地址
    pub listen_addr: String,
    /// 单个阶段超过这个时长会打告警日志（毫秒）
    pub slow_stage_threshold_ms: u64,
    /// `RUST_LOG` 未设置时使用的日志级别
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            slow_stage_threshold_ms: DEFAULT_SLOW_STAGE_MS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// 从 JSON 文件读取，缺省字段取默认值
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("读取配置文件 {} 失败", path.display()))?;
        Self::from_json(&data).with_context(|| format!("解析配置文件 {} 失败", path.display()))
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.trim().is_empty() {
            return Err(anyhow!("监听地址不能为空"));
        }
        Ok(())
    }

    pub fn slow_stage_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_stage_threshold_ms)
    }
}
