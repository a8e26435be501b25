//! 播放器配置
//!
//! 所有字段都有默认值，JSON 中缺省的字段取默认。

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// 配置加载错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 位置采样周期
    pub sampler_period_ms: u64,
    /// 输出环形缓冲区容量（采样数）
    pub output_buffer_size: usize,
    /// 拖动结束后接受位置的窗口
    pub settle_window_ms: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sampler_period_ms: 100,
            output_buffer_size: 8192,
            settle_window_ms: 200,
        }
    }
}

impl PlayerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn sampler_period(&self) -> Duration {
        Duration::from_millis(self.sampler_period_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = PlayerConfig::from_json_str(r#"{ "sampler_period_ms": 50 }"#).unwrap();
        assert_eq!(config.sampler_period(), Duration::from_millis(50));
        assert_eq!(config.output_buffer_size, 8192);
        assert_eq!(config.settle_window_ms, 200);
    }

    #[test]
    fn test_default_period() {
        assert_eq!(PlayerConfig::default().sampler_period(), Duration::from_millis(100));
    }

    #[test]
    fn test_invalid_json() {
        let err = PlayerConfig::from_json_str("{ sampler_period_ms: }").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = PlayerConfig::from_json_file("/nonexistent/chime.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
