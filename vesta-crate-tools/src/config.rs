use std::path::Path;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

/// GPU 后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// 不依赖 GPU 的后端，记录所有调用
    #[default]
    Null,
    Vulkan,
}

/// 画面输出方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresentMode {
    Windowed,
    /// 无窗口，通过 transport 把像素发送给宿主进程
    #[default]
    Headless,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentConfig {
    pub mode: PresentMode,
    pub width: u32,
    pub height: u32,
}
impl Default for PresentConfig {
    fn default() -> Self {
        Self {
            mode: PresentMode::Headless,
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// 宿主进程监听的地址
    pub address: String,
}
impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7878".to_string(),
        }
    }
}

/// 引擎配置
///
/// 对应一个 TOML 文件，缺省字段使用默认值。
///
/// # 示例
/// ```toml
/// frames_in_flight = 2
/// worker_threads = 0
/// backend = "null"
/// [present]
/// mode = "headless"
/// width = 640
/// height = 480
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub app_name: String,
    /// Frames in Flight 的数量 F，deletion ring 的长度为 F + 1
    pub frames_in_flight: usize,
    /// 0 表示 max(hardware_concurrency / 2, 2)
    pub worker_threads: usize,
    /// 0 表示不限时
    pub fence_timeout_ms: u64,
    pub compute_enabled: bool,
    pub backend: BackendKind,
    pub present: PresentConfig,
    pub transport: TransportConfig,
}
impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "vesta".to_string(),
            frames_in_flight: 2,
            worker_threads: 0,
            fence_timeout_ms: 0,
            compute_enabled: true,
            backend: BackendKind::Null,
            present: PresentConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}
// new & init
impl EngineConfig {
    pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).with_context(|| format!("failed to read config: {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config: {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.frames_in_flight == 0 || self.frames_in_flight > Self::MAX_FRAMES_IN_FLIGHT {
            bail!(
                "frames_in_flight must be in [1, {}], got {}",
                Self::MAX_FRAMES_IN_FLIGHT,
                self.frames_in_flight
            );
        }
        if self.present.width == 0 || self.present.height == 0 {
            bail!("present extent must be non-zero, got {}x{}", self.present.width, self.present.height);
        }
        Ok(())
    }
}
// getters
impl EngineConfig {
    /// 实际使用的 worker 数量
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads != 0 {
            return self.worker_threads;
        }
        let hardware = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
        (hardware / 2).max(2)
    }

    /// deletion ring 以及 pool index 的长度
    #[inline]
    pub fn ring_size(&self) -> usize {
        self.frames_in_flight + 1
    }

    #[inline]
    pub fn fence_timeout_ns(&self) -> u64 {
        if self.fence_timeout_ms == 0 { u64::MAX } else { self.fence_timeout_ms.saturating_mul(1_000_000) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.ring_size(), 3);
        assert_eq!(config.backend, BackendKind::Null);
        assert_eq!(config.present.mode, PresentMode::Headless);
        assert_eq!(config.fence_timeout_ns(), u64::MAX);
    }

    #[test]
    fn test_partial_config() {
        let config = EngineConfig::from_toml_str(
            r#"
            frames_in_flight = 3
            fence_timeout_ms = 250
            compute_enabled = false
            [present]
            mode = "windowed"
            width = 640
            "#,
        )
        .unwrap();
        assert_eq!(config.ring_size(), 4);
        assert_eq!(config.fence_timeout_ns(), 250_000_000);
        assert!(!config.compute_enabled);
        assert_eq!(config.present.mode, PresentMode::Windowed);
        assert_eq!(config.present.width, 640);
        assert_eq!(config.present.height, 720);
    }

    #[test]
    fn test_invalid_frames_in_flight() {
        assert!(EngineConfig::from_toml_str("frames_in_flight = 0").is_err());
        assert!(EngineConfig::from_toml_str("frames_in_flight = 9").is_err());
    }

    #[test]
    fn test_worker_threads_at_least_two() {
        let config = EngineConfig::default();
        assert!(config.resolved_worker_threads() >= 2);

        let config = EngineConfig {
            worker_threads: 1,
            ..Default::default()
        };
        assert_eq!(config.resolved_worker_threads(), 1);
    }
}
