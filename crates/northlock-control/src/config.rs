//! TOML 配置文件
//!
//! ```toml
//! [actuator]
//! port = "/dev/ttyUSB0"
//! response_timeout_ms = 250
//!
//! [gyro]
//! port = "/dev/ttyUSB1"
//! sampling_rate_hz = 1024.0
//!
//! [controller]
//! control_rate_hz = 10.0
//! gyro_sign = -1
//! ```
//!
//! 所有字段都可以省略，缺省值与代码中的 `Default` 一致。

use crate::error::ControllerError;
use crate::params::ControllerParams;
use northlock_driver::{GyroConfig, LinkConfig, LinkError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid [controller] section: {0}")]
    Params(#[from] ControllerError),

    #[error("Invalid [gyro] section: {0}")]
    Gyro(#[source] LinkError),
}

/// `[actuator]` 段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub device_id: u8,
    pub response_timeout_ms: u64,
    pub inter_command_delay_ms: u64,
    pub status_retries: u32,
    pub retry_backoff_ms: u64,
    pub drain_settle_ms: u64,
    pub drain_rounds: u32,
}

impl Default for ActuatorSection {
    fn default() -> Self {
        let link = LinkConfig::default();
        Self {
            port: None,
            device_id: link.device_id,
            response_timeout_ms: link.response_timeout.as_millis() as u64,
            inter_command_delay_ms: link.inter_command_delay.as_millis() as u64,
            status_retries: link.status_retries,
            retry_backoff_ms: link.retry_backoff.as_millis() as u64,
            drain_settle_ms: link.drain_settle.as_millis() as u64,
            drain_rounds: link.drain_rounds,
        }
    }
}

impl ActuatorSection {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            device_id: self.device_id,
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            inter_command_delay: Duration::from_millis(self.inter_command_delay_ms),
            status_retries: self.status_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            drain_settle: Duration::from_millis(self.drain_settle_ms),
            drain_rounds: self.drain_rounds,
        }
    }
}

/// `[gyro]` 段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GyroSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub sampling_rate_hz: f64,
    pub rate_window_samples: usize,
    pub read_timeout_ms: u64,
}

impl Default for GyroSection {
    fn default() -> Self {
        let gyro = GyroConfig::default();
        Self {
            port: None,
            sampling_rate_hz: gyro.sampling_rate_hz,
            rate_window_samples: gyro.rate_window_samples,
            read_timeout_ms: gyro.read_timeout.as_millis() as u64,
        }
    }
}

impl GyroSection {
    pub fn gyro_config(&self) -> GyroConfig {
        GyroConfig {
            sampling_rate_hz: self.sampling_rate_hz,
            rate_window_samples: self.rate_window_samples,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            ..GyroConfig::default()
        }
    }
}

/// 完整配置文件
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NorthLockConfig {
    pub actuator: ActuatorSection,
    pub gyro: GyroSection,
    pub controller: ControllerParams,
}

impl NorthLockConfig {
    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// 解析并校验控制参数与陀螺配置
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.controller.validate()?;
        self.gyro.gyro_config().validate().map_err(ConfigError::Gyro)?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
