//! 控制参数
//!
//! 参数通过 `ArcSwap` 发布，控制/状态任务每个周期读取一次，修改在下一个周期生效。

use crate::error::ControllerError;
use crate::scheduler::{MIN_RATE_HZ, period_from_rate};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 陀螺安装方向
///
/// 配置文件中写作 `1` 或 `-1`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum GyroSign {
    Positive,
    Negative,
}

impl GyroSign {
    pub fn value(self) -> f64 {
        match self {
            GyroSign::Positive => 1.0,
            GyroSign::Negative => -1.0,
        }
    }
}

impl TryFrom<i8> for GyroSign {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(GyroSign::Positive),
            -1 => Ok(GyroSign::Negative),
            other => Err(format!("gyro sign must be 1 or -1, got {other}")),
        }
    }
}

impl From<GyroSign> for i8 {
    fn from(sign: GyroSign) -> Self {
        match sign {
            GyroSign::Positive => 1,
            GyroSign::Negative => -1,
        }
    }
}

/// 稳定控制参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerParams {
    /// 控制任务频率（Hz）
    pub control_rate_hz: f64,
    /// 状态任务频率（Hz）
    pub status_rate_hz: f64,
    /// 比例增益
    pub proportional_gain: f64,
    /// 死区（°/s）
    pub deadband_deg_per_sec: f64,
    pub gyro_sign: GyroSign,
    /// 指令限幅（°/s）
    pub max_command_deg_per_sec: f64,
    /// 连续状态超时次数达到该值时停止
    pub max_consecutive_status_failures: u32,
}

impl Default for ControllerParams {
    fn default() -> Self {
        Self {
            control_rate_hz: 10.0,
            status_rate_hz: 1.0,
            proportional_gain: 1.0,
            deadband_deg_per_sec: 0.05,
            gyro_sign: GyroSign::Negative,
            max_command_deg_per_sec: 180.0,
            max_consecutive_status_failures: 5,
        }
    }
}

/// 频率不合法时使用的周期（校验后的参数不会用到）
const FALLBACK_PERIOD: Duration = Duration::from_secs(1);

impl ControllerParams {
    pub fn control_period(&self) -> Duration {
        period_from_rate(self.control_rate_hz).unwrap_or(FALLBACK_PERIOD)
    }

    pub fn status_period(&self) -> Duration {
        period_from_rate(self.status_rate_hz).unwrap_or(FALLBACK_PERIOD)
    }

    /// 校验全部字段
    pub fn validate(&self) -> Result<(), ControllerError> {
        ParamsUpdate::from(*self).validate()
    }

    /// 应用部分更新（不校验）
    pub fn merged(&self, update: &ParamsUpdate) -> Self {
        Self {
            control_rate_hz: update.control_rate_hz.unwrap_or(self.control_rate_hz),
            status_rate_hz: update.status_rate_hz.unwrap_or(self.status_rate_hz),
            proportional_gain: update.proportional_gain.unwrap_or(self.proportional_gain),
            deadband_deg_per_sec: update
                .deadband_deg_per_sec
                .unwrap_or(self.deadband_deg_per_sec),
            gyro_sign: update.gyro_sign.unwrap_or(self.gyro_sign),
            max_command_deg_per_sec: update
                .max_command_deg_per_sec
                .unwrap_or(self.max_command_deg_per_sec),
            max_consecutive_status_failures: update
                .max_consecutive_status_failures
                .unwrap_or(self.max_consecutive_status_failures),
        }
    }
}

/// 参数的部分更新，`None` 字段保持原值
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParamsUpdate {
    pub control_rate_hz: Option<f64>,
    pub status_rate_hz: Option<f64>,
    pub proportional_gain: Option<f64>,
    pub deadband_deg_per_sec: Option<f64>,
    pub gyro_sign: Option<GyroSign>,
    pub max_command_deg_per_sec: Option<f64>,
    pub max_consecutive_status_failures: Option<u32>,
}

impl ParamsUpdate {
    /// 校验已提供的字段
    ///
    /// 每个字段的约束互相独立，因此一次更新是否合法与当前参数无关。
    pub fn validate(&self) -> Result<(), ControllerError> {
        fn invalid(msg: String) -> Result<(), ControllerError> {
            Err(ControllerError::InvalidParams(msg))
        }

        for (name, rate) in [
            ("control_rate_hz", self.control_rate_hz),
            ("status_rate_hz", self.status_rate_hz),
        ] {
            if let Some(rate) = rate
                && period_from_rate(rate).is_none()
            {
                return invalid(format!(
                    "{name} must be a finite number >= {MIN_RATE_HZ} Hz, got {rate}"
                ));
            }
        }

        if let Some(gain) = self.proportional_gain
            && !gain.is_finite()
        {
            return invalid(format!("proportional_gain must be finite, got {gain}"));
        }

        for (name, value) in [
            ("deadband_deg_per_sec", self.deadband_deg_per_sec),
            ("max_command_deg_per_sec", self.max_command_deg_per_sec),
        ] {
            if let Some(value) = value
                && !(value.is_finite() && value >= 0.0)
            {
                return invalid(format!("{name} must be finite and >= 0, got {value}"));
            }
        }

        if self.max_consecutive_status_failures == Some(0) {
            return invalid("max_consecutive_status_failures must be >= 1".to_string());
        }

        Ok(())
    }
}

impl From<ControllerParams> for ParamsUpdate {
    fn from(p: ControllerParams) -> Self {
        Self {
            control_rate_hz: Some(p.control_rate_hz),
            status_rate_hz: Some(p.status_rate_hz),
            proportional_gain: Some(p.proportional_gain),
            deadband_deg_per_sec: Some(p.deadband_deg_per_sec),
            gyro_sign: Some(p.gyro_sign),
            max_command_deg_per_sec: Some(p.max_command_deg_per_sec),
            max_consecutive_status_failures: Some(p.max_consecutive_status_failures),
        }
    }
}
