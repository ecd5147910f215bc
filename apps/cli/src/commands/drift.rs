//! drift 命令
//!
//! 陀螺静止状态下测量漂移。

use anyhow::{Result, bail};
use clap::Args;
use northlock_control::NorthLockConfig;
use std::time::{Duration, Instant};

use crate::connection::open_gyro;
use crate::interrupt::StopFlag;

/// 窗口结束后等待下一个数据包的最长时间
const COMPLETION_GRACE: Duration = Duration::from_secs(2);

/// 漂移测量参数
#[derive(Args, Debug)]
pub struct DriftCommand {
    /// 测量时长（秒）
    #[arg(long, default_value_t = 30.0)]
    pub seconds: f64,

    /// 开始前的稳定时间（秒）
    #[arg(long, default_value_t = 1.0)]
    pub settle: f64,
}

impl DriftCommand {
    pub fn execute(&self, config: &NorthLockConfig) -> Result<()> {
        let duration = seconds_arg("seconds", self.seconds)?;
        let settle = seconds_arg("settle", self.settle)?;
        if duration.is_zero() {
            bail!("--seconds 必须大于 0");
        }

        let stop = StopFlag::install()?;
        let gyro = open_gyro(config)?;

        if !stop.sleep(settle) {
            return Ok(());
        }
        if gyro.state().valid_packet_count == 0 {
            bail!("陀螺没有数据（检查串口与波特率）");
        }

        println!("⏱️  测量漂移 {:.1} 秒，保持陀螺静止...", duration.as_secs_f64());
        gyro.begin_drift_measurement(duration);

        let deadline = Instant::now() + duration + COMPLETION_GRACE;
        while gyro.state().drift_measurement_active {
            if Instant::now() >= deadline {
                bail!("漂移测量未完成（陀螺数据中断）");
            }
            if !stop.sleep(Duration::from_millis(100)) {
                println!("⚠️  测量已中断");
                return Ok(());
            }
        }

        let state = gyro.state();
        println!("✅ 漂移: {:.6} °/s", state.drift_deg_per_sec);
        println!("  有效包: {}", state.valid_packet_count);
        println!("  丢弃字节: {}", state.skipped_byte_count);

        Ok(())
    }
}

/// 秒数参数上限（一年）
const MAX_SECONDS: f64 = 365.0 * 24.0 * 3600.0;

/// 校验秒数参数
pub fn seconds_arg(name: &str, value: f64) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 {
        bail!("--{} 必须是非负有限数值，得到 {}", name, value);
    }
    if value > MAX_SECONDS {
        bail!("--{} 不能超过 {} 秒，得到 {}", name, MAX_SECONDS, value);
    }
    Ok(Duration::try_from_secs_f64(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_arg() {
        assert_eq!(seconds_arg("seconds", 1.5).unwrap(), Duration::from_millis(1500));
        assert!(seconds_arg("seconds", -1.0).is_err());
        assert!(seconds_arg("seconds", f64::INFINITY).is_err());
        assert!(seconds_arg("seconds", 1e30).is_err());
    }
}
