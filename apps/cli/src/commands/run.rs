//! run 命令
//!
//! 连接、零点、启动稳定控制，并按监控频率打印快照，直到 Ctrl-C、
//! 达到时长或看门狗停止。

use anyhow::{Context, Result, bail};
use clap::Args;
use northlock_control::scheduler::{MIN_RATE_HZ, period_from_rate};
use northlock_control::{
    ControllerSnapshot, GyroSign, NorthLockConfig, ParamsUpdate, StabilizationController,
};
use std::time::{Duration, Instant};

use crate::commands::drift::seconds_arg;
use crate::connection::{actuator_port, gyro_port};
use crate::interrupt::StopFlag;

/// 稳定运行参数
#[derive(Args, Debug, Default)]
pub struct RunCommand {
    /// 快照打印频率（Hz）
    #[arg(long, default_value_t = 2.0)]
    pub monitor_hz: f64,

    /// 运行时长（秒，缺省时运行到 Ctrl-C）
    #[arg(long)]
    pub duration: Option<f64>,

    /// 启动前测量陀螺漂移（秒）
    #[arg(long)]
    pub drift_seconds: Option<f64>,

    /// 以 JSON 行输出快照
    #[arg(long)]
    pub json: bool,

    /// 比例增益（覆盖配置）
    #[arg(long, allow_negative_numbers = true)]
    pub gain: Option<f64>,

    /// 死区 °/s（覆盖配置）
    #[arg(long)]
    pub deadband: Option<f64>,

    /// 指令限幅 °/s（覆盖配置）
    #[arg(long)]
    pub max_command: Option<f64>,

    /// 控制频率 Hz（覆盖配置）
    #[arg(long)]
    pub control_hz: Option<f64>,

    /// 状态频率 Hz（覆盖配置）
    #[arg(long)]
    pub status_hz: Option<f64>,

    /// 反转陀螺方向
    #[arg(long)]
    pub invert_gyro: bool,
}

impl RunCommand {
    /// 命令行覆盖项
    pub fn params_update(&self, config: &NorthLockConfig) -> ParamsUpdate {
        let gyro_sign = self.invert_gyro.then(|| match config.controller.gyro_sign {
            GyroSign::Positive => GyroSign::Negative,
            GyroSign::Negative => GyroSign::Positive,
        });

        ParamsUpdate {
            control_rate_hz: self.control_hz,
            status_rate_hz: self.status_hz,
            proportional_gain: self.gain,
            deadband_deg_per_sec: self.deadband,
            gyro_sign,
            max_command_deg_per_sec: self.max_command,
            max_consecutive_status_failures: None,
        }
    }

    pub fn execute(&self, config: &NorthLockConfig) -> Result<()> {
        let Some(monitor_period) = period_from_rate(self.monitor_hz) else {
            bail!("--monitor-hz 必须在 {} Hz 以上，得到 {}", MIN_RATE_HZ, self.monitor_hz);
        };
        let duration = self
            .duration
            .map(|s| seconds_arg("duration", s))
            .transpose()?;
        let drift = self
            .drift_seconds
            .map(|s| seconds_arg("drift-seconds", s))
            .transpose()?;

        let update = self.params_update(config);
        update.validate().context("参数不合法")?;

        let mut config = config.clone();
        config.controller = config.controller.merged(&update);

        let stop = StopFlag::install()?;
        let mut controller =
            StabilizationController::from_config(&config).context("创建控制器失败")?;

        let actuator = actuator_port(&config)?;
        let gyro = gyro_port(&config)?;
        println!("🔌 连接执行器 {} 与陀螺 {}...", actuator, gyro);
        controller
            .connect(actuator, gyro)
            .context("连接失败")?;
        println!("✅ 已连接，零点已设置");

        if let Some(drift) = drift
            && !drift.is_zero()
        {
            if !measure_drift(&controller, drift, &stop)? {
                controller.disconnect();
                return Ok(());
            }
            controller.zero_orientation();
        }

        let params = controller.params();
        println!(
            "🚀 启动稳定控制: 增益 {:.2}, 死区 {:.3} °/s, 限幅 {:.1} °/s, 控制 {:.1} Hz, 状态 {:.1} Hz",
            params.proportional_gain,
            params.deadband_deg_per_sec,
            params.max_command_deg_per_sec,
            params.control_rate_hz,
            params.status_rate_hz
        );
        controller.start().context("启动失败")?;

        let started = Instant::now();
        loop {
            if !stop.sleep(monitor_period) {
                break;
            }

            let snapshot = controller.snapshot();
            self.print_snapshot(&snapshot)?;

            if !controller.is_running() {
                break;
            }
            if let Some(duration) = duration
                && started.elapsed() >= duration
            {
                println!("⏱️  达到运行时长");
                break;
            }
        }

        controller.stop();
        let snapshot = controller.snapshot();
        controller.disconnect();

        println!();
        println!("📊 运行结果:");
        println!("  运行时间: {:.1} 秒", snapshot.elapsed_s);
        println!("  状态成功: {}", snapshot.status_ok);
        println!("  状态超时: {}", snapshot.status_timeouts);
        println!("  跳过指令: {}", snapshot.skipped_commands);

        if snapshot.watchdog_tripped {
            bail!(
                "看门狗停止: {}",
                snapshot.last_error.as_deref().unwrap_or("status timeouts")
            );
        }

        println!("✅ 已停止");
        Ok(())
    }

    fn print_snapshot(&self, snapshot: &ControllerSnapshot) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(snapshot)?);
        } else {
            println!("{}", format_snapshot(snapshot));
        }
        Ok(())
    }
}

/// 测量漂移，被中断时返回 `false`
fn measure_drift(controller: &StabilizationController, duration: Duration, stop: &StopFlag) -> Result<bool> {
    println!("⏱️  测量漂移 {:.1} 秒，保持静止...", duration.as_secs_f64());
    controller.begin_gyro_drift_measurement(duration)?;

    let deadline = Instant::now() + duration + Duration::from_secs(2);
    while controller
        .gyro_state()
        .is_some_and(|s| s.drift_measurement_active)
    {
        if Instant::now() >= deadline {
            bail!("漂移测量未完成（陀螺数据中断）");
        }
        if !stop.sleep(Duration::from_millis(100)) {
            return Ok(false);
        }
    }

    let drift = controller
        .gyro_state()
        .map(|s| s.drift_deg_per_sec)
        .unwrap_or_default();
    println!("✅ 漂移: {:.6} °/s", drift);
    Ok(true)
}

/// 单行快照
pub fn format_snapshot(s: &ControllerSnapshot) -> String {
    let mut line = format!(
        "t={:7.1}s | gyro {:7.2}° {:+8.3} °/s | act {:7.2}° | cmd {:+8.2} °/s | ok={} to={} skip={}",
        s.elapsed_s,
        s.gyro_heading_deg,
        s.gyro_rate_deg_per_sec,
        s.actuator_heading_deg,
        s.command_deg_per_sec,
        s.status_ok,
        s.status_timeouts,
        s.skipped_commands,
    );
    if let Some(err) = &s.last_error {
        line.push_str(" | ");
        line.push_str(err);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_update_from_flags() {
        let config = NorthLockConfig::default();
        let cmd = RunCommand {
            gain: Some(2.0),
            invert_gyro: true,
            ..RunCommand::default()
        };

        let update = cmd.params_update(&config);
        assert_eq!(update.proportional_gain, Some(2.0));
        assert_eq!(update.gyro_sign, Some(GyroSign::Positive));
        assert_eq!(update.deadband_deg_per_sec, None);
        assert!(update.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_monitor_rate() {
        let cmd = RunCommand {
            monitor_hz: 0.0,
            ..RunCommand::default()
        };
        assert!(cmd.execute(&NorthLockConfig::default()).is_err());

        let cmd = RunCommand {
            monitor_hz: 1e-30,
            ..RunCommand::default()
        };
        assert!(cmd.execute(&NorthLockConfig::default()).is_err());
    }

    #[test]
    fn test_format_snapshot() {
        let snapshot = ControllerSnapshot {
            elapsed_s: 12.0,
            gyro_heading_deg: 1.5,
            command_deg_per_sec: -3.25,
            status_ok: 7,
            last_error: Some("status poll failed".to_string()),
            ..ControllerSnapshot::default()
        };
        let line = format_snapshot(&snapshot);
        assert!(line.contains("cmd    -3.25"));
        assert!(line.contains("ok=7"));
        assert!(line.ends_with("status poll failed"));
    }
}
