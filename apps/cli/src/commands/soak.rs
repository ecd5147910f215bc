//! soak 命令
//!
//! 执行器可靠性测试：按正弦速度曲线持续下发应答式速度指令，同时读取角度与状态，
//! 定期读取错误标志，统计各类错误。

use anyhow::{Result, bail};
use clap::Args;
use northlock_control::scheduler::{FixedRateScheduler, MIN_RATE_HZ, period_from_rate};
use northlock_control::{LinkError, NorthLockConfig};
use std::f64::consts::PI;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::commands::drift::seconds_arg;
use crate::connection::open_actuator;
use crate::interrupt::StopFlag;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// 可靠性测试参数
#[derive(Args, Debug)]
pub struct SoakCommand {
    /// 测试时长（秒）
    #[arg(long, default_value_t = 1800.0)]
    pub duration: f64,

    /// 循环频率（Hz）
    #[arg(long, default_value_t = 10.0)]
    pub loop_hz: f64,

    /// 速度幅值 °/s
    #[arg(long, default_value_t = 180.0)]
    pub max_speed: f64,

    /// 速度曲线频率（Hz）
    #[arg(long, default_value_t = 0.05)]
    pub profile_hz: f64,

    /// 错误标志读取间隔（秒）
    #[arg(long, default_value_t = 5.0)]
    pub error_interval: f64,

    /// 开始前不清除错误标志
    #[arg(long)]
    pub keep_errors: bool,

    /// 结束后清除错误标志
    #[arg(long)]
    pub clear_on_end: bool,
}

/// 测试计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoakCounts {
    pub loops: u64,
    pub ok: u64,
    pub error_reads: u64,
    pub timeouts: u64,
    pub protocol_errors: u64,
    pub other_errors: u64,
}

impl SoakCounts {
    /// 按错误类别计数
    pub fn record_error(&mut self, err: &LinkError) {
        match err {
            e if e.is_timeout() => self.timeouts += 1,
            LinkError::ChecksumMismatch { .. } | LinkError::Protocol(_) => {
                self.protocol_errors += 1
            },
            _ => self.other_errors += 1,
        }
    }

    pub fn summary_line(&self) -> String {
        format!(
            "ok={} | to={} | proto={} | other={}",
            self.ok, self.timeouts, self.protocol_errors, self.other_errors
        )
    }
}

/// 正弦速度曲线 `max * sin(2π f t)`
pub fn speed_profile(t_secs: f64, max_speed: f64, profile_hz: f64) -> f64 {
    let limit = max_speed.abs();
    (max_speed * (2.0 * PI * profile_hz * t_secs).sin()).clamp(-limit, limit)
}

impl SoakCommand {
    /// 校验参数，返回循环周期
    fn validate(&self) -> Result<Duration> {
        for (name, value) in [
            ("max-speed", self.max_speed),
            ("profile-hz", self.profile_hz),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("--{} 必须是非负有限数值，得到 {}", name, value);
            }
        }
        let Some(period) = period_from_rate(self.loop_hz) else {
            bail!("--loop-hz 必须在 {} Hz 以上，得到 {}", MIN_RATE_HZ, self.loop_hz);
        };
        Ok(period)
    }

    pub fn execute(&self, config: &NorthLockConfig) -> Result<()> {
        let period = self.validate()?;
        let duration = seconds_arg("duration", self.duration)?;
        let error_interval = seconds_arg("error-interval", self.error_interval)?;

        let stop = StopFlag::install()?;
        let mut link = open_actuator(config)?;

        match link.read_model_info() {
            Ok(info) => println!(
                "✅ 已连接: 驱动 '{}' 电机 '{}'",
                info.driver_name, info.motor_name
            ),
            Err(e) => warn!("Model info read failed: {}", e),
        }

        if !self.keep_errors {
            match link.clear_error_flags() {
                Ok(()) => println!("✅ 错误标志已清除"),
                Err(e) => warn!("Could not clear error flags on start: {}", e),
            }
        }

        if let Err(e) = link.set_speed_deg_per_sec(0.0) {
            warn!("Initial zero-speed command failed: {}", e);
        }

        println!(
            "🚀 可靠性测试: {:.1} 分钟, {:.1} Hz, 幅值 {:.1} °/s (Ctrl-C 停止)",
            duration.as_secs_f64() / 60.0,
            self.loop_hz,
            self.max_speed
        );

        let mut counts = SoakCounts::default();
        let running = AtomicBool::new(true);
        let start = Instant::now();
        let mut scheduler = FixedRateScheduler::new("soak", period, start);
        let mut next_error_read = start;
        let mut next_progress = start + PROGRESS_INTERVAL;

        while scheduler.wait_next(&running) {
            if stop.is_set() {
                break;
            }
            let now = Instant::now();
            let t = now.duration_since(start);
            if t >= duration {
                println!("\n⏱️  达到测试时长");
                break;
            }
            counts.loops += 1;

            let speed = speed_profile(t.as_secs_f64(), self.max_speed, self.profile_hz);

            if now >= next_error_read {
                next_error_read += error_interval.max(Duration::from_millis(1));
                match link.read_error_flags() {
                    Ok(_) => counts.error_reads += 1,
                    Err(e) => counts.record_error(&e),
                }
            }

            let result = link
                .set_speed_deg_per_sec(speed)
                .and_then(|()| link.read_single_turn_angle_deg())
                .and_then(|_| link.read_status_default());
            match result {
                Ok(_) => counts.ok += 1,
                Err(e) => counts.record_error(&e),
            }

            if now >= next_progress {
                next_progress += PROGRESS_INTERVAL;
                println!(
                    "T={:5.1} min | cmd={:7.1} °/s | {}",
                    t.as_secs_f64() / 60.0,
                    speed,
                    counts.summary_line()
                );
            }
        }

        if let Err(e) = link.set_speed_deg_per_sec(0.0) {
            warn!("Final zero-speed command failed: {}", e);
        }
        if self.clear_on_end
            && let Err(e) = link.clear_error_flags()
        {
            warn!("Could not clear error flags on end: {}", e);
        }
        link.close();

        println!();
        println!("📊 测试结果:");
        println!("  循环: {}", counts.loops);
        println!("  成功: {}", counts.ok);
        println!("  错误标志读取: {}", counts.error_reads);
        println!("  超时: {}", counts.timeouts);
        println!("  协议错误: {}", counts.protocol_errors);
        println!("  其他错误: {}", counts.other_errors);

        Ok(())
    }
}
