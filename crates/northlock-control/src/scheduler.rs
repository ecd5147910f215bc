//! 固定频率调度器
//!
//! 截止时间按固定周期累加（绝对时间锚点），睡眠自动扣除任务耗时。
//! 睡眠被切成不超过 [`SLEEP_SLICE`] 的片段，以便及时观察运行标志。

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// 单次睡眠的最大时长
pub const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// 允许的最低频率（周期不超过 1000 s）
pub const MIN_RATE_HZ: f64 = 1e-3;

/// 频率换算为周期
///
/// 频率非有限、低于 [`MIN_RATE_HZ`] 或周期舍入为 0 时返回 `None`。
pub fn period_from_rate(rate_hz: f64) -> Option<Duration> {
    if !(rate_hz.is_finite() && rate_hz >= MIN_RATE_HZ) {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / rate_hz)
        .ok()
        .filter(|period| !period.is_zero())
}

/// 到达截止时间后的调度结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickTiming {
    /// 按时（或迟到不足一个周期，直接执行）
    OnTime,
    /// 迟到超过一个周期：丢弃 `missed` 个周期并以当前时刻重新锚定
    Rescheduled { missed: u64 },
}

/// 固定频率调度器
#[derive(Debug)]
pub struct FixedRateScheduler {
    name: &'static str,
    period: Duration,
    next_deadline: Instant,
    missed_ticks: u64,
}

impl FixedRateScheduler {
    /// 创建调度器，第一个周期在 `start` 时刻立即执行
    pub fn new(name: &'static str, period: Duration, start: Instant) -> Self {
        Self {
            name,
            period,
            next_deadline: start,
            missed_ticks: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// 修改周期（从下一次推进截止时间开始生效）
    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    /// 累计丢弃的周期数
    pub fn missed_ticks(&self) -> u64 {
        self.missed_ticks
    }

    /// 等待下一个周期
    ///
    /// 返回 `false` 表示运行标志已清除，调用方应退出循环。
    pub fn wait_next(&mut self, is_running: &AtomicBool) -> bool {
        loop {
            if !is_running.load(Ordering::Acquire) {
                return false;
            }

            let now = Instant::now();
            if now >= self.next_deadline {
                self.advance(now);
                return true;
            }

            spin_sleep::sleep((self.next_deadline - now).min(SLEEP_SLICE));
        }
    }

    /// 截止时间已到（`now >= next_deadline`）时推进到下一个截止时间
    pub fn advance(&mut self, now: Instant) -> TickTiming {
        let late = now.saturating_duration_since(self.next_deadline);

        if late < self.period || self.period.is_zero() {
            self.next_deadline += self.period;
            return TickTiming::OnTime;
        }

        let missed = (late.as_nanos() / self.period.as_nanos()) as u64;
        self.missed_ticks += missed;
        warn!(
            "{} loop overrun: {:?} late, skipping {} tick(s) and re-anchoring",
            self.name, late, missed
        );
        self.next_deadline = now + self.period;
        TickTiming::Rescheduled { missed }
    }
}
