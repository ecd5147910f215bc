//! 状态看门狗
//!
//! 只有超时计入连续失败；任何一次成功都会清零。其他错误（校验失败、负载过短）
//! 不影响计数。

/// 状态任务计数器与看门狗
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusWatchdog {
    successes: u64,
    timeouts: u64,
    consecutive_failures: u32,
    tripped: bool,
}

impl StatusWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self) {
        self.successes += 1;
        self.consecutive_failures = 0;
    }

    /// 记录一次超时，达到 `threshold` 时触发并返回 `true`
    pub fn record_timeout(&mut self, threshold: u32) -> bool {
        self.timeouts += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= threshold.max(1) {
            self.tripped = true;
        }
        self.tripped
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
