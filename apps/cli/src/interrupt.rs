//! Ctrl-C 处理

use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Ctrl-C 后置位的停止标志
#[derive(Clone)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// 安装 Ctrl-C 处理器（每个进程只能安装一次）
    pub fn install() -> Result<Self> {
        let flag = Self::new();
        let handler_flag = flag.clone();
        ctrlc::set_handler(move || {
            eprintln!("\n⚠️  收到中断信号，正在停止...");
            handler_flag.0.store(true, Ordering::Release);
        })
        .context("安装 Ctrl-C 处理器失败")?;
        Ok(flag)
    }

    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// 睡眠至多 `duration`，收到中断时提前返回 `false`
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_set() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
        }
    }
}
