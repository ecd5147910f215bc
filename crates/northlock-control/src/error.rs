//! 控制层错误类型定义

use northlock_driver::LinkError;
use thiserror::Error;

/// 控制层错误类型
#[derive(Error, Debug)]
pub enum ControllerError {
    /// 未连接（需要先 `connect`）
    #[error("Not connected")]
    NotConnected,

    /// 已连接（需要先 `disconnect`）
    #[error("Already connected")]
    AlreadyConnected,

    /// 状态看门狗触发：连续状态读取超时
    #[error("Status watchdog triggered after {failures} consecutive timeouts")]
    WatchdogTriggered { failures: u32 },

    /// 参数不合法（整个更新被拒绝）
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// 链路错误
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// 任务线程创建失败
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ControllerError::NotConnected.to_string(), "Not connected");
        assert_eq!(
            ControllerError::WatchdogTriggered { failures: 5 }.to_string(),
            "Status watchdog triggered after 5 consecutive timeouts"
        );

        let err: ControllerError = LinkError::Timeout("reading header").into();
        assert_eq!(err.to_string(), "Link error: Timeout reading header");
    }
}
