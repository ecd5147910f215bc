//! 驱动层错误类型定义

use northlock_protocol::{ChecksumSection, ProtocolError};
use northlock_serial::SerialError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum LinkError {
    /// 链路未打开或已关闭
    #[error("Not connected")]
    NotConnected,

    /// 在响应超时内没有收到完整响应
    ///
    /// 携带超时发生时所处的阶段（等待同步字节、帧头或负载）。
    #[error("Timeout {0}")]
    Timeout(&'static str),

    /// 帧头或负载校验失败
    #[error("{section} checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch {
        section: ChecksumSection,
        expected: u8,
        actual: u8,
    },

    /// 其他协议错误（负载过短等）
    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    /// 串口错误
    #[error("Serial error: {0}")]
    Serial(#[from] SerialError),

    /// 链路配置不合法
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl LinkError {
    /// 是否为超时（状态看门狗只统计超时）
    pub fn is_timeout(&self) -> bool {
        matches!(self, LinkError::Timeout(_))
    }
}

impl From<ProtocolError> for LinkError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::ChecksumMismatch {
                section,
                expected,
                actual,
            } => LinkError::ChecksumMismatch {
                section,
                expected,
                actual,
            },
            other => LinkError::Protocol(other),
        }
    }
}
