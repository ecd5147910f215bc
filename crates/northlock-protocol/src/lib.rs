//! # NorthLock Protocol
//!
//! 北向锁定稳定器的线协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `frame`: RS-485 执行器帧的构建与解析
//! - `commands`: 执行器命令码与请求负载编码
//! - `feedback`: 执行器响应负载解析
//! - `gyro`: 光纤陀螺 5 字节数据包与字节流重同步
//!
//! ## 字节序
//!
//! 执行器协议使用小端字节序（LSB first）；陀螺数据包的 24 位角度增量
//! 在线上为大端字节序（高位在前）。

pub mod commands;
pub mod feedback;
pub mod frame;
pub mod gyro;

// 重新导出常用类型
pub use commands::*;
pub use feedback::*;
pub use frame::*;
pub use gyro::*;

use std::fmt;
use thiserror::Error;

/// 校验和所在的帧区段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumSection {
    /// 帧头（字节 0..3）
    Header,
    /// 负载
    Payload,
}

impl fmt::Display for ChecksumSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumSection::Header => f.write_str("header"),
            ChecksumSection::Payload => f.write_str("payload"),
        }
    }
}

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{section} checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch {
        section: ChecksumSection,
        expected: u8,
        actual: u8,
    },

    #[error("Invalid sync byte: expected 0x3E, got 0x{0:02X}")]
    InvalidSync(u8),

    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Payload too short for {command}: expected at least {expected} bytes, got {actual}")]
    PayloadTooShort {
        command: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Payload too long: {len} bytes (max 255)")]
    PayloadTooLong { len: usize },
}

/// 8 位累加校验和（sum mod 256）
///
/// 执行器帧头与负载均使用此校验。
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}
