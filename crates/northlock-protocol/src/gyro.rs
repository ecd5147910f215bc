//! 光纤速率陀螺数据包
//!
//! 陀螺以固定的内部采样率连续输出 5 字节数据包，无请求/应答：
//!
//! ```text
//! [0..3]=角度增量（24 位有符号，高位在前）  [3]=状态字节  [4]=校验
//! ```
//!
//! - 状态字节 Bit 0 为 0 时数据包有效
//! - 校验 = !(sum(字节 0..3) mod 256)
//!
//! 字节流中任何损坏或丢失的字节都会破坏对齐。[`GyroStreamParser`]
//! 每次校验失败只丢弃 1 个字节，以便在下一个有效包处重新对齐。

use bilge::prelude::*;
use bytes::{Buf, BytesMut};

/// 数据包长度
pub const GYRO_PACKET_LEN: usize = 5;

/// 每 LSB 对应的角度（度）
pub const LSB_TO_DEG: f64 = 2.384e-8;

/// 状态字节位域
///
/// bilge 默认使用 LSB first 位序，Bit 0 即故障位。
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq)]
pub struct GyroStatusByte {
    pub fault: bool,   // Bit 0: 1 表示数据无效
    pub reserved: u7, // Bit 1-7: 保留
}

/// 已校验的陀螺数据包
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GyroPacket {
    /// 24 位有符号原始计数（已符号扩展）
    pub raw: i32,
    pub status: GyroStatusByte,
}

impl GyroPacket {
    /// 数据包校验：字节 0..3 之和取反
    pub fn checksum(bytes: &[u8]) -> u8 {
        !crate::checksum(bytes)
    }

    /// 校验并解析 5 字节候选包
    ///
    /// 校验和不符或状态位置位时返回 `None`。
    pub fn parse(bytes: &[u8; GYRO_PACKET_LEN]) -> Option<Self> {
        if bytes[4] != Self::checksum(&bytes[..4]) {
            return None;
        }

        let status = GyroStatusByte::from(u8::new(bytes[3]));
        if status.fault() {
            return None;
        }

        // 高位在前的 24 位数，借助 i32 算术右移完成符号扩展
        let raw = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], 0]) >> 8;

        Some(Self { raw, status })
    }

    /// 编码一个数据包（raw 截取低 24 位）
    pub fn encode(raw: i32, status: u8) -> [u8; GYRO_PACKET_LEN] {
        let be = raw.to_be_bytes();
        let mut packet = [be[1], be[2], be[3], status, 0];
        packet[4] = Self::checksum(&packet[..4]);
        packet
    }

    /// 一个采样周期内转过的角度（度，未做漂移补偿）
    pub fn angle_delta_deg(&self) -> f64 {
        self.raw as f64 * LSB_TO_DEG * -2.0
    }
}

/// 陀螺字节流重同步解析器
///
/// # Example
///
/// ```
/// use northlock_protocol::{GyroPacket, GyroStreamParser};
///
/// let mut parser = GyroStreamParser::new();
/// parser.push(&[0xAA]); // 噪声字节
/// parser.push(&GyroPacket::encode(1000, 0x00));
///
/// let packet = parser.next_packet().unwrap();
/// assert_eq!(packet.raw, 1000);
/// assert_eq!(parser.skipped_bytes(), 1);
/// ```
#[derive(Debug, Default)]
pub struct GyroStreamParser {
    buffer: BytesMut,
    skipped_bytes: u64,
}

impl GyroStreamParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
            skipped_bytes: 0,
        }
    }

    /// 追加新读到的字节
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// 取出下一个有效数据包
    ///
    /// 只要缓冲区中有 ≥5 字节就测试队首的 5 字节：有效则消费 5 字节并返回；
    /// 无效则丢弃恰好 1 个字节并重试。缓冲区不足 5 字节时返回 `None`。
    pub fn next_packet(&mut self) -> Option<GyroPacket> {
        while self.buffer.len() >= GYRO_PACKET_LEN {
            let mut candidate = [0u8; GYRO_PACKET_LEN];
            candidate.copy_from_slice(&self.buffer[..GYRO_PACKET_LEN]);

            if let Some(packet) = GyroPacket::parse(&candidate) {
                self.buffer.advance(GYRO_PACKET_LEN);
                return Some(packet);
            }

            self.buffer.advance(1);
            self.skipped_bytes += 1;
        }

        None
    }

    /// 累计丢弃的字节数
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    /// 当前缓冲的字节数
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// 清空缓冲（不重置计数）
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
