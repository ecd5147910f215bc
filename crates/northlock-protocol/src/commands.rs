//! 执行器命令码与请求负载
//!
//! | 命令码 | 名称 | 请求负载 |
//! |---|---|---|
//! | 0x12 | 读取型号信息 | 无 |
//! | 0x9C | 读取状态 | 无 |
//! | 0x9A | 读取错误标志 | 无 |
//! | 0x9B | 清除错误标志 | 无 |
//! | 0x80 | 关闭/停止 | 无 |
//! | 0x94 | 读取单圈角度 | 无 |
//! | 0xA2 | 速度控制 | i32 LE，0.01 °/s |
//! | 0xA3 | 绝对位置控制 | i64 LE，0.01 ° |

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 执行器命令码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum CommandCode {
    /// 读取型号信息（驱动名、电机名、软硬件版本）
    ReadModelInfo = 0x12,
    /// 关闭电机输出（停止）
    Shutdown = 0x80,
    /// 读取单圈绝对角度
    ReadSingleTurnAngle = 0x94,
    /// 读取错误标志
    ReadErrorFlags = 0x9A,
    /// 清除错误标志
    ClearErrorFlags = 0x9B,
    /// 读取状态（温度、转矩电流、速度、编码器）
    ReadStatus = 0x9C,
    /// 速度闭环控制
    SetSpeed = 0xA2,
    /// 绝对位置闭环控制
    MoveToAbsoluteAngle = 0xA3,
}

impl CommandCode {
    /// 可读名称（用于日志与错误信息）
    pub fn name(self) -> &'static str {
        match self {
            CommandCode::ReadModelInfo => "read model info",
            CommandCode::Shutdown => "shutdown",
            CommandCode::ReadSingleTurnAngle => "read single-turn angle",
            CommandCode::ReadErrorFlags => "read error flags",
            CommandCode::ClearErrorFlags => "clear error flags",
            CommandCode::ReadStatus => "read status",
            CommandCode::SetSpeed => "set speed",
            CommandCode::MoveToAbsoluteAngle => "move to absolute angle",
        }
    }
}

/// 速度控制指令 (0xA2)
///
/// 单位 0.01 °/s，小数部分向零截断。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedCommand {
    pub centi_deg_per_sec: i32,
}

impl SpeedCommand {
    /// 从 °/s 创建（超出 i32 范围时饱和，NaN 视为 0）
    pub fn from_deg_per_sec(deg_per_sec: f64) -> Self {
        Self {
            centi_deg_per_sec: (deg_per_sec * 100.0) as i32,
        }
    }

    /// 零速指令
    pub fn zero() -> Self {
        Self {
            centi_deg_per_sec: 0,
        }
    }

    pub fn deg_per_sec(&self) -> f64 {
        self.centi_deg_per_sec as f64 * 0.01
    }

    /// 编码为请求负载
    pub fn payload(&self) -> [u8; 4] {
        self.centi_deg_per_sec.to_le_bytes()
    }
}

/// 绝对位置控制指令 (0xA3)
///
/// 单位 0.01 °，小数部分向零截断。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsoluteAngleCommand {
    pub centi_deg: i64,
}

impl AbsoluteAngleCommand {
    pub fn from_deg(angle_deg: f64) -> Self {
        Self {
            centi_deg: (angle_deg * 100.0) as i64,
        }
    }

    pub fn deg(&self) -> f64 {
        self.centi_deg as f64 * 0.01
    }

    /// 编码为请求负载
    pub fn payload(&self) -> [u8; 8] {
        self.centi_deg.to_le_bytes()
    }
}
