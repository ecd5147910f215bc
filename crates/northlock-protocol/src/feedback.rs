//! 执行器响应负载解析
//!
//! 可变长度负载中的可选字段按最小长度防御式解析：长度不足时字段为 `None`，
//! 而不是报错。只有状态与单圈角度这两个控制回路依赖的响应在长度不足时返回错误。

use crate::ProtocolError;

/// 状态响应 (0x9C) 负载最小长度
pub const STATUS_PAYLOAD_LEN: usize = 7;

/// 单圈角度响应 (0x94) 负载最小长度
pub const SINGLE_TURN_ANGLE_PAYLOAD_LEN: usize = 2;

/// 型号信息中名称字段的长度
pub const MODEL_NAME_LEN: usize = 20;

/// 电机状态 (0x9C)
///
/// 一次读取的不可变快照。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotorStatus {
    /// 电机温度（℃）
    pub temperature_c: i8,
    /// 转矩电流原始值
    pub torque_current_raw: i16,
    /// 速度原始值
    pub speed_raw: i16,
    /// 编码器位置
    pub encoder_pos: u16,
}

impl MotorStatus {
    /// 解析状态负载
    ///
    /// 布局：`i8 温度, i16 LE 电流, i16 LE 速度, u16 LE 编码器`
    pub fn from_payload(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < STATUS_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooShort {
                command: "read status",
                expected: STATUS_PAYLOAD_LEN,
                actual: data.len(),
            });
        }

        Ok(Self {
            temperature_c: data[0] as i8,
            torque_current_raw: i16::from_le_bytes([data[1], data[2]]),
            speed_raw: i16::from_le_bytes([data[3], data[4]]),
            encoder_pos: u16::from_le_bytes([data[5], data[6]]),
        })
    }
}

/// 单圈角度 (0x94)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleTurnAngle {
    /// 原始值，单位 0.01 °
    pub raw: u16,
}

impl SingleTurnAngle {
    pub fn from_payload(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < SINGLE_TURN_ANGLE_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooShort {
                command: "read single-turn angle",
                expected: SINGLE_TURN_ANGLE_PAYLOAD_LEN,
                actual: data.len(),
            });
        }

        Ok(Self {
            raw: u16::from_le_bytes([data[0], data[1]]),
        })
    }

    /// 角度（度），范围 [0, 360)
    pub fn degrees(&self) -> f64 {
        self.raw as f64 * 0.01
    }
}

/// 型号信息 (0x12)
///
/// 字段与最小长度：
/// - `driver_name`: 字节 0..20（长度 ≥ 20）
/// - `motor_name`: 字节 20..40（长度 ≥ 40）
/// - `hw_version` / `fw_version`: 字节 40 / 41，×0.1（长度 ≥ 42）
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModelInfo {
    pub driver_name: String,
    pub motor_name: String,
    pub hw_version: Option<f32>,
    pub fw_version: Option<f32>,
    /// 原始负载
    pub raw: Vec<u8>,
}

impl ModelInfo {
    pub fn from_payload(data: &[u8]) -> Self {
        let driver_name = data
            .get(..MODEL_NAME_LEN)
            .map(decode_name)
            .unwrap_or_default();
        let motor_name = data
            .get(MODEL_NAME_LEN..2 * MODEL_NAME_LEN)
            .map(decode_name)
            .unwrap_or_default();

        let (hw_version, fw_version) = if data.len() >= 2 * MODEL_NAME_LEN + 2 {
            (
                Some(data[2 * MODEL_NAME_LEN] as f32 / 10.0),
                Some(data[2 * MODEL_NAME_LEN + 1] as f32 / 10.0),
            )
        } else {
            (None, None)
        };

        Self {
            driver_name,
            motor_name,
            hw_version,
            fw_version,
            raw: data.to_vec(),
        }
    }
}

/// 名称字段：丢弃非法 UTF-8 与尾部 NUL/空白
fn decode_name(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect::<String>()
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

/// 错误标志 (0x9A)
///
/// 布局随固件变化，除 `raw` 外的字段都只是参考值：
/// - `temperature_c`: 字节 0（长度 ≥ 1）
/// - `voltage_raw`: 字节 2..4，u16 LE，0.1 V/LSB（长度 ≥ 4）
/// - `flags_byte`: 字节 6（长度 ≥ 7）
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorFlags {
    pub raw: Vec<u8>,
    pub temperature_c: Option<i8>,
    pub voltage_raw: Option<u16>,
    pub flags_byte: Option<u8>,
}

impl ErrorFlags {
    pub fn from_payload(data: &[u8]) -> Self {
        Self {
            raw: data.to_vec(),
            temperature_c: data.first().map(|&b| b as i8),
            voltage_raw: data
                .get(2..4)
                .map(|v| u16::from_le_bytes([v[0], v[1]])),
            flags_byte: data.get(6).copied(),
        }
    }

    /// 电压推测值（V）
    pub fn voltage_v(&self) -> Option<f64> {
        self.voltage_raw.map(|v| v as f64 * 0.1)
    }
}
