//! RS-485 执行器帧
//!
//! 线上格式（固定）：
//!
//! ```text
//! [0]=0x3E  [1]=CMD  [2]=ID  [3]=LEN  [4]=CHK_HEAD  [5..5+LEN]=DATA  [末尾]=CHK_DATA（仅 LEN>0）
//! ```
//!
//! - `CHK_HEAD` = sum(字节 0..3) mod 256
//! - `CHK_DATA` = sum(DATA) mod 256

use crate::commands::CommandCode;
use crate::{ChecksumSection, ProtocolError, checksum};

/// 帧同步字节
pub const FRAME_SYNC: u8 = 0x3E;

/// 帧头长度（含帧头校验字节）
pub const HEADER_LEN: usize = 5;

/// 单帧最大负载长度（LEN 字段为 u8）
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// 执行器帧
///
/// 协议层和串口层之间的中间抽象，构建请求与解析响应共用同一类型。
///
/// # 转换示例
///
/// ```rust
/// use northlock_protocol::{ActuatorFrame, CommandCode};
///
/// let frame = ActuatorFrame::new(CommandCode::ReadStatus, 0x01, &[]).unwrap();
/// let bytes = frame.encode();
/// assert_eq!(bytes, vec![0x3E, 0x9C, 0x01, 0x00, 0xDB]);
///
/// let decoded = ActuatorFrame::decode(&bytes).unwrap();
/// assert_eq!(decoded, frame);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorFrame {
    /// 命令码（响应帧中可能出现未知命令码，因此保留原始值）
    pub command: u8,
    /// 设备 ID
    pub device_id: u8,
    /// 负载（0..=255 字节）
    pub payload: Vec<u8>,
}

impl ActuatorFrame {
    /// 创建帧
    ///
    /// # 错误
    /// - `ProtocolError::PayloadTooLong`: 负载超过 255 字节
    pub fn new(
        command: impl Into<u8>,
        device_id: u8,
        payload: &[u8],
    ) -> Result<Self, ProtocolError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLong { len: payload.len() });
        }

        Ok(Self {
            command: command.into(),
            device_id,
            payload: payload.to_vec(),
        })
    }

    /// 已知命令码（未知返回 `None`）
    pub fn command_code(&self) -> Option<CommandCode> {
        CommandCode::try_from(self.command).ok()
    }

    /// 帧头前 4 字节（不含校验）
    pub fn header_bytes(&self) -> [u8; 4] {
        [
            FRAME_SYNC,
            self.command,
            self.device_id,
            self.payload.len() as u8,
        ]
    }

    /// 编码后的总字节数
    pub fn encoded_len(&self) -> usize {
        if self.payload.is_empty() {
            HEADER_LEN
        } else {
            HEADER_LEN + self.payload.len() + 1
        }
    }

    /// 编码为线上字节
    pub fn encode(&self) -> Vec<u8> {
        let header = self.header_bytes();
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(&header);
        bytes.push(checksum(&header));

        if !self.payload.is_empty() {
            bytes.extend_from_slice(&self.payload);
            bytes.push(checksum(&self.payload));
        }

        bytes
    }

    /// 从完整的一帧字节解析（首字节必须是同步字节）
    ///
    /// 流式读取场景请使用 [`FrameHeader::parse`] + [`FrameHeader::finish`]，
    /// 由调用方按帧头给出的长度继续读取负载。
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let mut head = [0u8; HEADER_LEN];
        head.copy_from_slice(&bytes[..HEADER_LEN]);
        let header = FrameHeader::parse(&head)?;

        let expected = HEADER_LEN + header.body_len();
        if bytes.len() != expected {
            return Err(ProtocolError::InvalidLength {
                expected,
                actual: bytes.len(),
            });
        }

        header.finish(&bytes[HEADER_LEN..])
    }
}

/// 已校验的帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub command: u8,
    pub device_id: u8,
    pub payload_len: u8,
}

impl FrameHeader {
    /// 解析并校验 5 字节帧头
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        if bytes[0] != FRAME_SYNC {
            return Err(ProtocolError::InvalidSync(bytes[0]));
        }

        let expected = checksum(&bytes[..4]);
        if bytes[4] != expected {
            return Err(ProtocolError::ChecksumMismatch {
                section: ChecksumSection::Header,
                expected,
                actual: bytes[4],
            });
        }

        Ok(Self {
            command: bytes[1],
            device_id: bytes[2],
            payload_len: bytes[3],
        })
    }

    /// 帧头之后还需读取的字节数（负载 + 负载校验；无负载时为 0）
    pub fn body_len(&self) -> usize {
        match self.payload_len {
            0 => 0,
            n => n as usize + 1,
        }
    }

    /// 校验负载并组装完整帧
    ///
    /// `body` 必须恰好为 [`body_len`](Self::body_len) 字节。
    pub fn finish(self, body: &[u8]) -> Result<ActuatorFrame, ProtocolError> {
        if body.len() != self.body_len() {
            return Err(ProtocolError::InvalidLength {
                expected: self.body_len(),
                actual: body.len(),
            });
        }

        let payload = match body.split_last() {
            None => Vec::new(),
            Some((&actual, data)) => {
                let expected = checksum(data);
                if actual != expected {
                    return Err(ProtocolError::ChecksumMismatch {
                        section: ChecksumSection::Payload,
                        expected,
                        actual,
                    });
                }
                data.to_vec()
            },
        };

        Ok(ActuatorFrame {
            command: self.command,
            device_id: self.device_id,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_without_payload() {
        let frame = ActuatorFrame::new(CommandCode::ReadSingleTurnAngle, 0x01, &[]).unwrap();
        // 0x3E + 0x94 + 0x01 + 0x00 = 0xD3
        assert_eq!(frame.encode(), vec![0x3E, 0x94, 0x01, 0x00, 0xD3]);
        assert_eq!(frame.encoded_len(), 5);
    }

    #[test]
    fn test_encode_with_payload() {
        let frame = ActuatorFrame::new(CommandCode::SetSpeed, 0x01, &[0x10, 0x27, 0x00, 0x00]).unwrap();
        let bytes = frame.encode();
        assert_eq!(bytes.len(), 10);
        assert_eq!(&bytes[..5], &[0x3E, 0xA2, 0x01, 0x04, 0xE5]);
        assert_eq!(&bytes[5..9], &[0x10, 0x27, 0x00, 0x00]);
        assert_eq!(bytes[9], 0x37);
    }

    #[test]
    fn test_payload_too_long() {
        let payload = vec![0u8; 256];
        let err = ActuatorFrame::new(0x12u8, 0x01, &payload).unwrap_err();
        assert_eq!(err, ProtocolError::PayloadTooLong { len: 256 });
    }

    #[test]
    fn test_header_checksum_mismatch() {
        let err = FrameHeader::parse(&[0x3E, 0x9C, 0x01, 0x00, 0x00]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::ChecksumMismatch {
                section: ChecksumSection::Header,
                expected: 0xDB,
                actual: 0x00,
            }
        );
    }

    #[test]
    fn test_invalid_sync() {
        let err = FrameHeader::parse(&[0x3D, 0x9C, 0x01, 0x00, 0xDA]).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidSync(0x3D));
    }

    #[test]
    fn test_decode_rejects_truncated_frame() {
        let frame = ActuatorFrame::new(CommandCode::ReadStatus, 0x01, &[1, 2, 3]).unwrap();
        let bytes = frame.encode();
        let err = ActuatorFrame::decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidLength {
                expected: 9,
                actual: 8,
            }
        );
    }

    #[test]
    fn test_unknown_command_code_is_preserved() {
        let frame = ActuatorFrame::new(0x55u8, 0x02, &[0xAA]).unwrap();
        let decoded = ActuatorFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.command, 0x55);
        assert_eq!(decoded.command_code(), None);
    }

    proptest! {
        /// 任意帧编码后再解析，得到相同的 (command, device_id, payload)
        #[test]
        fn prop_frame_roundtrip(
            command in any::<u8>(),
            device_id in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD_LEN),
        ) {
            let frame = ActuatorFrame::new(command, device_id, &payload).unwrap();
            let decoded = ActuatorFrame::decode(&frame.encode()).unwrap();
            prop_assert_eq!(decoded, frame);
        }

        /// 负载中任一字节被篡改都必须检测为负载校验失败
        #[test]
        fn prop_payload_corruption_detected(
            payload in proptest::collection::vec(any::<u8>(), 1..64),
            index in any::<proptest::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let frame = ActuatorFrame::new(CommandCode::ReadModelInfo, 0x01, &payload).unwrap();
            let mut bytes = frame.encode();
            let pos = HEADER_LEN + index.index(payload.len() + 1);
            bytes[pos] ^= flip;

            let err = ActuatorFrame::decode(&bytes).unwrap_err();
            let is_payload_mismatch = matches!(
                err,
                ProtocolError::ChecksumMismatch { section: ChecksumSection::Payload, .. }
            );
            prop_assert!(is_payload_mismatch, "unexpected error: {:?}", err);
        }
    }
}
