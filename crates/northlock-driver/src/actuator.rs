//! RS-485 执行器链路
//!
//! 半双工点对点链路：每条应答式命令先写请求帧，等待一个命令间隔，
//! 再从字节流中同步并读取一帧响应。仅写命令（控制回路使用）不等待响应，
//! 由状态任务在下一次应答式交互前通过 [`ActuatorLink::drain_receive_buffer`] 清掉残留应答。

use crate::error::LinkError;
use northlock_protocol::{
    AbsoluteAngleCommand, ActuatorFrame, CommandCode, ErrorFlags, FRAME_SYNC, FrameHeader,
    HEADER_LEN, ModelInfo, MotorStatus, SingleTurnAngle, SpeedCommand,
};
use northlock_serial::{PortSettings, SerialError, SerialPortTransport, SerialTransport};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// 执行器链路配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConfig {
    /// 设备 ID
    pub device_id: u8,
    /// 单帧响应超时
    pub response_timeout: Duration,
    /// 写请求后、读响应前的等待时间
    pub inter_command_delay: Duration,
    /// `read_status` 超时后的重试次数
    pub status_retries: u32,
    /// 重试前的退避时间
    pub retry_backoff: Duration,
    /// 清空接收缓冲时每轮等待残留字节到达的时间
    pub drain_settle: Duration,
    /// 清空接收缓冲的最大轮数
    pub drain_rounds: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_id: 0x01,
            response_timeout: Duration::from_millis(250),
            inter_command_delay: Duration::from_millis(20),
            status_retries: 2,
            retry_backoff: Duration::from_millis(20),
            drain_settle: Duration::from_millis(10),
            drain_rounds: 2,
        }
    }
}

/// 执行器链路
///
/// 不是线程安全的；多个任务共享时由调用方加锁（见控制层的执行器 IO 锁）。
pub struct ActuatorLink {
    transport: Option<Box<dyn SerialTransport>>,
    config: LinkConfig,
}

impl ActuatorLink {
    /// 按执行器预设（115200 8N1）打开串口
    pub fn open(port: &str, config: LinkConfig) -> Result<Self, LinkError> {
        let settings = PortSettings::actuator().with_read_timeout(config.response_timeout);
        let transport = SerialPortTransport::open(port, settings)?;
        Self::new(transport, config)
    }

    /// 在已打开的传输上创建链路
    ///
    /// 打开时清空收发缓冲，丢弃上电或上次会话残留的字节。
    pub fn new(transport: impl SerialTransport + 'static, config: LinkConfig) -> Result<Self, LinkError> {
        let mut transport: Box<dyn SerialTransport> = Box::new(transport);
        transport.clear_all()?;
        info!(
            "Actuator link opened on {} (device 0x{:02X})",
            transport.name(),
            config.device_id
        );

        Ok(Self {
            transport: Some(transport),
            config,
        })
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// 关闭链路（幂等）
    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            info!("Actuator link on {} closed", transport.name());
        }
    }

    fn transport(&mut self) -> Result<&mut Box<dyn SerialTransport>, LinkError> {
        self.transport.as_mut().ok_or(LinkError::NotConnected)
    }

    fn build_frame(&self, command: CommandCode, payload: &[u8]) -> Result<ActuatorFrame, LinkError> {
        Ok(ActuatorFrame::new(command, self.config.device_id, payload)?)
    }

    /// 写出一帧请求，返回写出的帧
    ///
    /// # 错误
    /// - `LinkError::NotConnected`: 链路已关闭
    /// - `LinkError::Serial`: 写入失败
    pub fn send(&mut self, command: CommandCode, payload: &[u8]) -> Result<ActuatorFrame, LinkError> {
        let frame = self.build_frame(command, payload)?;
        let bytes = frame.encode();
        debug!("TX {} {:02X?}", command.name(), bytes);
        self.transport()?.write_all(&bytes)?;
        Ok(frame)
    }

    /// 只写不读
    pub fn send_fire_and_forget(&mut self, command: CommandCode, payload: &[u8]) -> Result<(), LinkError> {
        self.send(command, payload).map(|_| ())
    }

    /// 写请求并读取一帧响应
    ///
    /// 响应不校验命令码是否与请求一致。
    ///
    /// # 错误
    /// - `LinkError::Timeout`: 在 `timeout` 内没有同步字节，或帧头/负载不完整
    /// - `LinkError::ChecksumMismatch`: 帧头或负载校验失败
    pub fn send_and_receive(
        &mut self,
        command: CommandCode,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<ActuatorFrame, LinkError> {
        self.send(command, payload)?;
        std::thread::sleep(self.config.inter_command_delay);

        let frame = self.receive_frame(timeout)?;
        debug!(
            "RX 0x{:02X} from 0x{:02X}, {} byte payload",
            frame.command,
            frame.device_id,
            frame.payload.len()
        );
        Ok(frame)
    }

    fn request(&mut self, command: CommandCode, payload: &[u8]) -> Result<ActuatorFrame, LinkError> {
        let timeout = self.config.response_timeout;
        self.send_and_receive(command, payload, timeout)
    }

    /// 读取一帧：逐字节搜索同步字节，再按帧头长度读取负载
    fn receive_frame(&mut self, timeout: Duration) -> Result<ActuatorFrame, LinkError> {
        let deadline = Instant::now() + timeout;
        let transport = self.transport()?;

        let mut skipped = 0usize;
        loop {
            let mut byte = [0u8; 1];
            if read_exact_until(&mut **transport, &mut byte, deadline)? == 0 {
                return Err(LinkError::Timeout("waiting for sync byte"));
            }
            if byte[0] == FRAME_SYNC {
                break;
            }
            skipped += 1;
        }
        if skipped > 0 {
            trace!("Skipped {} bytes before sync", skipped);
        }

        let mut head = [0u8; HEADER_LEN];
        head[0] = FRAME_SYNC;
        if read_exact_until(&mut **transport, &mut head[1..], deadline)? < HEADER_LEN - 1 {
            return Err(LinkError::Timeout("reading header"));
        }
        let header = FrameHeader::parse(&head)?;

        let mut body = vec![0u8; header.body_len()];
        if read_exact_until(&mut **transport, &mut body, deadline)? < body.len() {
            return Err(LinkError::Timeout("reading payload"));
        }

        Ok(header.finish(&body)?)
    }

    /// 丢弃接收缓冲区中的残留字节
    ///
    /// 每轮先等待 `drain_settle`，再丢弃当前可读的全部字节；某一轮没有字节时提前结束。
    /// 链路关闭时返回 0。
    pub fn drain_receive_buffer(&mut self) -> Result<usize, LinkError> {
        let settle = self.config.drain_settle;
        let rounds = self.config.drain_rounds;
        let Some(transport) = self.transport.as_mut() else {
            return Ok(0);
        };

        let mut drained = 0;
        let mut buf = [0u8; 256];
        for _ in 0..rounds {
            std::thread::sleep(settle);

            let mut round = 0;
            loop {
                let n = transport.try_read(&mut buf)?;
                if n == 0 {
                    break;
                }
                round += n;
            }
            if round == 0 {
                break;
            }
            drained += round;
        }

        if drained > 0 {
            debug!("Drained {} stale bytes", drained);
        }
        Ok(drained)
    }

    /// 读取电机状态 (0x9C)
    ///
    /// 超时后清空接收缓冲、退避 `retry_backoff` 再重试，最多重试 `retries` 次；
    /// 全部超时时返回最后一次的超时错误。其他错误不重试。
    pub fn read_status(&mut self, retries: u32) -> Result<MotorStatus, LinkError> {
        let mut attempt = 0;
        loop {
            let err = match self.request(CommandCode::ReadStatus, &[]) {
                Ok(frame) => return Ok(MotorStatus::from_payload(&frame.payload)?),
                Err(e) if e.is_timeout() => e,
                Err(e) => return Err(e),
            };

            if attempt >= retries {
                return Err(err);
            }
            attempt += 1;
            warn!("Status read timed out ({}), retry {}/{}", err, attempt, retries);

            if let Some(transport) = self.transport.as_mut()
                && let Err(e) = transport.clear_input()
            {
                debug!("Failed to clear input before retry: {}", e);
            }
            std::thread::sleep(self.config.retry_backoff);
        }
    }

    /// 使用默认重试次数读取状态
    pub fn read_status_default(&mut self) -> Result<MotorStatus, LinkError> {
        self.read_status(self.config.status_retries)
    }

    /// 读取单圈角度 (0x94)，单位度，范围 [0, 360)
    pub fn read_single_turn_angle_deg(&mut self) -> Result<f64, LinkError> {
        let frame = self.request(CommandCode::ReadSingleTurnAngle, &[])?;
        Ok(SingleTurnAngle::from_payload(&frame.payload)?.degrees())
    }

    /// 速度控制 (0xA2)，等待应答
    pub fn set_speed_deg_per_sec(&mut self, deg_per_sec: f64) -> Result<(), LinkError> {
        let cmd = SpeedCommand::from_deg_per_sec(deg_per_sec);
        self.request(CommandCode::SetSpeed, &cmd.payload())?;
        Ok(())
    }

    /// 速度控制 (0xA2)，不等待应答
    pub fn set_speed_fire_and_forget(&mut self, deg_per_sec: f64) -> Result<(), LinkError> {
        let cmd = SpeedCommand::from_deg_per_sec(deg_per_sec);
        self.send_fire_and_forget(CommandCode::SetSpeed, &cmd.payload())
    }

    /// 绝对位置控制 (0xA3)
    pub fn move_to_absolute_angle_deg(&mut self, angle_deg: f64) -> Result<(), LinkError> {
        let cmd = AbsoluteAngleCommand::from_deg(angle_deg);
        self.request(CommandCode::MoveToAbsoluteAngle, &cmd.payload())?;
        Ok(())
    }

    /// 读取型号信息 (0x12)
    pub fn read_model_info(&mut self) -> Result<ModelInfo, LinkError> {
        let frame = self.request(CommandCode::ReadModelInfo, &[])?;
        Ok(ModelInfo::from_payload(&frame.payload))
    }

    /// 读取错误标志 (0x9A)
    pub fn read_error_flags(&mut self) -> Result<ErrorFlags, LinkError> {
        let frame = self.request(CommandCode::ReadErrorFlags, &[])?;
        Ok(ErrorFlags::from_payload(&frame.payload))
    }

    /// 清除错误标志 (0x9B)
    pub fn clear_error_flags(&mut self) -> Result<(), LinkError> {
        self.request(CommandCode::ClearErrorFlags, &[])?;
        Ok(())
    }

    /// 关闭电机输出 (0x80)
    pub fn shutdown(&mut self) -> Result<(), LinkError> {
        self.request(CommandCode::Shutdown, &[])?;
        Ok(())
    }
}

impl Drop for ActuatorLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// 在截止时间前尽量填满 `buf`，返回实际读到的字节数
///
/// 读超时不是错误，只会让返回值小于 `buf.len()`。
fn read_exact_until(
    transport: &mut dyn SerialTransport,
    buf: &mut [u8],
    deadline: Instant,
) -> Result<usize, SerialError> {
    let mut filled = 0;
    while filled < buf.len() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match transport.read_timeout(&mut buf[filled..], deadline - now) {
            Ok(n) => filled += n,
            Err(SerialError::Timeout) => {},
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use northlock_protocol::{ChecksumSection, ProtocolError};
    use northlock_serial::{MockHandle, MockTransport};

    fn fast_config() -> LinkConfig {
        LinkConfig {
            response_timeout: Duration::from_millis(30),
            inter_command_delay: Duration::ZERO,
            retry_backoff: Duration::from_millis(1),
            drain_settle: Duration::from_millis(1),
            ..LinkConfig::default()
        }
    }

    fn link() -> (ActuatorLink, MockHandle) {
        let (transport, handle) = MockTransport::new("mock-actuator");
        let link = ActuatorLink::new(transport, fast_config()).unwrap();
        (link, handle)
    }

    fn response(command: CommandCode, payload: &[u8]) -> Vec<u8> {
        ActuatorFrame::new(command, 0x01, payload).unwrap().encode()
    }

    fn status_payload() -> Vec<u8> {
        let mut data = vec![35u8];
        data.extend_from_slice(&12i16.to_le_bytes());
        data.extend_from_slice(&(-40i16).to_le_bytes());
        data.extend_from_slice(&1234u16.to_le_bytes());
        data
    }

    #[test]
    fn test_open_clears_buffers() {
        let (_link, handle) = link();
        assert_eq!(handle.clear_count(), 1);
    }

    #[test]
    fn test_send_writes_encoded_frame() {
        let (mut link, handle) = link();
        link.set_speed_fire_and_forget(100.0).unwrap();
        assert_eq!(
            handle.written(),
            vec![vec![0x3E, 0xA2, 0x01, 0x04, 0xE5, 0x10, 0x27, 0x00, 0x00, 0x37]]
        );
    }

    #[test]
    fn test_closed_link_rejects_commands() {
        let (mut link, handle) = link();
        link.close();
        assert!(!link.is_connected());
        assert!(handle.is_dropped());
        assert!(matches!(
            link.send(CommandCode::ReadStatus, &[]),
            Err(LinkError::NotConnected)
        ));
        assert_eq!(link.drain_receive_buffer().unwrap(), 0);
    }

    #[test]
    fn test_read_status_skips_noise_before_sync() {
        let (mut link, handle) = link();
        let payload = status_payload();
        handle.set_responder(move |_| {
            let mut bytes = vec![0x00, 0xFF, 0x12];
            bytes.extend(response(CommandCode::ReadStatus, &payload));
            Some(bytes)
        });

        let status = link.read_status(0).unwrap();
        assert_eq!(status.temperature_c, 35);
        assert_eq!(status.torque_current_raw, 12);
        assert_eq!(status.speed_raw, -40);
        assert_eq!(status.encoder_pos, 1234);
    }

    #[test]
    fn test_read_angle() {
        let (mut link, handle) = link();
        handle.set_responder(|_| Some(response(CommandCode::ReadSingleTurnAngle, &4200u16.to_le_bytes())));
        let angle = link.read_single_turn_angle_deg().unwrap();
        assert!((angle - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_timeout_without_response() {
        let (mut link, _handle) = link();
        let err = link.read_single_turn_angle_deg().unwrap_err();
        assert!(matches!(err, LinkError::Timeout("waiting for sync byte")));
    }

    #[test]
    fn test_truncated_header_times_out() {
        let (mut link, handle) = link();
        handle.set_responder(|_| Some(vec![0x3E, 0x94]));
        let err = link.read_single_turn_angle_deg().unwrap_err();
        assert!(matches!(err, LinkError::Timeout("reading header")));
    }

    #[test]
    fn test_header_checksum_mismatch() {
        let (mut link, handle) = link();
        handle.set_responder(|_| Some(vec![0x3E, 0x94, 0x01, 0x02, 0x00]));
        let err = link.read_single_turn_angle_deg().unwrap_err();
        assert!(matches!(
            err,
            LinkError::ChecksumMismatch {
                section: ChecksumSection::Header,
                expected: 0xD5,
                actual: 0x00,
            }
        ));
    }

    #[test]
    fn test_payload_checksum_mismatch() {
        let (mut link, handle) = link();
        handle.set_responder(|_| {
            let mut bytes = response(CommandCode::ReadSingleTurnAngle, &[0x10, 0x20]);
            let last = bytes.len() - 1;
            bytes[last] ^= 0xFF;
            Some(bytes)
        });
        let err = link.read_single_turn_angle_deg().unwrap_err();
        assert!(matches!(
            err,
            LinkError::ChecksumMismatch {
                section: ChecksumSection::Payload,
                ..
            }
        ));
    }

    #[test]
    fn test_short_status_payload_is_protocol_error() {
        let (mut link, handle) = link();
        handle.set_responder(|_| Some(response(CommandCode::ReadStatus, &[1, 2, 3])));
        let err = link.read_status(2).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Protocol(ProtocolError::PayloadTooShort { actual: 3, .. })
        ));
        // 协议错误不重试
        assert_eq!(handle.written().len(), 1);
    }

    #[test]
    fn test_read_status_retries_on_timeout() {
        let (mut link, handle) = link();
        let payload = status_payload();
        let mut calls = 0;
        handle.set_responder(move |_| {
            calls += 1;
            if calls < 3 {
                None
            } else {
                Some(response(CommandCode::ReadStatus, &payload))
            }
        });

        let status = link.read_status(2).unwrap();
        assert_eq!(status.encoder_pos, 1234);
        assert_eq!(handle.written().len(), 3);
        // 打开时清空一次，两次重试前各清空一次
        assert_eq!(handle.clear_count(), 3);
    }

    #[test]
    fn test_read_status_propagates_last_timeout() {
        let (mut link, handle) = link();
        let err = link.read_status(2).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(handle.written().len(), 3);
    }

    #[test]
    fn test_drain_discards_pending_bytes() {
        let (mut link, handle) = link();
        handle.push_rx(&response(CommandCode::SetSpeed, &[0, 0, 0, 0]));
        assert_eq!(link.drain_receive_buffer().unwrap(), 10);
        assert_eq!(handle.rx_len(), 0);
        assert_eq!(link.drain_receive_buffer().unwrap(), 0);
    }

    #[test]
    fn test_model_info_and_error_flags() {
        let (mut link, handle) = link();
        handle.set_responder(|written| match written[1] {
            0x12 => {
                let mut data = vec![0u8; 42];
                data[..4].copy_from_slice(b"RMD1");
                data[40] = 10;
                data[41] = 21;
                Some(response(CommandCode::ReadModelInfo, &data))
            },
            0x9A => Some(response(CommandCode::ReadErrorFlags, &[40, 0, 0xF0, 0x00])),
            _ => Some(response(CommandCode::ClearErrorFlags, &[])),
        });

        let info = link.read_model_info().unwrap();
        assert_eq!(info.driver_name, "RMD1");
        assert_eq!(info.hw_version, Some(1.0));

        let flags = link.read_error_flags().unwrap();
        assert_eq!(flags.temperature_c, Some(40));
        assert_eq!(flags.flags_byte, None);

        link.clear_error_flags().unwrap();
        assert_eq!(handle.written().last().unwrap()[1], 0x9B);
    }

    #[test]
    fn test_move_to_absolute_angle_payload() {
        let (mut link, handle) = link();
        handle.set_responder(|written| {
            let frame = ActuatorFrame::decode(written).ok()?;
            Some(frame.encode())
        });

        link.move_to_absolute_angle_deg(90.0).unwrap();
        let written = handle.written();
        let frame = ActuatorFrame::decode(&written[0]).unwrap();
        assert_eq!(frame.command_code(), Some(CommandCode::MoveToAbsoluteAngle));
        assert_eq!(frame.payload, 9_000i64.to_le_bytes().to_vec());
    }
}
