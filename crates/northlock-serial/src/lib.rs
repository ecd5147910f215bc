//! # NorthLock Serial Transport Layer
//!
//! 串口硬件抽象层，为执行器（RS-485）与陀螺两条链路提供统一的字节流接口。
//!
//! - [`SerialTransport`]: 驱动层依赖的最小接口
//! - [`SerialPortTransport`]: 基于 `serialport` 的实现
//! - [`PortSettings`]: 波特率/数据位/校验/停止位，带执行器与陀螺预设
//! - `MockTransport`（feature `mock`）: 无硬件测试用的内存实现

use std::io::{self, Read, Write};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

pub use serialport::{DataBits, Parity, StopBits};

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockHandle, MockTransport};

/// 串口层统一错误类型
#[derive(Error, Debug)]
pub enum SerialError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("Port Error: {0}")]
    Port(#[from] serialport::Error),
    #[error("Read timeout")]
    Timeout,
    #[error("Port closed")]
    Closed,
}

impl SerialError {
    /// IO 层的超时统一折叠为 [`SerialError::Timeout`]
    fn from_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => SerialError::Timeout,
            _ => SerialError::Io(e),
        }
    }
}

/// 串口字节流接口
///
/// 实现必须可以在线程间移动（IO 线程持有所有权）。
pub trait SerialTransport: Send {
    /// 端口名称（用于日志）
    fn name(&self) -> &str;

    /// 写入全部字节
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError>;

    /// 读取最多 `buf.len()` 字节
    ///
    /// 在读超时内没有任何数据时返回 [`SerialError::Timeout`]。
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError>;

    /// 设置读超时
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), SerialError>;

    /// 接收缓冲区中等待读取的字节数
    fn bytes_to_read(&mut self) -> Result<usize, SerialError>;

    /// 丢弃接收缓冲区
    fn clear_input(&mut self) -> Result<(), SerialError>;

    /// 丢弃收发两个缓冲区
    fn clear_all(&mut self) -> Result<(), SerialError>;

    /// 带超时的读取
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, SerialError> {
        self.set_read_timeout(timeout)?;
        self.read(buf)
    }

    /// 非阻塞读取：没有数据时返回 `Ok(0)`
    fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        let pending = self.bytes_to_read()?;
        if pending == 0 {
            return Ok(0);
        }
        let len = pending.min(buf.len());
        match self.read_timeout(&mut buf[..len], Duration::ZERO) {
            Ok(n) => Ok(n),
            Err(SerialError::Timeout) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

impl<T: SerialTransport + ?Sized> SerialTransport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        (**self).write_all(bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        (**self).read(buf)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), SerialError> {
        (**self).set_read_timeout(timeout)
    }

    fn bytes_to_read(&mut self) -> Result<usize, SerialError> {
        (**self).bytes_to_read()
    }

    fn clear_input(&mut self) -> Result<(), SerialError> {
        (**self).clear_input()
    }

    fn clear_all(&mut self) -> Result<(), SerialError> {
        (**self).clear_all()
    }
}

/// 串口参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// 打开后的默认读超时
    pub read_timeout: Duration,
}

impl PortSettings {
    /// 执行器 RS-485 链路：115200 8N1
    pub fn actuator() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout: Duration::from_millis(250),
        }
    }

    /// 陀螺链路：375000 8O1
    pub fn gyro() -> Self {
        Self {
            baud_rate: 375_000,
            data_bits: DataBits::Eight,
            parity: Parity::Odd,
            stop_bits: StopBits::One,
            read_timeout: Duration::from_millis(20),
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

impl Default for PortSettings {
    fn default() -> Self {
        Self::actuator()
    }
}

/// 基于 `serialport` 的串口实现
pub struct SerialPortTransport {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialPortTransport {
    /// 打开串口
    ///
    /// # 错误
    /// - `SerialError::Port`: 端口不存在、被占用或参数不被支持
    pub fn open(path: &str, settings: PortSettings) -> Result<Self, SerialError> {
        let port = serialport::new(path, settings.baud_rate)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .flow_control(serialport::FlowControl::None)
            .timeout(settings.read_timeout)
            .open()?;

        debug!(
            "Opened serial port {} at {} baud ({:?}/{:?}/{:?})",
            path, settings.baud_rate, settings.data_bits, settings.parity, settings.stop_bits
        );

        Ok(Self {
            port,
            name: path.to_string(),
        })
    }
}

impl SerialTransport for SerialPortTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        trace!("{} TX {:02X?}", self.name, bytes);
        self.port.write_all(bytes).map_err(SerialError::from_io)?;
        self.port.flush().map_err(SerialError::from_io)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        match self.port.read(buf) {
            // 部分平台在超时时返回 Ok(0)
            Ok(0) if !buf.is_empty() => Err(SerialError::Timeout),
            Ok(n) => Ok(n),
            Err(e) => Err(SerialError::from_io(e)),
        }
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), SerialError> {
        if self.port.timeout() != timeout {
            self.port.set_timeout(timeout)?;
        }
        Ok(())
    }

    fn bytes_to_read(&mut self) -> Result<usize, SerialError> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn clear_input(&mut self) -> Result<(), SerialError> {
        self.port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }

    fn clear_all(&mut self) -> Result<(), SerialError> {
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }
}

/// 可用串口信息
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortInfo {
    /// 端口标识（如 `/dev/ttyUSB0`、`COM3`）
    pub name: String,
    /// 人类可读描述（USB 厂商/产品名等）
    pub description: String,
}

/// 枚举系统中的串口
pub fn available_ports() -> Result<Vec<PortInfo>, SerialError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| PortInfo {
            description: describe_port_type(&p.port_type),
            name: p.port_name,
        })
        .collect())
}

fn describe_port_type(port_type: &serialport::SerialPortType) -> String {
    use serialport::SerialPortType;

    match port_type {
        SerialPortType::UsbPort(usb) => {
            let mut parts = Vec::new();
            if let Some(manufacturer) = &usb.manufacturer {
                parts.push(manufacturer.clone());
            }
            if let Some(product) = &usb.product {
                parts.push(product.clone());
            }
            if parts.is_empty() {
                format!("USB {:04x}:{:04x}", usb.vid, usb.pid)
            } else {
                format!("{} ({:04x}:{:04x})", parts.join(" "), usb.vid, usb.pid)
            }
        },
        SerialPortType::PciPort => "PCI".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        SerialPortType::Unknown => "Unknown".to_string(),
    }
}
