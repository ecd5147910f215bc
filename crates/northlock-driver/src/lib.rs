//! # NorthLock Driver
//!
//! 设备驱动层：
//! - [`ActuatorLink`]: RS-485 执行器链路（应答式命令与仅写命令）
//! - [`GyroDecoder`]: 光纤陀螺后台解码线程（重同步、漂移补偿、角度积分）
//!
//! 两者都不做任何控制计算；控制回路见 `northlock-control`。

pub mod actuator;
mod error;
pub mod gyro;

pub use actuator::{ActuatorLink, LinkConfig};
pub use error::LinkError;
pub use gyro::{GyroConfig, GyroDecoder, GyroIntegrator, GyroState};

// 上层常用的协议/串口类型
pub use northlock_protocol::{ErrorFlags, ModelInfo, MotorStatus};
pub use northlock_serial::{PortInfo, SerialError, SerialTransport, available_ports};
