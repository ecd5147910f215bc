//! # NorthLock Control
//!
//! 单轴北向锁定稳定控制：读取陀螺角速度，按比例控制律向执行器发送反向速度指令，
//! 使载荷保持在零点航向。
//!
//! - [`StabilizationController`]: 连接、启动/停止、参数热更新、零点与漂移测量
//! - [`ControllerParams`] / [`ParamsUpdate`]: 控制参数与部分更新
//! - [`NorthLockConfig`]: TOML 配置文件
//! - [`law`]: 纯函数控制律

pub mod config;
mod controller;
mod error;
pub mod law;
mod params;
pub mod scheduler;
mod snapshot;
mod watchdog;

pub use config::{ActuatorSection, ConfigError, GyroSection, NorthLockConfig};
pub use controller::StabilizationController;
pub use error::ControllerError;
pub use params::{ControllerParams, GyroSign, ParamsUpdate};
pub use snapshot::{ControllerSnapshot, ZeroOffsets};
pub use watchdog::StatusWatchdog;

// 重新导出驱动层常用类型
pub use northlock_driver::{
    ActuatorLink, GyroConfig, GyroDecoder, GyroState, LinkConfig, LinkError, MotorStatus,
};
