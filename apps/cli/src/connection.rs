//! 串口与配置解析
//!
//! 命令行参数优先于配置文件。

use anyhow::{Context, Result, anyhow};
use clap::Args;
use northlock_control::{ActuatorLink, GyroDecoder, NorthLockConfig};
use std::path::PathBuf;

/// 全局连接参数
#[derive(Args, Debug)]
pub struct ConnectionArgs {
    /// TOML 配置文件
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 执行器串口（覆盖配置）
    #[arg(short, long, global = true)]
    pub actuator: Option<String>,

    /// 陀螺串口（覆盖配置）
    #[arg(short, long, global = true)]
    pub gyro: Option<String>,
}

impl ConnectionArgs {
    /// 加载配置文件并应用命令行覆盖
    pub fn resolve(&self) -> Result<NorthLockConfig> {
        let mut config = match &self.config {
            Some(path) => NorthLockConfig::load(path)
                .with_context(|| format!("加载配置文件 {} 失败", path.display()))?,
            None => NorthLockConfig::default(),
        };

        if let Some(port) = &self.actuator {
            config.actuator.port = Some(port.clone());
        }
        if let Some(port) = &self.gyro {
            config.gyro.port = Some(port.clone());
        }

        Ok(config)
    }
}

pub fn actuator_port(config: &NorthLockConfig) -> Result<&str> {
    config
        .actuator
        .port
        .as_deref()
        .ok_or_else(|| anyhow!("未指定执行器串口（--actuator 或配置 [actuator] port）"))
}

pub fn gyro_port(config: &NorthLockConfig) -> Result<&str> {
    config
        .gyro
        .port
        .as_deref()
        .ok_or_else(|| anyhow!("未指定陀螺串口（--gyro 或配置 [gyro] port）"))
}

/// 打开执行器链路
pub fn open_actuator(config: &NorthLockConfig) -> Result<ActuatorLink> {
    let port = actuator_port(config)?;
    println!("🔌 连接执行器 {}...", port);
    ActuatorLink::open(port, config.actuator.link_config())
        .with_context(|| format!("打开执行器串口 {} 失败", port))
}

/// 打开陀螺解码器
pub fn open_gyro(config: &NorthLockConfig) -> Result<GyroDecoder> {
    let port = gyro_port(config)?;
    println!("🔌 连接陀螺 {}...", port);
    GyroDecoder::open(port, config.gyro.gyro_config())
        .with_context(|| format!("打开陀螺串口 {} 失败", port))
}
