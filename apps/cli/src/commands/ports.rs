//! ports 命令

use anyhow::{Context, Result};
use northlock_driver::available_ports;

/// 列出系统中的串口
pub fn list_ports() -> Result<()> {
    let ports = available_ports().context("枚举串口失败")?;

    if ports.is_empty() {
        println!("⚠️  未找到串口");
        return Ok(());
    }

    println!("📋 可用串口:");
    for port in ports {
        println!("  {:<20} {}", port.name, port.description);
    }

    Ok(())
}
