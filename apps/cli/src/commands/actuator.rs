//! 执行器一次性命令：info / status / clear-errors / move

use anyhow::{Context, Result};
use clap::Args;
use northlock_control::NorthLockConfig;
use northlock_driver::{ErrorFlags, ModelInfo};

use crate::connection::open_actuator;

/// 型号信息与错误标志
pub fn info(config: &NorthLockConfig) -> Result<()> {
    let mut link = open_actuator(config)?;

    let model = link.read_model_info().context("读取型号信息失败")?;
    print_model_info(&model);

    let flags = link.read_error_flags().context("读取错误标志失败")?;
    print_error_flags(&flags);

    Ok(())
}

/// 读取一次状态与单圈角度
pub fn status(config: &NorthLockConfig) -> Result<()> {
    let mut link = open_actuator(config)?;

    let status = link.read_status_default().context("读取状态失败")?;
    let angle = link
        .read_single_turn_angle_deg()
        .context("读取单圈角度失败")?;

    println!("📊 执行器状态:");
    println!("  温度: {} ℃", status.temperature_c);
    println!("  转矩电流: {}", status.torque_current_raw);
    println!("  速度: {}", status.speed_raw);
    println!("  编码器: {}", status.encoder_pos);
    println!("  单圈角度: {:.2}°", angle);

    Ok(())
}

pub fn clear_errors(config: &NorthLockConfig) -> Result<()> {
    let mut link = open_actuator(config)?;
    link.clear_error_flags().context("清除错误标志失败")?;
    println!("✅ 错误标志已清除");
    Ok(())
}

fn print_model_info(model: &ModelInfo) {
    let version = |v: Option<f32>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.1}"));

    println!("📋 型号信息:");
    println!("  驱动: {}", model.driver_name);
    println!("  电机: {}", model.motor_name);
    println!("  硬件版本: {}", version(model.hw_version));
    println!("  固件版本: {}", version(model.fw_version));
}

fn print_error_flags(flags: &ErrorFlags) {
    println!("📋 错误标志: {:02X?}", flags.raw);
    if let Some(temperature) = flags.temperature_c {
        println!("  温度(推测): {} ℃", temperature);
    }
    if let Some(voltage) = flags.voltage_v() {
        println!("  电压(推测): {:.1} V", voltage);
    }
    if let Some(byte) = flags.flags_byte {
        println!("  标志字节(推测): 0x{:02X}", byte);
    }
}

/// 移动命令参数
#[derive(Args, Debug)]
pub struct MoveCommand {
    /// 目标绝对角度（度）
    #[arg(allow_negative_numbers = true)]
    pub angle_deg: f64,
}

impl MoveCommand {
    pub fn execute(&self, config: &NorthLockConfig) -> Result<()> {
        if !self.angle_deg.is_finite() {
            anyhow::bail!("目标角度必须是有限数值");
        }

        let mut link = open_actuator(config)?;

        println!("🚀 移动到 {:.2}°...", self.angle_deg);
        link.move_to_absolute_angle_deg(self.angle_deg)
            .context("移动命令失败")?;
        println!("✅ 命令已确认");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_rejects_non_finite_angle() {
        let cmd = MoveCommand {
            angle_deg: f64::NAN,
        };
        // 在打开串口之前就失败
        assert!(cmd.execute(&NorthLockConfig::default()).is_err());
    }

    #[test]
    fn test_commands_need_actuator_port() {
        let config = NorthLockConfig::default();
        assert!(status(&config).is_err());
        assert!(clear_errors(&config).is_err());
    }
}
