//! 控制器快照
//!
//! 快照与零点偏移在同一把状态锁下更新，读者总能拿到一致的副本。

use northlock_protocol::MotorStatus;
use serde::Serialize;

/// 控制器对外发布的只读快照
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ControllerSnapshot {
    /// 自 `start` 起的时间（秒）
    pub elapsed_s: f64,
    pub running: bool,
    pub connected: bool,
    /// 看门狗是否已触发（下一次 `start` 清除）
    pub watchdog_tripped: bool,

    /// 陀螺角速度（°/s）
    pub gyro_rate_deg_per_sec: f64,
    /// 陀螺累积角度（度，不回绕）
    pub gyro_angle_deg: f64,
    /// 陀螺航向（度，[0, 360)，零点后为 0）
    pub gyro_heading_deg: f64,
    /// 漂移估计（°/s，控制周期与零点时更新）
    pub gyro_drift_deg_per_sec: f64,

    /// 执行器单圈角度（度）
    pub actuator_angle_deg: f64,
    /// 执行器航向（度，[0, 360)）
    pub actuator_heading_deg: f64,

    /// 最近一次速度指令（°/s）
    pub command_deg_per_sec: f64,
    /// 因执行器 IO 锁忙而跳过的指令数
    pub skipped_commands: u64,

    pub status_ok: u64,
    pub status_timeouts: u64,
    pub consecutive_status_failures: u32,
    pub motor_status: Option<MotorStatus>,

    /// 最近一次错误（被新的错误覆盖，或在成功连接/零点后清除）
    pub last_error: Option<String>,
}

/// 零点偏移：heading = (raw - offset) mod 360
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ZeroOffsets {
    pub gyro_zero_deg: f64,
    pub actuator_zero_deg: f64,
}

impl ZeroOffsets {
    pub fn gyro_heading(&self, gyro_angle_deg: f64) -> f64 {
        crate::law::wrap_heading(gyro_angle_deg, self.gyro_zero_deg)
    }

    pub fn actuator_heading(&self, actuator_angle_deg: f64) -> f64 {
        crate::law::wrap_heading(actuator_angle_deg, self.actuator_zero_deg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_offsets_headings() {
        let offsets = ZeroOffsets {
            gyro_zero_deg: 137.5,
            actuator_zero_deg: 42.0,
        };
        assert_eq!(offsets.gyro_heading(137.5), 0.0);
        assert_eq!(offsets.actuator_heading(42.0), 0.0);
        assert!((offsets.gyro_heading(140.0) - 2.5).abs() < 1e-12);
        assert!((offsets.actuator_heading(41.0) - 359.0).abs() < 1e-12);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = ControllerSnapshot {
            connected: true,
            motor_status: Some(MotorStatus {
                temperature_c: 30,
                ..MotorStatus::default()
            }),
            ..ControllerSnapshot::default()
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["connected"], true);
        assert_eq!(json["motor_status"]["temperature_c"], 30);
        assert!(json["last_error"].is_null());
    }
}
