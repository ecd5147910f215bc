//! 控制律
//!
//! 目标角速度为 0 的比例控制：
//!
//! ```text
//! error   = gyro_sign * (-rate)
//! error   = 0               若 |error| < deadband
//! command = clamp(gain * error, ±max_command)
//! ```

use crate::params::ControllerParams;

/// 死区：`|error| < deadband` 时输出 0
pub fn apply_deadband(error: f64, deadband: f64) -> f64 {
    if error.abs() < deadband { 0.0 } else { error }
}

/// 由速率误差计算速度指令（°/s）
///
/// 非有限的误差输出 0。
pub fn command_from_error(error: f64, params: &ControllerParams) -> f64 {
    if !error.is_finite() {
        return 0.0;
    }
    let error = apply_deadband(error, params.deadband_deg_per_sec);
    let limit = params.max_command_deg_per_sec;
    (params.proportional_gain * error).clamp(-limit, limit)
}

/// 由陀螺角速度计算速度指令（°/s）
pub fn compute_command(rate_deg_per_sec: f64, params: &ControllerParams) -> f64 {
    let error = params.gyro_sign.value() * -rate_deg_per_sec;
    command_from_error(error, params)
}

/// 航向 = (raw - offset) mod 360，范围 [0, 360)
pub fn wrap_heading(raw_deg: f64, offset_deg: f64) -> f64 {
    let heading = (raw_deg - offset_deg).rem_euclid(360.0);
    // 极小的负数经 rem_euclid 可能舍入为 360.0
    if heading >= 360.0 { 0.0 } else { heading }
}
