//! 协议与控制域常量
//!
//! 占空比与角度的取值域在协议层固定；控制律的默认参数
//! （死区、斜率限制等）由节点配置层引用，可按部署覆盖。

/// 占空比上限（10-bit PWM 分辨率）
pub const DUTY_MAX: u16 = 1023;

/// 最小有效占空比（低于此值电机不转）
pub const DUTY_MIN: u16 = 250;

/// 每个控制周期允许的占空比最大变化量
pub const DUTY_STEP_MAX: u16 = 20;

/// 角度死区（度）：|误差| 不超过此值时停止输出
pub const ANGLE_DEADBAND_DEG: i16 = 2;

/// 线性控制满量程（度）
pub const ANGLE_FULL_SCALE_DEG: i16 = 180;

/// 角度域下限（度）
pub const ANGLE_MIN_DEG: i16 = 0;

/// 角度域上限（度）
pub const ANGLE_MAX_DEG: i16 = 180;

/// 将占空比钳位到合法域 `[0, DUTY_MAX]`
///
/// 编码端和解码端都会调用：载荷在传输中可能损坏，
/// 解码后的占空比必须重新钳位。
pub fn clamp_duty(duty: u16) -> u16 {
    duty.min(DUTY_MAX)
}

/// 将角度钳位到给定域 `[min, max]`
pub fn clamp_angle(angle: i16, min: i16, max: i16) -> i16 {
    angle.clamp(min, max)
}
