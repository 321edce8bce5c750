//! 节点配置
//!
//! 角色、部署拓扑、控制律参数和任务周期都在启动时固定，
//! 不通过总线协商。配置可以从 TOML 文件加载，缺省值与
//! 原始部署观测到的参数一致。
//!
//! # 配置文件示例
//!
//! ```toml
//! role = "commander"
//! drive-mode = "setpoint"
//!
//! [control]
//! deadband-deg = 2
//! kp = 8.0
//!
//! [timing]
//! control-period-ms = 10
//! telemetry-period-ms = 100
//! ```

use crate::error::NodeError;
use serde::Deserialize;
use servolink_protocol::{
    Angle, ANGLE_DEADBAND_DEG, ANGLE_FULL_SCALE_DEG, ANGLE_MAX_DEG, ANGLE_MIN_DEG,
    DUTY_MAX, DUTY_MIN, DUTY_STEP_MAX,
};
use std::path::Path;
use std::time::Duration;

/// 节点角色
///
/// 一个节点实例在启动时被接到**恰好一种**控制循环变体上，
/// 共享逻辑内部不按角色做运行时分支。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// 操作员侧：读设定旋钮，驱动远端执行器
    Commander,
    /// 执行器侧：接收指令/设定值，驱动本地电机
    Actuator,
}

/// 部署拓扑（协议代际）
///
/// 两代协议在总线上不兼容且没有协商机制，同一部署的两个节点
/// 必须配置成同一种模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriveMode {
    /// 占空比走线：指挥节点计算占空比并下发电机指令，
    /// 执行节点原样施加；遥测使用编码器报告族（大端）
    Direct,
    /// 角度走线：指挥节点转发设定角度，执行节点本地闭环；
    /// 遥测使用反馈消息族（小端）
    Setpoint,
}

/// 角度取值域（度）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AngleRange {
    pub min: Angle,
    pub max: Angle,
}

impl Default for AngleRange {
    fn default() -> Self {
        Self {
            min: ANGLE_MIN_DEG,
            max: ANGLE_MAX_DEG,
        }
    }
}

impl AngleRange {
    /// 把角度钳位到本域
    pub fn clamp(&self, angle: Angle) -> Angle {
        servolink_protocol::clamp_angle(angle, self.min, self.max)
    }
}

/// 控制律参数
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ControlConfig {
    /// 角度死区（度）：|误差| 不超过此值时停止输出
    pub deadband_deg: i16,
    /// 线性控制满量程（度）
    pub full_scale_deg: i16,
    /// 最小有效占空比（低于此值电机不转）
    pub duty_min: u16,
    /// 占空比上限
    pub duty_max: u16,
    /// 每个控制周期允许的占空比最大变化量（仅指挥节点的斜坡路径）
    pub duty_step_max: u16,
    /// 执行节点本地闭环的比例增益（占空比 / 度）
    pub kp: f32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            deadband_deg: ANGLE_DEADBAND_DEG,
            full_scale_deg: ANGLE_FULL_SCALE_DEG,
            duty_min: DUTY_MIN,
            duty_max: DUTY_MAX,
            duty_step_max: DUTY_STEP_MAX,
            // 默认增益 ≈ 占空比跨度 / 半量程，与线性斜坡同阶
            kp: 8.0,
        }
    }
}

/// 任务周期配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TimingConfig {
    /// 控制循环周期（毫秒），观测值 10ms / 100Hz
    pub control_period_ms: u64,
    /// 遥测/显示循环周期（毫秒），观测值 50–100ms
    pub telemetry_period_ms: u64,
    /// 接收循环单次阻塞等待上限（毫秒），不超过一个调度周期
    pub rx_poll_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            control_period_ms: 10,
            telemetry_period_ms: 100,
            rx_poll_timeout_ms: 10,
        }
    }
}

impl TimingConfig {
    pub fn control_period(&self) -> Duration {
        Duration::from_millis(self.control_period_ms)
    }

    pub fn telemetry_period(&self) -> Duration {
        Duration::from_millis(self.telemetry_period_ms)
    }

    pub fn rx_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.rx_poll_timeout_ms)
    }
}

/// 节点配置
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeConfig {
    pub role: NodeRole,
    pub drive_mode: DriveMode,
    #[serde(default)]
    pub angle: AngleRange,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

impl NodeConfig {
    /// 用缺省参数构造配置
    pub fn new(role: NodeRole, drive_mode: DriveMode) -> Self {
        Self {
            role,
            drive_mode,
            angle: AngleRange::default(),
            control: ControlConfig::default(),
            timing: TimingConfig::default(),
        }
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(text: &str) -> Result<Self, NodeError> {
        let config: NodeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载
    pub fn from_toml_path(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// 校验取值域
    ///
    /// 配置非法属于启动失败：节点拒绝启动，而不是带着未定义的
    /// 控制参数运行。
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.angle.min >= self.angle.max {
            return Err(NodeError::Config(format!(
                "angle range is empty: [{}, {}]",
                self.angle.min, self.angle.max
            )));
        }
        if self.control.duty_min > self.control.duty_max {
            return Err(NodeError::Config(format!(
                "duty_min ({}) exceeds duty_max ({})",
                self.control.duty_min, self.control.duty_max
            )));
        }
        if self.control.duty_max > DUTY_MAX {
            return Err(NodeError::Config(format!(
                "duty_max ({}) exceeds the 10-bit resolution ({})",
                self.control.duty_max, DUTY_MAX
            )));
        }
        if self.control.deadband_deg < 0 {
            return Err(NodeError::Config(format!(
                "deadband must be non-negative, got {}",
                self.control.deadband_deg
            )));
        }
        if self.control.full_scale_deg <= 0 {
            return Err(NodeError::Config(format!(
                "full scale must be positive, got {}",
                self.control.full_scale_deg
            )));
        }
        if self.control.kp < 0.0 {
            return Err(NodeError::Config(format!(
                "kp must be non-negative, got {}",
                self.control.kp
            )));
        }
        if self.timing.control_period_ms == 0 || self.timing.telemetry_period_ms == 0 {
            return Err(NodeError::Config(
                "loop periods must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_observed_deployment() {
        let config = NodeConfig::new(NodeRole::Commander, DriveMode::Setpoint);
        assert_eq!(config.control.deadband_deg, 2);
        assert_eq!(config.control.full_scale_deg, 180);
        assert_eq!(config.control.duty_min, 250);
        assert_eq!(config.control.duty_max, 1023);
        assert_eq!(config.control.duty_step_max, 20);
        assert_eq!(config.timing.control_period_ms, 10);
        assert_eq!(config.angle.min, 0);
        assert_eq!(config.angle.max, 180);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = NodeConfig::from_toml_str(
            r#"
            role = "actuator"
            drive-mode = "setpoint"
            "#,
        )
        .unwrap();
        assert_eq!(config.role, NodeRole::Actuator);
        assert_eq!(config.drive_mode, DriveMode::Setpoint);
        assert_eq!(config.control, ControlConfig::default());
    }

    #[test]
    fn test_parse_overrides() {
        let config = NodeConfig::from_toml_str(
            r#"
            role = "commander"
            drive-mode = "direct"

            [control]
            deadband-deg = 4
            kp = 12.5

            [timing]
            control-period-ms = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.drive_mode, DriveMode::Direct);
        assert_eq!(config.control.deadband_deg, 4);
        assert_eq!(config.control.kp, 12.5);
        assert_eq!(config.timing.control_period_ms, 20);
        // 未覆盖的字段保持缺省
        assert_eq!(config.timing.telemetry_period_ms, 100);
    }

    #[test]
    fn test_parse_rejects_bad_role() {
        assert!(NodeConfig::from_toml_str("role = \"observer\"\ndrive-mode = \"direct\"").is_err());
    }

    #[test]
    fn test_validate_rejects_empty_angle_range() {
        let mut config = NodeConfig::new(NodeRole::Actuator, DriveMode::Direct);
        config.angle = AngleRange { min: 90, max: 90 };
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_duty_range() {
        let mut config = NodeConfig::new(NodeRole::Actuator, DriveMode::Direct);
        config.control.duty_min = 1024;
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_period() {
        let mut config = NodeConfig::new(NodeRole::Commander, DriveMode::Setpoint);
        config.timing.control_period_ms = 0;
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }

    #[test]
    fn test_angle_range_clamp() {
        let range = AngleRange::default();
        assert_eq!(range.clamp(-10), 0);
        assert_eq!(range.clamp(90), 90);
        assert_eq!(range.clamp(300), 180);
    }
}
