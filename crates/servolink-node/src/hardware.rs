//! 硬件协作者契约
//!
//! 节点运行时通过这三个窄契约与外设交互，外设实现本身在 crate 之外：
//! 旋转编码器驱动、电机驱动、状态显示屏。契约刻意保持窄小：
//! 传感器读数是轮询式、已去抖、已钳位的；执行器只接受方向 + 占空比；
//! 显示是纯观察性的。

use servolink_protocol::{Angle, Direction};
use tracing::info;

/// 旋转位置传感器
///
/// 读数不阻塞，返回已去抖、已钳位到配置角度域的整数角度。
/// 没有边沿回调语义：调用方按自己的周期轮询。
pub trait PositionSensor: Send {
    fn read_angle(&mut self) -> Angle;
}

/// 执行器（电机驱动）
///
/// `set` 施加方向 + 占空比（产生端已钳位到 `[0, 1023]`），
/// `stop` 撤去动力。两个操作都不阻塞。
pub trait Actuator: Send {
    fn set(&mut self, direction: Direction, duty: u16);
    fn stop(&mut self);
}

/// 状态显示
///
/// 纯观察性：接受两个整数渲染，失败不影响控制链路。
pub trait AngleDisplay: Send {
    fn render(&mut self, measured: Angle, setpoint: Angle);
}

/// 固定设定值旋钮：始终返回同一个操作员设定角度
///
/// 用于 CLI 和测试；真实部署中由编码器驱动实现 `PositionSensor`。
#[derive(Debug, Clone, Copy)]
pub struct FixedSetpointKnob {
    angle: Angle,
}

impl FixedSetpointKnob {
    pub fn new(angle: Angle) -> Self {
        Self { angle }
    }
}

impl PositionSensor for FixedSetpointKnob {
    fn read_angle(&mut self) -> Angle {
        self.angle
    }
}

/// 日志显示：把角度对输出到结构化日志
#[derive(Debug, Default)]
pub struct LoggingDisplay;

impl AngleDisplay for LoggingDisplay {
    fn render(&mut self, measured: Angle, setpoint: Angle) {
        info!(measured, setpoint, "display");
    }
}
