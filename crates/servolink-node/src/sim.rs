//! 仿真执行轴
//!
//! 一阶被控对象模型：角度以与占空比成正比的速度向指令方向积分。
//! 同一根轴的传感器端和执行器端共享同一份内部状态，分别实现
//! `PositionSensor` 和 `Actuator`，可以直接接到节点运行时上，
//! 用于无硬件的集成测试和 CLI 演示。

use crate::hardware::{Actuator, PositionSensor};
use servolink_protocol::{Angle, Direction, DUTY_MAX};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// 满占空比下的默认转速（度/秒）
const DEFAULT_FULL_DUTY_DEG_PER_SEC: f32 = 120.0;

#[derive(Debug)]
struct AxisState {
    /// 当前角度（内部用浮点积分，读出时取整并钳位）
    angle: f32,
    duty: u16,
    direction: Direction,
    last_update: Instant,
    full_duty_deg_per_sec: f32,
    angle_min: Angle,
    angle_max: Angle,
}

impl AxisState {
    /// 按流逝时间把角度积分到当前时刻
    fn integrate(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_update).as_secs_f32();
        self.last_update = now;

        if self.duty == 0 {
            return;
        }
        let speed = self.full_duty_deg_per_sec * (self.duty as f32 / DUTY_MAX as f32);
        let delta = speed * dt;
        self.angle += match self.direction {
            Direction::Forward => delta,
            Direction::Backward => -delta,
        };
        self.angle = self.angle.clamp(self.angle_min as f32, self.angle_max as f32);
    }

    fn current_angle(&self) -> Angle {
        self.angle.round() as Angle
    }
}

/// 仿真执行轴（传感器 + 执行器共享一份状态）
#[derive(Debug, Clone)]
pub struct SimulatedAxis {
    state: Arc<Mutex<AxisState>>,
}

impl SimulatedAxis {
    /// 创建初始角度为 `initial` 的轴，角度域 `[angle_min, angle_max]`
    pub fn new(initial: Angle, angle_min: Angle, angle_max: Angle) -> Self {
        Self {
            state: Arc::new(Mutex::new(AxisState {
                angle: initial as f32,
                duty: 0,
                direction: Direction::Forward,
                last_update: Instant::now(),
                full_duty_deg_per_sec: DEFAULT_FULL_DUTY_DEG_PER_SEC,
                angle_min,
                angle_max,
            })),
        }
    }

    /// 覆盖满占空比转速（度/秒），用于测试调快/调慢收敛
    pub fn with_speed(self, full_duty_deg_per_sec: f32) -> Self {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).full_duty_deg_per_sec = full_duty_deg_per_sec;
        self
    }

    /// 拆出可分别移交给节点的传感器端和执行器端
    pub fn endpoints(&self) -> (SimAxisSensor, SimAxisActuator) {
        (
            SimAxisSensor {
                state: self.state.clone(),
            },
            SimAxisActuator {
                state: self.state.clone(),
            },
        )
    }

    /// 读当前角度（供测试断言）
    pub fn angle(&self) -> Angle {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.integrate();
        state.current_angle()
    }
}

/// 仿真轴的传感器端
#[derive(Debug)]
pub struct SimAxisSensor {
    state: Arc<Mutex<AxisState>>,
}

impl PositionSensor for SimAxisSensor {
    fn read_angle(&mut self) -> Angle {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.integrate();
        state.current_angle()
    }
}

/// 仿真轴的执行器端
#[derive(Debug)]
pub struct SimAxisActuator {
    state: Arc<Mutex<AxisState>>,
}

impl Actuator for SimAxisActuator {
    fn set(&mut self, direction: Direction, duty: u16) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        // 先把旧指令的效果积分完，再切换到新指令
        state.integrate();
        state.direction = direction;
        state.duty = duty.min(DUTY_MAX);
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.integrate();
        state.duty = 0;
    }
}
