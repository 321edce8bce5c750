//! 控制循环
//!
//! 控制律本身是纯函数（`direct_drive_step` / `local_loop_step`），
//! 不接触时钟和外设，可以确定性地单测；周期调度、总线发送和
//! 外设访问都在外层的循环壳里。每个节点实例在启动时被接到
//! 恰好一种循环变体上：
//!
//! - `direct_drive_loop`：指挥节点，占空比走线（Direct 模式）
//! - `setpoint_relay_loop`：指挥节点，角度走线（Setpoint 模式）
//! - `command_follower_loop`：执行节点，Direct 模式
//! - `local_loop`：执行节点，Setpoint 模式（本地闭环）
//!
//! 所有循环使用绝对时间锚点 + `spin_sleep` 保持周期，超期（overrun）
//! 记录指标并把锚点重置到当前时刻，避免积累追赶延迟。

use crate::config::{AngleRange, ControlConfig};
use crate::hardware::{Actuator, PositionSensor};
use crate::mailbox::Mailbox;
use crate::metrics::NodeMetrics;
use crate::state::SharedAngleState;
use crate::telemetry::AnglePair;
use servolink_bus::TxAdapter;
use servolink_protocol::{Angle, Direction, Message};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 一条已成形的电机指令（方向 + 已钳位占空比）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorCommand {
    pub direction: Direction,
    pub duty: u16,
}

/// 一个控制周期对执行器的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorAction {
    /// 误差在死区内：撤去动力
    Stop,
    /// 施加方向 + 占空比
    Drive { direction: Direction, duty: u16 },
}

/// 控制循环的私有状态：上一周期提交的占空比与方向
///
/// 仅用于斜率限制和变更抑制，由控制循环任务独占，从不共享。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerState {
    pub last_duty: u16,
    pub last_direction: Direction,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            last_duty: 0,
            last_direction: Direction::Forward,
        }
    }
}

/// 指挥节点的单周期控制律（Direct 模式）
///
/// 死区内立即停止（占空比 0，不经过斜率限制 —— 停车必须即时生效）；
/// 死区外按误差线性斜坡取目标占空比，再相对上一周期的提交值做
/// ±`duty_step_max` 的斜率限制。
///
/// 返回 `Some(cmd)` 表示本周期需要发送电机指令；方向和占空比都与
/// 上一周期相同时返回 `None`（变更抑制，降低总线负载）。
/// 无论是否发送，`state` 都会更新。
pub fn direct_drive_step(
    state: &mut ControllerState,
    setpoint: Angle,
    measured: Angle,
    config: &ControlConfig,
) -> Option<MotorCommand> {
    let error = i32::from(setpoint) - i32::from(measured);
    let abs_err = error.unsigned_abs() as u16;
    let direction = if error > 0 {
        Direction::Forward
    } else {
        Direction::Backward
    };

    let duty = if abs_err <= config.deadband_deg as u16 {
        0
    } else {
        let ratio = (f32::from(abs_err) / f32::from(config.full_scale_deg as u16)).min(1.0);
        let span = f32::from(config.duty_max - config.duty_min);
        let target = (f32::from(config.duty_min) + ratio * span).min(f32::from(config.duty_max));
        slew_limit(target as u16, state.last_duty, config.duty_step_max)
    };

    let changed = duty != state.last_duty || direction != state.last_direction;
    state.last_duty = duty;
    state.last_direction = direction;

    changed.then_some(MotorCommand { direction, duty })
}

/// 执行节点的单周期控制律（Setpoint 模式，本地闭环）
///
/// 与指挥节点相同的死区判定；死区外用可配置比例增益代替线性斜坡表：
/// `duty = clamp(duty_min + kp·|err|, duty_min..=duty_max)`。
/// 输出直接施加到执行器，不做斜率限制也不上总线。
pub fn local_loop_step(setpoint: Angle, measured: Angle, config: &ControlConfig) -> MotorAction {
    let error = i32::from(setpoint) - i32::from(measured);
    let abs_err = error.unsigned_abs() as u16;

    if abs_err <= config.deadband_deg as u16 {
        return MotorAction::Stop;
    }

    let direction = if error > 0 {
        Direction::Forward
    } else {
        Direction::Backward
    };
    let raw = f32::from(config.duty_min) + config.kp * f32::from(abs_err);
    let duty = raw.min(f32::from(config.duty_max)) as u16;

    MotorAction::Drive { direction, duty }
}

/// 斜率限制：本周期提交值与上周期提交值之差不超过 `step`
fn slew_limit(target: u16, last: u16, step: u16) -> u16 {
    if target > last {
        last + (target - last).min(step)
    } else {
        last - (last - target).min(step)
    }
}

/// 周期锚点：绝对时间基准的定周期调度
///
/// 无论循环体耗时多少，唤醒频率都锁定在配置周期上，消除累积漂移。
pub(crate) struct LoopAnchor {
    period: Duration,
    next_tick: Instant,
}

impl LoopAnchor {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period,
            next_tick: Instant::now(),
        }
    }

    /// 睡眠到下一个锚点
    ///
    /// 循环体超过周期预算（overrun）时不睡眠，记录指标并把锚点
    /// 重置到当前时刻，避免后续周期连锁追赶。
    pub(crate) fn wait(&mut self, metrics: &NodeMetrics) {
        self.next_tick += self.period;
        let now = Instant::now();
        if self.next_tick > now {
            spin_sleep::sleep(self.next_tick - now);
        } else {
            warn!(
                "Loop overrun: body exceeded the {:?} period, resetting anchor",
                self.period
            );
            metrics.loop_overruns.fetch_add(1, Ordering::Relaxed);
            self.next_tick = now;
        }
    }
}

/// 发送一条消息（有界阻塞）
///
/// 发送失败按失败软化策略处理：记录日志、丢弃样本，绝不同步重试 ——
/// 下个周期自然会产生新的指令。致命的设备错误清掉运行标志，
/// 让整个节点停机而不是带着半死的总线继续跑。
///
/// 返回是否发送成功。
pub(crate) fn send_message<T: TxAdapter>(
    tx: &Mutex<T>,
    msg: Message,
    metrics: &NodeMetrics,
    is_running: &AtomicBool,
) -> bool {
    let mut guard = match tx.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            error!("TX adapter lock poisoned, recovering");
            poisoned.into_inner()
        },
    };

    match guard.send(msg.encode()) {
        Ok(()) => {
            metrics.tx_frames_total.fetch_add(1, Ordering::Relaxed);
            true
        },
        Err(e) => {
            metrics.tx_failures.fetch_add(1, Ordering::Relaxed);
            if e.is_fatal() {
                metrics.device_errors.fetch_add(1, Ordering::Relaxed);
                error!("Fatal bus error on send: {}, shutting the node down", e);
                // Release: 清理写入对看到 false 的线程可见
                is_running.store(false, Ordering::Release);
            } else {
                warn!("Failed to send {:?}: {}, sample dropped", msg, e);
            }
            false
        },
    }
}

/// 线程优先级提升（`realtime` feature）
#[cfg(feature = "realtime")]
pub(crate) fn promote_thread_priority(task: &str) {
    use thread_priority::{ThreadPriority, set_current_thread_priority};

    match set_current_thread_priority(ThreadPriority::Max) {
        Ok(_) => info!("{} thread priority set to MAX (realtime)", task),
        Err(e) => warn!(
            "Failed to set {} thread priority: {}. \
             On Linux you may need CAP_SYS_NICE or rtkit.",
            task, e
        ),
    }
}

#[cfg(not(feature = "realtime"))]
pub(crate) fn promote_thread_priority(_task: &str) {}

/// 指挥节点控制循环：占空比走线（Direct 模式）
///
/// 每周期：读本地设定旋钮 → 取最近一次远端实测角度（允许陈旧）→
/// 控制律 → 变更时发送电机指令 → 把 `{measured, setpoint}` 投递给
/// 显示邮箱。
pub fn direct_drive_loop<T: TxAdapter>(
    mut sensor: Box<dyn PositionSensor>,
    shared: Arc<SharedAngleState>,
    tx: Arc<Mutex<T>>,
    display_out: Arc<Mailbox<AnglePair>>,
    config: ControlConfig,
    range: AngleRange,
    period: Duration,
    is_running: Arc<AtomicBool>,
    metrics: Arc<NodeMetrics>,
) {
    promote_thread_priority("control");
    info!("Direct-drive control loop started ({:?} period)", period);

    let mut controller = ControllerState::default();
    let mut anchor = LoopAnchor::new(period);

    // Acquire: 看到 false 时必须同时看到对端的清理写入
    while is_running.load(Ordering::Acquire) {
        let setpoint = range.clamp(sensor.read_angle());
        shared.publish_setpoint(setpoint);

        // 实测角度来自接收循环写入的共享状态；没有新鲜度要求，
        // 控制律容忍陈旧值（这是控制系统，不是事务系统）
        let measured = shared.latest_measured();

        match direct_drive_step(&mut controller, setpoint, measured, &config) {
            Some(cmd) => {
                debug!(
                    setpoint,
                    measured,
                    duty = cmd.duty,
                    direction = ?cmd.direction,
                    "motor command"
                );
                send_message(
                    &tx,
                    Message::MotorCmd {
                        direction: cmd.direction,
                        duty: cmd.duty,
                    },
                    &metrics,
                    &is_running,
                );
            },
            None => {
                metrics.tx_suppressed.fetch_add(1, Ordering::Relaxed);
            },
        }

        if display_out.put(AnglePair { measured, setpoint }) {
            metrics.mailbox_overwrites.fetch_add(1, Ordering::Relaxed);
        }

        metrics.control_cycles.fetch_add(1, Ordering::Relaxed);
        anchor.wait(&metrics);
    }

    info!("Direct-drive control loop exited");
}

/// 指挥节点控制循环：角度走线（Setpoint 模式）
///
/// 每周期读旋钮，角度变化时转发设定值消息（变更抑制）。
/// 发送失败不更新已发送记录，下个周期自然重发。
pub fn setpoint_relay_loop<T: TxAdapter>(
    mut sensor: Box<dyn PositionSensor>,
    shared: Arc<SharedAngleState>,
    tx: Arc<Mutex<T>>,
    display_out: Arc<Mailbox<AnglePair>>,
    range: AngleRange,
    period: Duration,
    is_running: Arc<AtomicBool>,
    metrics: Arc<NodeMetrics>,
) {
    promote_thread_priority("control");
    info!("Setpoint-relay control loop started ({:?} period)", period);

    let mut last_sent: Option<Angle> = None;
    let mut anchor = LoopAnchor::new(period);

    while is_running.load(Ordering::Acquire) {
        let setpoint = range.clamp(sensor.read_angle());
        shared.publish_setpoint(setpoint);

        if last_sent != Some(setpoint) {
            if send_message(&tx, Message::Setpoint { angle: setpoint }, &metrics, &is_running) {
                last_sent = Some(setpoint);
            }
        } else {
            metrics.tx_suppressed.fetch_add(1, Ordering::Relaxed);
        }

        let measured = shared.latest_measured();
        if display_out.put(AnglePair { measured, setpoint }) {
            metrics.mailbox_overwrites.fetch_add(1, Ordering::Relaxed);
        }

        metrics.control_cycles.fetch_add(1, Ordering::Relaxed);
        anchor.wait(&metrics);
    }

    info!("Setpoint-relay control loop exited");
}

/// 执行节点控制循环：Direct 模式（指令跟随）
///
/// 每周期取走邮箱里最新的电机指令原样施加（占空比 0 即停车），
/// 并把本地实测角度写入共享状态供遥测循环上报。
pub fn command_follower_loop(
    mut sensor: Box<dyn PositionSensor>,
    mut actuator: Box<dyn Actuator>,
    shared: Arc<SharedAngleState>,
    motor_cmds: Arc<Mailbox<MotorCommand>>,
    range: AngleRange,
    period: Duration,
    is_running: Arc<AtomicBool>,
    metrics: Arc<NodeMetrics>,
) {
    promote_thread_priority("control");
    info!("Command-follower control loop started ({:?} period)", period);

    let mut anchor = LoopAnchor::new(period);

    while is_running.load(Ordering::Acquire) {
        if let Some(cmd) = motor_cmds.try_take() {
            if cmd.duty == 0 {
                actuator.stop();
                debug!("motor stop");
            } else {
                actuator.set(cmd.direction, cmd.duty);
                debug!(duty = cmd.duty, direction = ?cmd.direction, "motor set");
            }
        }

        let measured = range.clamp(sensor.read_angle());
        shared.publish_measured(measured);

        metrics.control_cycles.fetch_add(1, Ordering::Relaxed);
        anchor.wait(&metrics);
    }

    // 退出路径上撤去动力，不把电机留在最后一条指令上
    actuator.stop();
    info!("Command-follower control loop exited");
}

/// 执行节点控制循环：Setpoint 模式（本地闭环）
///
/// 每周期：消费共享状态里最新的设定值（单槽覆盖语义，只有最新值
/// 有意义）→ 采样本地传感器 → 本地比例控制 → 直接施加到执行器。
/// 在收到第一个设定值之前不动作。
pub fn local_loop(
    mut sensor: Box<dyn PositionSensor>,
    mut actuator: Box<dyn Actuator>,
    shared: Arc<SharedAngleState>,
    config: ControlConfig,
    range: AngleRange,
    period: Duration,
    is_running: Arc<AtomicBool>,
    metrics: Arc<NodeMetrics>,
) {
    promote_thread_priority("control");
    info!("Local-loop control started ({:?} period)", period);

    let mut target: Option<Angle> = None;
    let mut anchor = LoopAnchor::new(period);

    while is_running.load(Ordering::Acquire) {
        if let Some(setpoint) = shared.take_fresh_setpoint() {
            target = Some(range.clamp(setpoint));
        }

        let measured = range.clamp(sensor.read_angle());
        shared.publish_measured(measured);

        match target {
            None => actuator.stop(),
            Some(setpoint) => match local_loop_step(setpoint, measured, &config) {
                MotorAction::Stop => actuator.stop(),
                MotorAction::Drive { direction, duty } => actuator.set(direction, duty),
            },
        }

        metrics.control_cycles.fetch_add(1, Ordering::Relaxed);
        anchor.wait(&metrics);
    }

    actuator.stop();
    info!("Local-loop control exited");
}
