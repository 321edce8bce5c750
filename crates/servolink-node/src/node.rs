//! 节点运行时
//!
//! `NodeBuilder` 在启动时把总线、协作者和配置装配成一个 `Node`：
//! 按 `(角色, 部署拓扑)` 接线恰好一种控制循环变体，并启动三个
//! 后台任务（控制、接收、遥测）。任务之间只通过共享状态和邮箱
//! 通信，不直接调用彼此的逻辑。
//!
//! 启动失败（总线分离失败、缺少协作者、配置非法、线程创建失败）
//! 是致命的：`build()` 返回错误，节点不会以部分降级状态运行。
//! `Node` 被丢弃时清掉运行标志并在有界超时内回收所有任务。

use crate::config::{DriveMode, NodeConfig, NodeRole};
use crate::control::{
    command_follower_loop, direct_drive_loop, local_loop, setpoint_relay_loop, MotorCommand,
};
use crate::error::NodeError;
use crate::hardware::{Actuator, AngleDisplay, LoggingDisplay, PositionSensor};
use crate::mailbox::Mailbox;
use crate::metrics::{MetricsSnapshot, NodeMetrics};
use crate::rx::{rx_loop, RxRouting};
use crate::state::SharedAngleState;
use crate::telemetry::{display_loop, feedback_loop, AnglePair};
use servolink_bus::{RxAdapter, SplittableAdapter, TxAdapter};
use servolink_protocol::Angle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{spawn, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// 停机时等待各任务退出的上限
///
/// 任务只在周期锚点处让出，正常情况下一个遥测周期内就能观察到
/// 运行标志翻转。
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// 带超时的线程回收扩展
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // 看门狗线程代为 join，主线程有界等待结果
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // 超时：看门狗线程继续挂着，进程退出时由 OS 清理
                Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "Thread join timeout",
                )))
            },
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 节点构建器（链式装配）
///
/// # 示例
///
/// ```no_run
/// use servolink_node::{NodeBuilder, NodeConfig, NodeRole, DriveMode};
/// use servolink_node::hardware::FixedSetpointKnob;
/// use servolink_bus::SocketCanBus;
///
/// let bus = SocketCanBus::open("can0").unwrap();
/// let config = NodeConfig::new(NodeRole::Commander, DriveMode::Setpoint);
/// let node = NodeBuilder::new(bus, config)
///     .sensor(FixedSetpointKnob::new(90))
///     .build()
///     .unwrap();
/// # let _ = node;
/// ```
pub struct NodeBuilder<B> {
    bus: B,
    config: NodeConfig,
    sensor: Option<Box<dyn PositionSensor>>,
    actuator: Option<Box<dyn Actuator>>,
    display: Option<Box<dyn AngleDisplay>>,
}

impl<B> NodeBuilder<B>
where
    B: SplittableAdapter,
    B::Rx: RxAdapter + 'static,
    B::Tx: TxAdapter + 'static,
{
    pub fn new(bus: B, config: NodeConfig) -> Self {
        Self {
            bus,
            config,
            sensor: None,
            actuator: None,
            display: None,
        }
    }

    /// 位置传感器（两种角色都必需：指挥节点的设定旋钮 /
    /// 执行节点的轴编码器）
    pub fn sensor(mut self, sensor: impl PositionSensor + 'static) -> Self {
        self.sensor = Some(Box::new(sensor));
        self
    }

    /// 执行器（仅执行节点必需）
    pub fn actuator(mut self, actuator: impl Actuator + 'static) -> Self {
        self.actuator = Some(Box::new(actuator));
        self
    }

    /// 状态显示（可选，缺省输出到日志；仅指挥节点使用）
    pub fn display(mut self, display: impl AngleDisplay + 'static) -> Self {
        self.display = Some(Box::new(display));
        self
    }

    /// 装配并启动节点
    pub fn build(mut self) -> Result<Node, NodeError> {
        self.config.validate()?;
        let config = self.config.clone();

        let sensor = self
            .sensor
            .take()
            .ok_or(NodeError::MissingCollaborator("position sensor"))?;

        // 分离收/发两端：接收循环独占接收端，
        // 控制与遥测循环通过互斥量共享发送端
        let (mut rx, tx) = self.bus.split()?;
        rx.set_receive_timeout(config.timing.rx_poll_timeout());
        let tx = Arc::new(Mutex::new(tx));

        let shared = Arc::new(SharedAngleState::new());
        let metrics = Arc::new(NodeMetrics::new());
        let is_running = Arc::new(AtomicBool::new(true));

        info!(
            "Starting {:?} node in {:?} mode",
            config.role, config.drive_mode
        );

        // 执行节点（Direct 模式）接线时填入电机指令收件箱，
        // 其余组合下发给本节点的电机指令帧解码后原地丢弃
        let mut motor_cmds: Option<Arc<Mailbox<MotorCommand>>> = None;

        // === 控制循环 + 遥测循环（按角色接线） ===
        let (control_thread, telemetry_thread) = match config.role {
            NodeRole::Commander => {
                let display = self.display.take().unwrap_or_else(|| Box::new(LoggingDisplay));
                let display_mailbox: Arc<Mailbox<AnglePair>> = Arc::new(Mailbox::new());

                let control_thread = {
                    let shared = shared.clone();
                    let tx = tx.clone();
                    let display_out = display_mailbox.clone();
                    let control = config.control;
                    let range = config.angle;
                    let period = config.timing.control_period();
                    let is_running = is_running.clone();
                    let metrics = metrics.clone();
                    let drive_mode = config.drive_mode;
                    std::thread::Builder::new()
                        .name("servolink-ctrl".into())
                        .spawn(move || match drive_mode {
                            DriveMode::Direct => direct_drive_loop(
                                sensor, shared, tx, display_out, control, range, period,
                                is_running, metrics,
                            ),
                            DriveMode::Setpoint => setpoint_relay_loop(
                                sensor, shared, tx, display_out, range, period, is_running,
                                metrics,
                            ),
                        })?
                };

                let telemetry_thread = {
                    let shared = shared.clone();
                    let encoder_report_tx = match config.drive_mode {
                        DriveMode::Direct => Some(tx.clone()),
                        DriveMode::Setpoint => None,
                    };
                    let range = config.angle;
                    let period = config.timing.telemetry_period();
                    let is_running = is_running.clone();
                    let metrics = metrics.clone();
                    std::thread::Builder::new()
                        .name("servolink-telemetry".into())
                        .spawn(move || {
                            display_loop(
                                shared,
                                display_mailbox,
                                display,
                                encoder_report_tx,
                                range,
                                period,
                                is_running,
                                metrics,
                            )
                        })?
                };

                (control_thread, telemetry_thread)
            },

            NodeRole::Actuator => {
                let actuator = self
                    .actuator
                    .take()
                    .ok_or(NodeError::MissingCollaborator("actuator"))?;

                let control_thread = {
                    let shared = shared.clone();
                    let control = config.control;
                    let range = config.angle;
                    let period = config.timing.control_period();
                    let is_running = is_running.clone();
                    let metrics = metrics.clone();
                    match config.drive_mode {
                        DriveMode::Direct => {
                            let mailbox = Arc::new(Mailbox::new());
                            motor_cmds = Some(mailbox.clone());
                            std::thread::Builder::new()
                                .name("servolink-ctrl".into())
                                .spawn(move || {
                                    command_follower_loop(
                                        sensor, actuator, shared, mailbox, range, period,
                                        is_running, metrics,
                                    )
                                })?
                        },
                        DriveMode::Setpoint => std::thread::Builder::new()
                            .name("servolink-ctrl".into())
                            .spawn(move || {
                                local_loop(
                                    sensor, actuator, shared, control, range, period,
                                    is_running, metrics,
                                )
                            })?,
                    }
                };

                let telemetry_thread = {
                    let shared = shared.clone();
                    let tx = tx.clone();
                    let drive_mode = config.drive_mode;
                    let range = config.angle;
                    let period = config.timing.telemetry_period();
                    let is_running = is_running.clone();
                    let metrics = metrics.clone();
                    std::thread::Builder::new()
                        .name("servolink-telemetry".into())
                        .spawn(move || {
                            feedback_loop(
                                shared, tx, drive_mode, range, period, is_running, metrics,
                            )
                        })?
                };

                (control_thread, telemetry_thread)
            },
        };

        // === 接收循环 ===
        let rx_thread = {
            let routing = RxRouting {
                shared: shared.clone(),
                motor_cmds,
            };
            let range = config.angle;
            let is_running = is_running.clone();
            let metrics = metrics.clone();
            std::thread::Builder::new()
                .name("servolink-rx".into())
                .spawn(move || rx_loop(rx, routing, range, is_running, metrics))?
        };

        Ok(Node {
            role: config.role,
            drive_mode: config.drive_mode,
            shared,
            metrics,
            is_running,
            control_thread: Some(control_thread),
            rx_thread: Some(rx_thread),
            telemetry_thread: Some(telemetry_thread),
        })
    }
}

/// 运行中的节点
///
/// 持有三个后台任务的句柄；丢弃时自动停机。
pub struct Node {
    role: NodeRole,
    drive_mode: DriveMode,
    shared: Arc<SharedAngleState>,
    metrics: Arc<NodeMetrics>,
    is_running: Arc<AtomicBool>,
    control_thread: Option<JoinHandle<()>>,
    rx_thread: Option<JoinHandle<()>>,
    telemetry_thread: Option<JoinHandle<()>>,
}

impl Node {
    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn drive_mode(&self) -> DriveMode {
        self.drive_mode
    }

    /// 节点是否仍在运行
    ///
    /// 稳态错误不会停机；只有致命的总线故障（或显式 `stop`）
    /// 会翻转运行标志。
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// 读最近一次 `{measured, setpoint}`（监控用，允许陈旧）
    pub fn latest_angles(&self) -> (Angle, Angle) {
        (self.shared.latest_measured(), self.shared.latest_setpoint())
    }

    /// 指标快照
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 停机：翻转运行标志并在有界超时内回收所有任务
    ///
    /// 幂等；`Drop` 也会调用。
    pub fn stop(&mut self) {
        // Release: 让任务看到 false 时也能看到此前的全部写入
        self.is_running.store(false, Ordering::Release);

        for (name, handle) in [
            ("control", self.control_thread.take()),
            ("rx", self.rx_thread.take()),
            ("telemetry", self.telemetry_thread.take()),
        ] {
            if let Some(handle) = handle
                && handle.join_timeout(SHUTDOWN_TIMEOUT).is_err()
            {
                warn!("{} thread did not exit within {:?}", name, SHUTDOWN_TIMEOUT);
            }
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
    }
}
