//! # Servolink CLI
//!
//! 运行和观察 servolink 节点的命令行工具。
//!
//! ```bash
//! # 在 can0 上启动一个指挥节点（Setpoint 拓扑，目标 100°）
//! servolink-cli run --role commander --mode setpoint --interface can0 --setpoint 100
//!
//! # 从 TOML 配置启动执行节点（仿真轴代替真实电机驱动）
//! servolink-cli run --config actuator.toml --interface can0
//!
//! # 无硬件演示：两个节点跑在进程内环回总线上
//! servolink-cli demo --setpoint 100 --initial-angle 40
//!
//! # 解码并打印总线流量
//! servolink-cli monitor --interface can0
//! ```
//!
//! 真实部署中位置传感器/电机驱动是外部协作者；本 CLI 用固定设定
//! 旋钮和仿真执行轴代替它们，硬件实现通过 `servolink-node::hardware`
//! 的 trait 接入。

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use servolink_node::hardware::FixedSetpointKnob;
use servolink_node::sim::SimulatedAxis;
use servolink_node::{DriveMode, Node, NodeBuilder, NodeConfig, NodeRole};
use servolink_protocol::Angle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RoleArg {
    Commander,
    Actuator,
}

impl From<RoleArg> for NodeRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Commander => NodeRole::Commander,
            RoleArg::Actuator => NodeRole::Actuator,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Direct,
    Setpoint,
}

impl From<ModeArg> for DriveMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Direct => DriveMode::Direct,
            ModeArg::Setpoint => DriveMode::Setpoint,
        }
    }
}

/// Servolink - 分布式位置控制节点工具
#[derive(Parser, Debug)]
#[command(name = "servolink-cli")]
#[command(about = "Run and observe servolink position-control nodes", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 在总线接口上运行一个节点
    Run {
        /// 节点角色（提供 --config 时可省略）
        #[arg(long, value_enum)]
        role: Option<RoleArg>,

        /// 部署拓扑（提供 --config 时可省略）
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// TOML 配置文件路径
        #[arg(long)]
        config: Option<String>,

        /// CAN 接口名称（如 "can0"）
        #[arg(long, short, default_value = "can0")]
        interface: String,

        /// 指挥节点的操作员设定角度（度）
        #[arg(long, default_value_t = 90)]
        setpoint: Angle,

        /// 执行节点仿真轴的初始角度（度）
        #[arg(long, default_value_t = 0)]
        initial_angle: Angle,
    },

    /// 无硬件演示：两个节点 + 进程内环回总线
    Demo {
        /// 部署拓扑
        #[arg(long, value_enum, default_value_t = ModeArg::Setpoint)]
        mode: ModeArg,

        /// 操作员设定角度（度）
        #[arg(long, default_value_t = 100)]
        setpoint: Angle,

        /// 仿真轴初始角度（度）
        #[arg(long, default_value_t = 40)]
        initial_angle: Angle,

        /// 运行时长（秒）
        #[arg(long, default_value_t = 5)]
        duration_secs: u64,
    },

    /// 解码并打印总线上的协议流量
    Monitor {
        /// CAN 接口名称
        #[arg(long, short, default_value = "can0")]
        interface: String,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            role,
            mode,
            config,
            interface,
            setpoint,
            initial_angle,
        } => run(role, mode, config, &interface, setpoint, initial_angle),
        Commands::Demo {
            mode,
            setpoint,
            initial_angle,
            duration_secs,
        } => demo(mode.into(), setpoint, initial_angle, duration_secs),
        Commands::Monitor { interface } => monitor(&interface),
    }
}

/// Ctrl-C 翻转的前台运行标志
fn install_ctrlc_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::Release);
    })
    .context("Failed to install Ctrl-C handler")?;
    Ok(running)
}

/// 组装节点配置：配置文件优先，命令行参数兜底
fn resolve_config(
    role: Option<RoleArg>,
    mode: Option<ModeArg>,
    config_path: Option<String>,
) -> Result<NodeConfig> {
    if let Some(path) = config_path {
        let config = NodeConfig::from_toml_path(&path)
            .with_context(|| format!("Failed to load config from '{}'", path))?;
        return Ok(config);
    }
    let (Some(role), Some(mode)) = (role, mode) else {
        bail!("Either --config or both --role and --mode are required");
    };
    Ok(NodeConfig::new(role.into(), mode.into()))
}

#[cfg(target_os = "linux")]
fn run(
    role: Option<RoleArg>,
    mode: Option<ModeArg>,
    config_path: Option<String>,
    interface: &str,
    setpoint: Angle,
    initial_angle: Angle,
) -> Result<()> {
    use servolink_bus::SocketCanBus;

    let config = resolve_config(role, mode, config_path)?;
    let bus = SocketCanBus::open(interface)?;
    let running = install_ctrlc_flag()?;

    // 初始化失败是致命的：节点拒绝以未定义的硬件状态运行
    let node = match config.role {
        NodeRole::Commander => NodeBuilder::new(bus, config)
            .sensor(FixedSetpointKnob::new(setpoint))
            .build()?,
        NodeRole::Actuator => {
            let axis = SimulatedAxis::new(
                initial_angle,
                config.angle.min,
                config.angle.max,
            );
            let (axis_sensor, axis_actuator) = axis.endpoints();
            NodeBuilder::new(bus, config)
                .sensor(axis_sensor)
                .actuator(axis_actuator)
                .build()?
        },
    };

    info!(
        "Node started on '{}' ({:?}/{:?}), Ctrl-C to stop",
        interface,
        node.role(),
        node.drive_mode()
    );
    supervise(node, &running);
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn run(
    _role: Option<RoleArg>,
    _mode: Option<ModeArg>,
    _config_path: Option<String>,
    _interface: &str,
    _setpoint: Angle,
    _initial_angle: Angle,
) -> Result<()> {
    bail!("SocketCAN is only available on Linux; use `demo` on this platform")
}

/// 前台监视：周期性打印角度与指标，直到节点停机或 Ctrl-C
fn supervise(mut node: Node, running: &AtomicBool) {
    while running.load(Ordering::Acquire) && node.is_running() {
        std::thread::sleep(Duration::from_secs(1));
        let (measured, setpoint) = node.latest_angles();
        let metrics = node.metrics();
        info!(
            measured,
            setpoint,
            tx = metrics.tx_frames_total,
            rx = metrics.rx_frames_decoded,
            suppressed = metrics.tx_suppressed,
            "status"
        );
    }
    node.stop();
    info!("Node stopped");
}

fn demo(mode: DriveMode, setpoint: Angle, initial_angle: Angle, duration_secs: u64) -> Result<()> {
    use servolink_bus::mock;

    let (commander_bus, actuator_bus) = mock::pair(32);
    let running = install_ctrlc_flag()?;

    let axis = SimulatedAxis::new(initial_angle, 0, 180);
    let (axis_sensor, axis_actuator) = axis.endpoints();

    let mut actuator_node = NodeBuilder::new(actuator_bus, NodeConfig::new(NodeRole::Actuator, mode))
        .sensor(axis_sensor)
        .actuator(axis_actuator)
        .build()?;

    let mut commander_node =
        NodeBuilder::new(commander_bus, NodeConfig::new(NodeRole::Commander, mode))
            .sensor(FixedSetpointKnob::new(setpoint))
            .build()?;

    info!(
        "Demo started ({:?}): axis at {}°, target {}°",
        mode, initial_angle, setpoint
    );

    let deadline = std::time::Instant::now() + Duration::from_secs(duration_secs);
    while running.load(Ordering::Acquire)
        && std::time::Instant::now() < deadline
        && commander_node.is_running()
        && actuator_node.is_running()
    {
        std::thread::sleep(Duration::from_millis(200));
        let (measured, _) = commander_node.latest_angles();
        info!(axis = axis.angle(), commander_view = measured, "demo");
    }

    let final_angle = axis.angle();
    commander_node.stop();
    actuator_node.stop();

    info!(
        "Demo finished: axis at {}° (target {}°)",
        final_angle, setpoint
    );
    Ok(())
}

#[cfg(target_os = "linux")]
fn monitor(interface: &str) -> Result<()> {
    use servolink_bus::{BusAdapter, BusError, SocketCanBus};
    use servolink_protocol::Message;

    let mut bus = SocketCanBus::open(interface)?;
    bus.set_receive_timeout(Duration::from_millis(100));
    let running = install_ctrlc_flag()?;

    info!("Monitoring '{}', Ctrl-C to stop", interface);
    while running.load(Ordering::Acquire) {
        match bus.receive() {
            Ok(frame) => match Message::decode(&frame) {
                Some(msg) => println!("0x{:03X}  {:?}", frame.id, msg),
                None => println!("0x{:03X}  (not a servolink message, {} bytes)", frame.id, frame.len),
            },
            Err(BusError::Timeout) => continue,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => tracing::warn!("Receive error: {}", e),
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn monitor(_interface: &str) -> Result<()> {
    bail!("SocketCAN is only available on Linux")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_config_requires_role_and_mode() {
        assert!(resolve_config(None, None, None).is_err());
        assert!(resolve_config(Some(RoleArg::Commander), None, None).is_err());
        let config =
            resolve_config(Some(RoleArg::Commander), Some(ModeArg::Setpoint), None).unwrap();
        assert_eq!(config.role, NodeRole::Commander);
        assert_eq!(config.drive_mode, DriveMode::Setpoint);
    }

    #[test]
    fn test_cli_parses_demo_defaults() {
        let cli = Cli::parse_from(["servolink-cli", "demo"]);
        match cli.command {
            Commands::Demo {
                mode,
                setpoint,
                initial_angle,
                duration_secs,
            } => {
                assert_eq!(mode, ModeArg::Setpoint);
                assert_eq!(setpoint, 100);
                assert_eq!(initial_angle, 40);
                assert_eq!(duration_secs, 5);
            },
            _ => panic!("expected demo subcommand"),
        }
    }
}
