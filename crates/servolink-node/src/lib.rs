//! # Servolink Node
//!
//! 双节点位置控制系统的节点运行时：一个指挥节点读取操作员设定的
//! 角度，通过共享广播总线驱动执行节点上的电机跟踪它。
//!
//! ## 模块
//!
//! - `config`: 角色 / 部署拓扑 / 控制律参数 / 任务周期（TOML 可加载）
//! - `state`: 跨任务共享的角度状态（互斥量 + 新鲜标志）
//! - `mailbox`: 单槽覆盖邮箱
//! - `control`: 控制律纯函数与四种控制循环变体
//! - `rx`: 总线接收循环与分发
//! - `telemetry`: 反馈上报 / 显示循环
//! - `hardware`: 传感器 / 执行器 / 显示协作者契约
//! - `sim`: 仿真执行轴（测试与演示）
//! - `node`: `NodeBuilder` / `Node` 运行时装配
//! - `metrics`: 原子指标计数器
//!
//! ## 并发模型
//!
//! 每个节点三个周期任务（控制、接收、遥测），只通过
//! `SharedAngleState` 和邮箱协作，不直接调用彼此的逻辑。任务只在
//! 周期锚点处让出；总线发送是有界阻塞（失败即丢样本），锁竞争下的
//! 非关键读者跳过本周期而不是等待。稳态错误从不越过任务边界，
//! 只有启动失败和致命的设备故障会使节点停机。

pub mod config;
pub mod control;
pub mod error;
pub mod hardware;
pub mod mailbox;
pub mod metrics;
pub mod node;
pub mod rx;
pub mod sim;
pub mod state;
pub mod telemetry;

// 重新导出常用类型
pub use config::{AngleRange, ControlConfig, DriveMode, NodeConfig, NodeRole, TimingConfig};
pub use error::NodeError;
pub use metrics::{MetricsSnapshot, NodeMetrics};
pub use node::{Node, NodeBuilder};
pub use state::SharedAngleState;
