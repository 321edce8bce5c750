//! # Servolink Bus Adapter Layer
//!
//! 总线硬件抽象层，提供统一的收发接口。
//!
//! 后端：
//! - `SocketCanBus`（仅 Linux）：内核 SocketCAN 接口
//! - `mock::BusPair`（`mock` feature）：进程内环回总线，用于测试与仿真
//!
//! 总线契约：发送是有界阻塞的（短超时，失败即丢样本），接收按 FIFO
//! 顺序交付或超时返回；同一适配器的收发两端可以通过 `split()` 分离，
//! 分别交给接收循环和发送方共享使用。

use std::time::Duration;
use thiserror::Error;

// 重新导出协议层的帧类型
pub use servolink_protocol::Frame;

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(target_os = "linux")]
pub use socketcan::{SocketCanBus, SocketCanRx, SocketCanTx};

#[cfg(feature = "mock")]
pub mod mock;

/// 总线适配层统一错误类型
#[derive(Error, Debug)]
pub enum BusError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] BusDeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Bus off")]
    BusOff,
    #[error("Device not started")]
    NotStarted,
    #[error("Peer disconnected")]
    Disconnected,
}

impl BusError {
    /// 判断是否为致命错误（设备消失、对端断开等，节点应当整体停机）
    pub fn is_fatal(&self) -> bool {
        match self {
            BusError::Device(dev) => dev.is_fatal(),
            BusError::BusOff | BusError::Disconnected => true,
            _ => false,
        }
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusDeviceErrorKind {
    Unknown,
    NotFound,
    AccessDenied,
    Busy,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct BusDeviceError {
    pub kind: BusDeviceErrorKind,
    pub message: String,
}

impl BusDeviceError {
    pub fn new(kind: BusDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            BusDeviceErrorKind::NotFound | BusDeviceErrorKind::AccessDenied
        )
    }
}

impl From<String> for BusDeviceError {
    fn from(message: String) -> Self {
        Self::new(BusDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for BusDeviceError {
    fn from(message: &str) -> Self {
        Self::new(BusDeviceErrorKind::Unknown, message)
    }
}

/// 总线适配器统一接口
///
/// `receive` 阻塞至多一个读超时周期；`try_receive` 立即返回，
/// 无帧时为 `Ok(None)`。超时不是错误语义，只有设备级故障才会沿
/// `Err` 传播。
pub trait BusAdapter {
    fn send(&mut self, frame: Frame) -> Result<(), BusError>;
    fn receive(&mut self) -> Result<Frame, BusError>;
    fn set_receive_timeout(&mut self, _timeout: Duration) {}
    fn try_receive(&mut self) -> Result<Option<Frame>, BusError>;
}

/// 只读端：接收循环独占
pub trait RxAdapter: Send {
    fn receive(&mut self) -> Result<Frame, BusError>;
    fn try_receive(&mut self) -> Result<Option<Frame>, BusError>;
    fn set_receive_timeout(&mut self, _timeout: Duration) {}
}

/// 只写端：控制/遥测循环通过互斥共享
pub trait TxAdapter: Send {
    fn send(&mut self, frame: Frame) -> Result<(), BusError>;
}

/// 可分离的适配器：拆成独立的收/发两端
pub trait SplittableAdapter: BusAdapter {
    type Rx: RxAdapter;
    type Tx: TxAdapter;
    fn split(self) -> Result<(Self::Rx, Self::Tx), BusError>;
}
