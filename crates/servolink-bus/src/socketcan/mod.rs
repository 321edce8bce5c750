//! SocketCAN 总线适配器实现
//!
//! 基于 Linux 内核 SocketCAN 子系统的后端。
//!
//! ## 特性
//!
//! - 支持标准帧收发，自动跳过远程帧
//! - 错误帧分类处理：Bus-Off 视为致命错误，其余忽略
//! - 接收采用 `poll` 实现有界超时，发送使用带超时的写入
//! - 默认关闭 loopback：节点不得消费自己广播出去的帧
//!
//! ## 限制
//!
//! - **仅限 Linux 平台**：SocketCAN 是 Linux 内核特性
//! - **接口配置**：波特率等配置由系统工具（`ip link`）完成，不在应用层设置

use crate::{BusAdapter, BusDeviceError, BusDeviceErrorKind, BusError, Frame, RxAdapter, SplittableAdapter, TxAdapter};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use socketcan::{
    CanError as SocketCanError, CanErrorFrame, CanFrame, CanSocket, EmbeddedFrame, Socket,
    StandardId,
};
use std::os::fd::BorrowedFd;
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use tracing::{error, trace, warn};

/// 默认接收超时：与接收循环的调度周期同阶
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// 默认发送超时：总线繁忙时的有界等待，超时即丢样本
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(50);

/// SocketCAN 适配器
///
/// # 示例
///
/// ```no_run
/// use servolink_bus::{BusAdapter, Frame, SocketCanBus};
///
/// let mut bus = SocketCanBus::open("can0").unwrap();
/// bus.send(Frame::new(0x101, &[0x5A, 0x00])).unwrap();
/// let frame = bus.receive().unwrap();
/// # let _ = frame;
/// ```
#[derive(Debug)]
pub struct SocketCanBus {
    socket: CanSocket,
    /// 接口名称（如 "can0"，split 时用于打开发送端 socket）
    interface: String,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl SocketCanBus {
    /// 打开 CAN 接口
    ///
    /// # 错误
    /// - `BusError::Device`: 接口不存在或未启动（错误信息中给出修复命令）
    /// - `BusError::Io`: 权限不足等系统调用失败
    pub fn open(interface: impl Into<String>) -> Result<Self, BusError> {
        let interface = interface.into();

        let socket = CanSocket::open(&interface).map_err(|e| {
            BusError::Device(BusDeviceError::new(
                BusDeviceErrorKind::NotFound,
                format!(
                    "Failed to open CAN interface '{}': {}. \
                     If the interface is missing, create/start it first:\n  \
                     sudo ip link set up {}",
                    interface, e, interface
                ),
            ))
        })?;

        // 关闭 loopback：节点自己发出的广播不得回到自己的接收端，
        // 否则指挥节点会把自己的设定值报告当作远端反馈消费掉
        let loopback_enabled: libc::c_int = 0;
        let loopback_result = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_CAN_RAW,
                libc::CAN_RAW_LOOPBACK,
                &loopback_enabled as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };

        if loopback_result < 0 {
            // 某些系统可能不支持此选项，不阻塞初始化
            warn!(
                "Failed to disable CAN_RAW_LOOPBACK on '{}': {}",
                interface,
                std::io::Error::last_os_error()
            );
        } else {
            trace!("SocketCAN interface '{}' loopback disabled", interface);
        }

        Ok(Self {
            socket,
            interface,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        })
    }

    /// 获取接口名称
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// 等待 socket 可读，返回是否在超时前就绪
    fn poll_readable(fd: i32, timeout: Duration) -> Result<bool, BusError> {
        let pollfd = PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, PollFlags::POLLIN);
        let timeout_ms = timeout.as_millis().min(65535) as u16;
        match poll(&mut [pollfd], PollTimeout::from(timeout_ms)) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(e) => Err(BusError::Io(std::io::Error::other(format!(
                "poll failed: {}",
                e
            )))),
        }
    }

    /// 从已就绪的 socket 读一帧并映射为协议帧
    ///
    /// 返回 `Ok(None)` 表示读到的是需要跳过的帧（远程帧、扩展帧、
    /// 非致命错误帧），调用方应继续尝试下一帧。
    fn read_mapped(socket: &CanSocket) -> Result<Option<Frame>, BusError> {
        let can_frame = match socket.read_frame() {
            Ok(frame) => frame,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(BusError::Timeout);
            },
            Err(e) => return Err(BusError::Io(e)),
        };

        match can_frame {
            CanFrame::Data(data_frame) => match data_frame.id() {
                socketcan::Id::Standard(id) => {
                    Ok(Some(Frame::new(id.as_raw(), data_frame.data())))
                },
                socketcan::Id::Extended(id) => {
                    // 本协议只使用标准帧，扩展帧交由上层按未识别帧处理前直接跳过
                    trace!("Skipping extended frame 0x{:X}", id.as_raw());
                    Ok(None)
                },
            },
            CanFrame::Remote(_) => Ok(None),
            CanFrame::Error(error_frame) => Self::classify_error_frame(error_frame).map(|_| None),
        }
    }

    /// 错误帧分类：Bus-Off 致命，其余记录后忽略
    fn classify_error_frame(error_frame: CanErrorFrame) -> Result<(), BusError> {
        match SocketCanError::from(error_frame) {
            SocketCanError::BusOff => {
                error!("CAN Bus Off error detected");
                Err(BusError::BusOff)
            },
            other => {
                warn!("CAN error frame received: {}, ignoring", other);
                Ok(())
            },
        }
    }

    /// 接收一帧，最多等待 `timeout`
    fn receive_with_timeout(&mut self, timeout: Duration) -> Result<Frame, BusError> {
        let fd = self.socket.as_raw_fd();
        let deadline = std::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if !Self::poll_readable(fd, remaining)? {
                return Err(BusError::Timeout);
            }
            if let Some(frame) = Self::read_mapped(&self.socket)? {
                return Ok(frame);
            }
            // 读到的是跳过帧，继续等待到截止时间
            if std::time::Instant::now() >= deadline {
                return Err(BusError::Timeout);
            }
        }
    }
}

impl BusAdapter for SocketCanBus {
    fn send(&mut self, frame: Frame) -> Result<(), BusError> {
        send_on_socket(&self.socket, frame, self.write_timeout)
    }

    fn receive(&mut self) -> Result<Frame, BusError> {
        self.receive_with_timeout(self.read_timeout)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    fn try_receive(&mut self) -> Result<Option<Frame>, BusError> {
        let fd = self.socket.as_raw_fd();
        // 零超时轮询：无帧立即返回
        if !Self::poll_readable(fd, Duration::ZERO)? {
            return Ok(None);
        }
        Self::read_mapped(&self.socket)
    }
}

impl SplittableAdapter for SocketCanBus {
    type Rx = SocketCanRx;
    type Tx = SocketCanTx;

    /// 分离收/发两端
    ///
    /// 接收端继承当前 socket；发送端在同一接口上新开一个 socket，
    /// 两端物理隔离，接收不受发送阻塞影响。
    fn split(self) -> Result<(Self::Rx, Self::Tx), BusError> {
        let tx_socket = CanSocket::open(&self.interface).map_err(|e| {
            BusError::Device(BusDeviceError::new(
                BusDeviceErrorKind::Backend,
                format!(
                    "Failed to open TX socket on '{}': {}",
                    self.interface, e
                ),
            ))
        })?;

        Ok((
            SocketCanRx {
                socket: self.socket,
                read_timeout: self.read_timeout,
            },
            SocketCanTx {
                socket: tx_socket,
                write_timeout: self.write_timeout,
            },
        ))
    }
}

/// 分离后的接收端
#[derive(Debug)]
pub struct SocketCanRx {
    socket: CanSocket,
    read_timeout: Duration,
}

impl RxAdapter for SocketCanRx {
    fn receive(&mut self) -> Result<Frame, BusError> {
        let fd = self.socket.as_raw_fd();
        let deadline = std::time::Instant::now() + self.read_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if !SocketCanBus::poll_readable(fd, remaining)? {
                return Err(BusError::Timeout);
            }
            if let Some(frame) = SocketCanBus::read_mapped(&self.socket)? {
                return Ok(frame);
            }
            if std::time::Instant::now() >= deadline {
                return Err(BusError::Timeout);
            }
        }
    }

    fn try_receive(&mut self) -> Result<Option<Frame>, BusError> {
        let fd = self.socket.as_raw_fd();
        if !SocketCanBus::poll_readable(fd, Duration::ZERO)? {
            return Ok(None);
        }
        SocketCanBus::read_mapped(&self.socket)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }
}

/// 分离后的发送端
#[derive(Debug)]
pub struct SocketCanTx {
    socket: CanSocket,
    write_timeout: Duration,
}

impl TxAdapter for SocketCanTx {
    fn send(&mut self, frame: Frame) -> Result<(), BusError> {
        send_on_socket(&self.socket, frame, self.write_timeout)
    }
}

/// 在给定 socket 上发送一帧（有界阻塞）
fn send_on_socket(socket: &CanSocket, frame: Frame, timeout: Duration) -> Result<(), BusError> {
    let id = StandardId::new(frame.id).ok_or_else(|| {
        BusError::Device(BusDeviceError::new(
            BusDeviceErrorKind::Backend,
            format!("Identifier 0x{:X} does not fit a standard frame", frame.id),
        ))
    })?;

    let can_frame = CanFrame::new(id, frame.data_slice()).ok_or_else(|| {
        BusError::Device(BusDeviceError::new(
            BusDeviceErrorKind::Backend,
            format!("Payload of {} bytes rejected by backend", frame.len),
        ))
    })?;

    match socket.write_frame_timeout(&can_frame, timeout) {
        Ok(()) => Ok(()),
        Err(e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            Err(BusError::Timeout)
        },
        Err(e) => Err(BusError::Io(e)),
    }
}
