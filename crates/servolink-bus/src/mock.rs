//! 进程内环回总线（mock 后端）
//!
//! 用一对交叉连接的有界通道模拟双节点总线：一端发出的帧按 FIFO
//! 顺序出现在另一端的接收队列里。容量有限，队列满时发送失败
//! （模拟总线繁忙），与真实总线一样是有损的。
//!
//! 用于集成测试和无硬件仿真（CLI 的 demo 模式）。

use crate::{BusAdapter, BusError, Frame, RxAdapter, SplittableAdapter, TxAdapter};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use std::time::Duration;

/// 默认接收超时（与 SocketCAN 后端保持同阶）
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// 创建一对互联的总线端点
///
/// `capacity` 是每个方向的在途帧上限。
///
/// # 示例
///
/// ```
/// use servolink_bus::{BusAdapter, Frame};
/// use servolink_bus::mock;
///
/// let (mut a, mut b) = mock::pair(8);
/// a.send(Frame::new(0x101, &[0x64, 0x00])).unwrap();
/// assert_eq!(b.try_receive().unwrap().unwrap().id, 0x101);
/// ```
pub fn pair(capacity: usize) -> (MockBus, MockBus) {
    let (a_tx, b_rx) = bounded(capacity);
    let (b_tx, a_rx) = bounded(capacity);

    (
        MockBus {
            tx: a_tx,
            rx: a_rx,
            read_timeout: DEFAULT_READ_TIMEOUT,
        },
        MockBus {
            tx: b_tx,
            rx: b_rx,
            read_timeout: DEFAULT_READ_TIMEOUT,
        },
    )
}

/// 环回总线端点
#[derive(Debug)]
pub struct MockBus {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    read_timeout: Duration,
}

fn send_on_channel(tx: &Sender<Frame>, frame: Frame) -> Result<(), BusError> {
    match tx.try_send(frame) {
        Ok(()) => Ok(()),
        // 队列满 = 总线繁忙：有界等待没有意义，直接按超时丢弃
        Err(TrySendError::Full(_)) => Err(BusError::Timeout),
        Err(TrySendError::Disconnected(_)) => Err(BusError::Disconnected),
    }
}

impl BusAdapter for MockBus {
    fn send(&mut self, frame: Frame) -> Result<(), BusError> {
        send_on_channel(&self.tx, frame)
    }

    fn receive(&mut self) -> Result<Frame, BusError> {
        match self.rx.recv_timeout(self.read_timeout) {
            Ok(frame) => Ok(frame),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(BusError::Timeout),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(BusError::Disconnected),
        }
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    fn try_receive(&mut self) -> Result<Option<Frame>, BusError> {
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(BusError::Disconnected),
        }
    }
}

impl SplittableAdapter for MockBus {
    type Rx = MockRx;
    type Tx = MockTx;

    fn split(self) -> Result<(Self::Rx, Self::Tx), BusError> {
        Ok((
            MockRx {
                rx: self.rx,
                read_timeout: self.read_timeout,
            },
            MockTx { tx: self.tx },
        ))
    }
}

/// 分离后的接收端
#[derive(Debug)]
pub struct MockRx {
    rx: Receiver<Frame>,
    read_timeout: Duration,
}

impl RxAdapter for MockRx {
    fn receive(&mut self) -> Result<Frame, BusError> {
        match self.rx.recv_timeout(self.read_timeout) {
            Ok(frame) => Ok(frame),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(BusError::Timeout),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(BusError::Disconnected),
        }
    }

    fn try_receive(&mut self) -> Result<Option<Frame>, BusError> {
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(BusError::Disconnected),
        }
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }
}

/// 分离后的发送端
#[derive(Debug)]
pub struct MockTx {
    tx: Sender<Frame>,
}

impl TxAdapter for MockTx {
    fn send(&mut self, frame: Frame) -> Result<(), BusError> {
        send_on_channel(&self.tx, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_delivers_fifo() {
        let (mut a, mut b) = pair(8);
        a.send(Frame::new(0x101, &[1, 0])).unwrap();
        a.send(Frame::new(0x102, &[2, 0])).unwrap();

        assert_eq!(b.receive().unwrap().id, 0x101);
        assert_eq!(b.receive().unwrap().id, 0x102);
        assert!(b.try_receive().unwrap().is_none());
    }

    #[test]
    fn test_full_queue_is_bus_busy() {
        let (mut a, _b) = pair(1);
        a.send(Frame::new(0x101, &[0, 0])).unwrap();
        assert!(matches!(
            a.send(Frame::new(0x101, &[0, 0])),
            Err(BusError::Timeout)
        ));
    }

    #[test]
    fn test_dropped_peer_is_fatal() {
        let (mut a, b) = pair(1);
        drop(b);
        let err = a.send(Frame::new(0x101, &[0, 0])).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_split_endpoints_keep_working() {
        let (a, mut b) = pair(4);
        let (mut _a_rx, mut a_tx) = a.split().unwrap();
        a_tx.send(Frame::new(0x103, &[1, 0, 2])).unwrap();
        assert_eq!(b.receive().unwrap().id, 0x103);
    }

    #[test]
    fn test_receive_times_out_when_empty() {
        let (mut a, _b) = pair(1);
        a.set_receive_timeout(Duration::from_millis(1));
        assert!(matches!(a.receive(), Err(BusError::Timeout)));
    }
}
