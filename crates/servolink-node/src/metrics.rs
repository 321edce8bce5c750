//! 节点性能指标模块
//!
//! 提供零开销的原子计数器，用于监控收发链路和控制循环的健康状态。
//! 所有计数器都使用原子操作，可以在任何线程安全地读取，不会引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 节点实时指标
///
/// # 使用示例
///
/// ```rust
/// use servolink_node::metrics::NodeMetrics;
/// use std::sync::Arc;
/// use std::sync::atomic::Ordering;
///
/// let metrics = Arc::new(NodeMetrics::default());
///
/// // 在接收循环中更新指标
/// metrics.rx_frames_total.fetch_add(1, Ordering::Relaxed);
///
/// // 在主线程中读取快照
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.rx_frames_total, 1);
/// ```
#[derive(Debug, Default)]
pub struct NodeMetrics {
    /// 接收到的总帧数（含被忽略的帧）
    pub rx_frames_total: AtomicU64,

    /// 成功解码为协议消息的帧数
    pub rx_frames_decoded: AtomicU64,

    /// 被忽略的帧数（未识别标识符/长度不符，按协议静默跳过）
    pub rx_frames_ignored: AtomicU64,

    /// 发送的总帧数
    pub tx_frames_total: AtomicU64,

    /// 发送失败次数（总线繁忙/超时，样本被丢弃）
    pub tx_failures: AtomicU64,

    /// 因变更抑制而未发送的控制周期数
    ///
    /// 这是正常现象：方向和占空比都没变时不占用总线。
    pub tx_suppressed: AtomicU64,

    /// 控制循环完成的周期数
    pub control_cycles: AtomicU64,

    /// 控制/遥测循环超期（overrun）次数
    ///
    /// 如果这个值快速增长，说明周期预算被循环体耗尽，需要检查
    /// 总线发送是否长时间阻塞。
    pub loop_overruns: AtomicU64,

    /// 邮箱覆盖次数（未被消费就被更新值顶掉）
    pub mailbox_overwrites: AtomicU64,

    /// 设备级错误次数
    pub device_errors: AtomicU64,
}

impl NodeMetrics {
    /// 创建新的指标实例（所有计数器初始化为 0）
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取人类可读的指标快照
    ///
    /// 快照是原子读取的（不同计数器之间可能有微小的时间差）。
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rx_frames_total: self.rx_frames_total.load(Ordering::Relaxed),
            rx_frames_decoded: self.rx_frames_decoded.load(Ordering::Relaxed),
            rx_frames_ignored: self.rx_frames_ignored.load(Ordering::Relaxed),
            tx_frames_total: self.tx_frames_total.load(Ordering::Relaxed),
            tx_failures: self.tx_failures.load(Ordering::Relaxed),
            tx_suppressed: self.tx_suppressed.load(Ordering::Relaxed),
            control_cycles: self.control_cycles.load(Ordering::Relaxed),
            loop_overruns: self.loop_overruns.load(Ordering::Relaxed),
            mailbox_overwrites: self.mailbox_overwrites.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器（用于测试）
    pub fn reset(&self) {
        self.rx_frames_total.store(0, Ordering::Relaxed);
        self.rx_frames_decoded.store(0, Ordering::Relaxed);
        self.rx_frames_ignored.store(0, Ordering::Relaxed);
        self.tx_frames_total.store(0, Ordering::Relaxed);
        self.tx_failures.store(0, Ordering::Relaxed);
        self.tx_suppressed.store(0, Ordering::Relaxed);
        self.control_cycles.store(0, Ordering::Relaxed);
        self.loop_overruns.store(0, Ordering::Relaxed);
        self.mailbox_overwrites.store(0, Ordering::Relaxed);
        self.device_errors.store(0, Ordering::Relaxed);
    }
}

/// 指标快照（不可变，用于读取）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub rx_frames_total: u64,
    pub rx_frames_decoded: u64,
    pub rx_frames_ignored: u64,
    pub tx_frames_total: u64,
    pub tx_failures: u64,
    pub tx_suppressed: u64,
    pub control_cycles: u64,
    pub loop_overruns: u64,
    pub mailbox_overwrites: u64,
    pub device_errors: u64,
}

impl MetricsSnapshot {
    /// 解码成功率（百分比，无帧时为 0）
    pub fn decode_rate(&self) -> f64 {
        if self.rx_frames_total == 0 {
            return 0.0;
        }
        (self.rx_frames_decoded as f64 / self.rx_frames_total as f64) * 100.0
    }

    /// 变更抑制率（百分比）：被抑制的周期占全部控制周期的比例
    pub fn suppression_rate(&self) -> f64 {
        if self.control_cycles == 0 {
            return 0.0;
        }
        (self.tx_suppressed as f64 / self.control_cycles as f64) * 100.0
    }
}
