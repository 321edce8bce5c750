//! 总线接收循环
//!
//! 独占总线的接收端，每次唤醒把当前可用的入站帧全部排干：
//! 阻塞等待（上限一个调度周期）到第一帧后，用非阻塞读取把队列
//! 清空。解码成功的消息按类型分发到共享状态和邮箱；解码失败的帧
//! **不是错误**，静默丢弃并计入指标。
//!
//! 本循环从不阻塞控制循环：它有自己的调度槽，只通过共享状态和
//! 邮箱与其他任务通信。

use crate::config::AngleRange;
use crate::control::MotorCommand;
use crate::mailbox::Mailbox;
use crate::metrics::NodeMetrics;
use crate::state::SharedAngleState;
use servolink_bus::{BusError, Frame, RxAdapter};
use servolink_protocol::{Angle, Message};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, trace};

/// 接收分发目的地
///
/// 角色不需要的目的地留空：指挥节点没有电机指令邮箱，
/// 发给它的电机指令帧解码后原地丢弃。
pub struct RxRouting {
    pub shared: Arc<SharedAngleState>,
    /// 执行节点（Direct 模式）的电机指令收件箱
    pub motor_cmds: Option<Arc<Mailbox<MotorCommand>>>,
}

/// 接收循环主体
///
/// 超时是正常情况（总线安静）；瞬态错误记录后继续；致命错误
/// （设备消失、Bus-Off）清掉运行标志，带动整个节点停机。
pub fn rx_loop<R: RxAdapter>(
    mut rx: R,
    routing: RxRouting,
    range: AngleRange,
    is_running: Arc<AtomicBool>,
    metrics: Arc<NodeMetrics>,
) {
    crate::control::promote_thread_priority("rx");
    info!("Bus receive loop started");

    // Acquire: 看到 false 时必须同时看到对端的清理写入
    while is_running.load(Ordering::Acquire) {
        // 1. 阻塞等第一帧（上限一个调度周期）
        match rx.receive() {
            Ok(frame) => dispatch(&frame, &routing, range, &metrics),
            Err(BusError::Timeout) => continue,
            Err(e) => {
                if handle_rx_error(e, &is_running, &metrics) {
                    break;
                }
                continue;
            },
        }

        // 2. 把剩余的在途帧非阻塞排干
        loop {
            match rx.try_receive() {
                Ok(Some(frame)) => dispatch(&frame, &routing, range, &metrics),
                Ok(None) => break,
                Err(e) => {
                    if handle_rx_error(e, &is_running, &metrics) {
                        return;
                    }
                    break;
                },
            }
        }
    }

    info!("Bus receive loop exited");
}

/// 错误分类，返回是否应当退出循环
fn handle_rx_error(e: BusError, is_running: &AtomicBool, metrics: &NodeMetrics) -> bool {
    metrics.device_errors.fetch_add(1, Ordering::Relaxed);
    if e.is_fatal() {
        error!("Fatal bus error on receive: {}, shutting the node down", e);
        // Release: 清理写入对看到 false 的线程可见
        is_running.store(false, Ordering::Release);
        true
    } else {
        error!("Bus receive error: {}, retrying", e);
        false
    }
}

/// 解码并分发一帧
fn dispatch(frame: &Frame, routing: &RxRouting, range: AngleRange, metrics: &NodeMetrics) {
    metrics.rx_frames_total.fetch_add(1, Ordering::Relaxed);

    let Some(msg) = Message::decode(frame) else {
        // 未识别标识符或长度不符：按协议静默跳过
        metrics.rx_frames_ignored.fetch_add(1, Ordering::Relaxed);
        trace!("Ignoring frame id=0x{:X} len={}", frame.id, frame.len);
        return;
    };
    metrics.rx_frames_decoded.fetch_add(1, Ordering::Relaxed);

    match msg {
        Message::Setpoint { angle } => {
            routing.shared.publish_setpoint(range.clamp(angle));
        },
        Message::DesiredEncoder { angle } => {
            routing.shared.publish_setpoint(clamp_unsigned(angle, range));
        },
        Message::Feedback { angle } => {
            routing.shared.publish_measured(range.clamp(angle));
        },
        Message::CurrentEncoder { angle } => {
            routing.shared.publish_measured(clamp_unsigned(angle, range));
        },
        Message::MotorCmd { direction, duty } => {
            if let Some(mailbox) = &routing.motor_cmds {
                // 占空比在解码端已钳位；覆盖旧指令，只有最新值有意义
                if mailbox.put(MotorCommand { direction, duty }) {
                    metrics.mailbox_overwrites.fetch_add(1, Ordering::Relaxed);
                }
            } else {
                trace!("No motor command sink on this node, dropping");
            }
        },
    }
}

/// 把无符号编码器角度钳位到节点角度域
fn clamp_unsigned(angle: u16, range: AngleRange) -> Angle {
    range.clamp(angle.min(i16::MAX as u16) as Angle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use servolink_protocol::Direction;

    fn routing_with_mailbox() -> (RxRouting, Arc<Mailbox<MotorCommand>>) {
        let mailbox = Arc::new(Mailbox::new());
        (
            RxRouting {
                shared: Arc::new(SharedAngleState::new()),
                motor_cmds: Some(mailbox.clone()),
            },
            mailbox,
        )
    }

    #[test]
    fn test_dispatch_feedback_updates_measured() {
        let (routing, _) = routing_with_mailbox();
        let metrics = NodeMetrics::new();

        let frame = Message::Feedback { angle: 90 }.encode();
        dispatch(&frame, &routing, AngleRange::default(), &metrics);

        assert_eq!(routing.shared.take_fresh_measured(), Some(90));
        assert_eq!(routing.shared.take_fresh_measured(), None);
        assert_eq!(metrics.snapshot().rx_frames_decoded, 1);
    }

    #[test]
    fn test_dispatch_setpoint_is_clamped() {
        let (routing, _) = routing_with_mailbox();
        let metrics = NodeMetrics::new();

        let frame = Message::Setpoint { angle: 700 }.encode();
        dispatch(&frame, &routing, AngleRange::default(), &metrics);

        assert_eq!(routing.shared.take_fresh_setpoint(), Some(180));
    }

    #[test]
    fn test_dispatch_encoder_reports() {
        let (routing, _) = routing_with_mailbox();
        let metrics = NodeMetrics::new();

        dispatch(
            &Message::DesiredEncoder { angle: 100 }.encode(),
            &routing,
            AngleRange::default(),
            &metrics,
        );
        dispatch(
            &Message::CurrentEncoder { angle: 40 }.encode(),
            &routing,
            AngleRange::default(),
            &metrics,
        );

        assert_eq!(routing.shared.latest_setpoint(), 100);
        assert_eq!(routing.shared.latest_measured(), 40);
    }

    #[test]
    fn test_dispatch_motor_cmd_into_mailbox() {
        let (routing, mailbox) = routing_with_mailbox();
        let metrics = NodeMetrics::new();

        let frame = Message::MotorCmd {
            direction: Direction::Forward,
            duty: 500,
        }
        .encode();
        dispatch(&frame, &routing, AngleRange::default(), &metrics);

        assert_eq!(
            mailbox.try_take(),
            Some(MotorCommand {
                direction: Direction::Forward,
                duty: 500,
            })
        );
    }

    #[test]
    fn test_dispatch_motor_cmd_overwrites_and_counts() {
        let (routing, mailbox) = routing_with_mailbox();
        let metrics = NodeMetrics::new();

        for duty in [100, 200] {
            let frame = Message::MotorCmd {
                direction: Direction::Forward,
                duty,
            }
            .encode();
            dispatch(&frame, &routing, AngleRange::default(), &metrics);
        }

        assert_eq!(mailbox.try_take().unwrap().duty, 200);
        assert_eq!(metrics.snapshot().mailbox_overwrites, 1);
    }

    #[test]
    fn test_dispatch_unknown_frame_is_silently_ignored() {
        let (routing, mailbox) = routing_with_mailbox();
        let metrics = NodeMetrics::new();

        dispatch(
            &Frame::new(0x3FF, &[1, 2, 3]),
            &routing,
            AngleRange::default(),
            &metrics,
        );

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rx_frames_ignored, 1);
        assert_eq!(snapshot.rx_frames_decoded, 0);
        assert_eq!(routing.shared.take_fresh_setpoint(), None);
        assert_eq!(routing.shared.take_fresh_measured(), None);
        assert_eq!(mailbox.try_take(), None);
    }

    #[test]
    fn test_dispatch_motor_cmd_without_sink_is_dropped() {
        let routing = RxRouting {
            shared: Arc::new(SharedAngleState::new()),
            motor_cmds: None,
        };
        let metrics = NodeMetrics::new();

        let frame = Message::MotorCmd {
            direction: Direction::Backward,
            duty: 10,
        }
        .encode();
        // 不恐慌、不污染共享状态
        dispatch(&frame, &routing, AngleRange::default(), &metrics);
        assert_eq!(routing.shared.take_fresh_measured(), None);
    }
}
