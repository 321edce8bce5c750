//! 反馈 / 遥测循环
//!
//! 以比控制循环慢一档的固定周期运行（观测值 50–100ms）：
//!
//! - 执行节点：向外上报本地实测角度（Setpoint 模式发反馈消息，
//!   Direct 模式发当前编码器报告）。只在实测值新鲜时上报 ——
//!   采样任务停摆后上报随之停止，对端通过遥测变陈旧感知故障。
//! - 指挥节点：消费显示邮箱里最新的 `{measured, setpoint}` 对交给
//!   显示协作者渲染；邮箱为空时退回读共享状态，拿不到锁就跳过
//!   本周期（非关键读者绝不等待）。Direct 模式下额外广播期望
//!   编码器报告，供总线上的观察者查看目标角度。

use crate::config::{AngleRange, DriveMode};
use crate::control::{send_message, LoopAnchor};
use crate::hardware::AngleDisplay;
use crate::mailbox::Mailbox;
use crate::metrics::NodeMetrics;
use crate::state::SharedAngleState;
use servolink_bus::TxAdapter;
use servolink_protocol::{Angle, Message};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// 投递给显示协作者的角度对
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnglePair {
    pub measured: Angle,
    pub setpoint: Angle,
}

/// 执行节点的反馈上报循环
pub fn feedback_loop<T: TxAdapter>(
    shared: Arc<SharedAngleState>,
    tx: Arc<Mutex<T>>,
    drive_mode: DriveMode,
    range: AngleRange,
    period: Duration,
    is_running: Arc<AtomicBool>,
    metrics: Arc<NodeMetrics>,
) {
    info!("Feedback loop started ({:?} period)", period);
    let mut anchor = LoopAnchor::new(period);

    while is_running.load(Ordering::Acquire) {
        // 只上报新鲜的实测值：采样停摆时对端自然观察到遥测变陈旧。
        // 非关键读者：拿不到锁同样按"本周期没有新数据"跳过
        if let Some(measured) = shared.try_take_fresh_measured() {
            let msg = match drive_mode {
                DriveMode::Setpoint => Message::Feedback { angle: measured },
                DriveMode::Direct => Message::CurrentEncoder {
                    angle: range.clamp(measured).max(0) as u16,
                },
            };
            send_message(&tx, msg, &metrics, &is_running);
        }

        anchor.wait(&metrics);
    }

    info!("Feedback loop exited");
}

/// 指挥节点的显示循环
///
/// `encoder_report_tx` 仅在 Direct 模式下提供：用旧一代协议的
/// 期望编码器报告广播当前设定值。发送端与控制循环共享，
/// 这里用 `try_lock`，拿不到就跳过本周期。
pub fn display_loop<T: TxAdapter>(
    shared: Arc<SharedAngleState>,
    display_in: Arc<Mailbox<AnglePair>>,
    mut display: Box<dyn AngleDisplay>,
    encoder_report_tx: Option<Arc<Mutex<T>>>,
    range: AngleRange,
    period: Duration,
    is_running: Arc<AtomicBool>,
    metrics: Arc<NodeMetrics>,
) {
    info!("Display loop started ({:?} period)", period);
    let mut anchor = LoopAnchor::new(period);

    while is_running.load(Ordering::Acquire) {
        // 优先消费邮箱里最新的角度对；没有新数据时退回读共享状态，
        // 锁被占用则本周期不渲染
        let pair = display_in.try_take().or_else(|| {
            shared
                .try_latest_pair()
                .map(|(measured, setpoint)| AnglePair { measured, setpoint })
        });

        if let Some(pair) = pair {
            display.render(pair.measured, pair.setpoint);

            if let Some(tx) = &encoder_report_tx {
                let report = Message::DesiredEncoder {
                    angle: range.clamp(pair.setpoint).max(0) as u16,
                };
                // 发送端与控制循环共享：非关键路径，拿不到锁就跳过
                if let Ok(mut guard) = tx.try_lock() {
                    match guard.send(report.encode()) {
                        Ok(()) => {
                            metrics.tx_frames_total.fetch_add(1, Ordering::Relaxed);
                        },
                        Err(e) => {
                            metrics.tx_failures.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!("Failed to send encoder report: {}, sample dropped", e);
                        },
                    }
                }
            }
        }

        anchor.wait(&metrics);
    }

    info!("Display loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use servolink_bus::mock::MockTx;
    use std::thread;

    struct CollectingDisplay(Arc<Mutex<Vec<AnglePair>>>);

    impl AngleDisplay for CollectingDisplay {
        fn render(&mut self, measured: Angle, setpoint: Angle) {
            self.0.lock().unwrap().push(AnglePair { measured, setpoint });
        }
    }

    #[test]
    fn test_display_loop_consumes_mailbox_then_falls_back() {
        let shared = Arc::new(SharedAngleState::new());
        shared.publish_measured(40);
        shared.publish_setpoint(100);

        let mailbox: Arc<Mailbox<AnglePair>> = Arc::new(Mailbox::new());
        mailbox.put(AnglePair {
            measured: 1,
            setpoint: 2,
        });

        let rendered = Arc::new(Mutex::new(Vec::new()));
        let display = Box::new(CollectingDisplay(rendered.clone()));

        let is_running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(NodeMetrics::new());

        let handle = {
            let shared = shared.clone();
            let mailbox = mailbox.clone();
            let is_running = is_running.clone();
            let metrics = metrics.clone();
            thread::spawn(move || {
                display_loop::<MockTx>(
                    shared,
                    mailbox,
                    display,
                    None,
                    AngleRange::default(),
                    Duration::from_millis(5),
                    is_running,
                    metrics,
                )
            })
        };

        thread::sleep(Duration::from_millis(60));
        is_running.store(false, Ordering::Release);
        handle.join().unwrap();

        let rendered = rendered.lock().unwrap();
        // 第一次渲染消费邮箱里的角度对
        assert_eq!(
            rendered.first(),
            Some(&AnglePair {
                measured: 1,
                setpoint: 2,
            })
        );
        // 邮箱排空后退回渲染共享状态里的最新值
        assert!(rendered.contains(&AnglePair {
            measured: 40,
            setpoint: 100,
        }));
    }
}
