//! 共享角度状态
//!
//! `SharedAngleState` 是节点内跨任务共享的唯一状态：最近一次已知的
//! 设定角度和实测角度，各带一个"自上次读取后是否有新数据"的新鲜标志。
//! 写入方是接收循环（远端数据）和本地采样任务（本地数据），读取方是
//! 控制循环和遥测循环。
//!
//! 两个槽位由各自独立的互斥量保护：槽位内的 `{angle, fresh}` 对保证
//! 原子可见（不会读到撕裂值），但**两个槽位之间没有顺序保证** ——
//! 读者可能看到第 N 周期的设定值和第 N-3 周期的实测值，控制律必须
//! 容忍这一点。

use servolink_protocol::Angle;
use std::sync::{Mutex, MutexGuard};
use tracing::error;

/// 单个角度槽位：值 + 新鲜标志
#[derive(Debug, Clone, Copy, Default)]
struct AngleSlot {
    angle: Angle,
    fresh: bool,
}

/// 共享角度状态（进程生命周期，启动时为零值/陈旧）
///
/// 原始字段从不暴露，所有访问都经过获取/释放互斥量的访问器。
#[derive(Debug, Default)]
pub struct SharedAngleState {
    setpoint: Mutex<AngleSlot>,
    measured: Mutex<AngleSlot>,
}

/// 锁中毒只可能由持锁线程 panic 造成；槽位是纯数据，
/// 恢复内层值继续运行，不让一次 panic 拖垮整个节点。
fn lock_slot(slot: &Mutex<AngleSlot>) -> MutexGuard<'_, AngleSlot> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            error!("Angle slot lock poisoned, recovering inner value");
            poisoned.into_inner()
        },
    }
}

impl SharedAngleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入新的设定角度并置新鲜标志
    pub fn publish_setpoint(&self, angle: Angle) {
        let mut slot = lock_slot(&self.setpoint);
        slot.angle = angle;
        slot.fresh = true;
    }

    /// 写入新的实测角度并置新鲜标志
    pub fn publish_measured(&self, angle: Angle) {
        let mut slot = lock_slot(&self.measured);
        slot.angle = angle;
        slot.fresh = true;
    }

    /// 取走新鲜的设定角度（消费新鲜标志）
    ///
    /// 只保留最新值：两次写入之间只会读到一次 `Some`。
    pub fn take_fresh_setpoint(&self) -> Option<Angle> {
        let mut slot = lock_slot(&self.setpoint);
        slot.fresh.then(|| {
            slot.fresh = false;
            slot.angle
        })
    }

    /// 取走新鲜的实测角度（消费新鲜标志）
    pub fn take_fresh_measured(&self) -> Option<Angle> {
        let mut slot = lock_slot(&self.measured);
        slot.fresh.then(|| {
            slot.fresh = false;
            slot.angle
        })
    }

    /// 非阻塞取走新鲜的实测角度
    ///
    /// 遥测等非关键读者使用：锁被占用与没有新数据同样处理为
    /// `None`（"本周期没有新数据"），绝不等待。
    pub fn try_take_fresh_measured(&self) -> Option<Angle> {
        let mut slot = self.measured.try_lock().ok()?;
        slot.fresh.then(|| {
            slot.fresh = false;
            slot.angle
        })
    }

    /// 读最近一次设定角度（不消费新鲜标志，陈旧值照常返回）
    pub fn latest_setpoint(&self) -> Angle {
        lock_slot(&self.setpoint).angle
    }

    /// 读最近一次实测角度（不消费新鲜标志，陈旧值照常返回）
    pub fn latest_measured(&self) -> Angle {
        lock_slot(&self.measured).angle
    }

    /// 非阻塞读 `{measured, setpoint}` 对
    ///
    /// 任一槽位的锁被占用时返回 `None`，调用方按"本周期没有新数据"
    /// 处理，跳过本周期而不是等待。两个槽位分别加锁，之间没有
    /// 一致性保证。
    pub fn try_latest_pair(&self) -> Option<(Angle, Angle)> {
        let measured = self.measured.try_lock().ok()?.angle;
        let setpoint = self.setpoint.try_lock().ok()?.angle;
        Some((measured, setpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_zero_and_stale() {
        let state = SharedAngleState::new();
        assert_eq!(state.latest_setpoint(), 0);
        assert_eq!(state.latest_measured(), 0);
        assert_eq!(state.take_fresh_setpoint(), None);
        assert_eq!(state.take_fresh_measured(), None);
    }

    #[test]
    fn test_fresh_measured_is_consumed_exactly_once() {
        let state = SharedAngleState::new();
        state.publish_measured(90);

        assert_eq!(state.take_fresh_measured(), Some(90));
        // 第二次读取：值仍在，但已不新鲜
        assert_eq!(state.take_fresh_measured(), None);
        assert_eq!(state.latest_measured(), 90);
    }

    #[test]
    fn test_rewrite_refreshes_flag() {
        let state = SharedAngleState::new();
        state.publish_setpoint(10);
        assert_eq!(state.take_fresh_setpoint(), Some(10));

        state.publish_setpoint(20);
        assert_eq!(state.take_fresh_setpoint(), Some(20));
        assert_eq!(state.take_fresh_setpoint(), None);
    }

    #[test]
    fn test_overwrite_keeps_only_latest() {
        let state = SharedAngleState::new();
        state.publish_setpoint(10);
        state.publish_setpoint(30);
        // 两次写入只产生一次消费，读到的是最新值
        assert_eq!(state.take_fresh_setpoint(), Some(30));
        assert_eq!(state.take_fresh_setpoint(), None);
    }

    #[test]
    fn test_latest_does_not_consume() {
        let state = SharedAngleState::new();
        state.publish_measured(45);
        assert_eq!(state.latest_measured(), 45);
        assert_eq!(state.take_fresh_measured(), Some(45));
    }

    #[test]
    fn test_try_take_fresh_measured() {
        let state = SharedAngleState::new();
        assert_eq!(state.try_take_fresh_measured(), None);
        state.publish_measured(90);
        assert_eq!(state.try_take_fresh_measured(), Some(90));
        assert_eq!(state.try_take_fresh_measured(), None);
    }

    #[test]
    fn test_try_latest_pair() {
        let state = SharedAngleState::new();
        state.publish_measured(40);
        state.publish_setpoint(100);
        assert_eq!(state.try_latest_pair(), Some((40, 100)));
        // try 读取不消费新鲜标志
        assert_eq!(state.take_fresh_measured(), Some(40));
    }
}
