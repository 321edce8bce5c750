//! 单槽覆盖邮箱
//!
//! "只有最新值有意义"的跨任务通道：生产者 `put` 永不阻塞，
//! 未被消费的旧值直接被顶掉；消费者 `try_take` 立即返回。
//! 与通用有界队列不同，这个契约在类型上是可见的。

use std::sync::Mutex;
use tracing::error;

/// 单槽覆盖邮箱
///
/// # 示例
///
/// ```rust
/// use servolink_node::mailbox::Mailbox;
///
/// let mailbox = Mailbox::new();
/// mailbox.put(1);
/// mailbox.put(2); // 覆盖，1 被丢弃
/// assert_eq!(mailbox.try_take(), Some(2));
/// assert_eq!(mailbox.try_take(), None);
/// ```
#[derive(Debug, Default)]
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// 放入新值，返回是否顶掉了一个未被消费的旧值
    ///
    /// 覆盖不是错误；返回值供调用方计入指标，用于观察消费端是否跟不上。
    pub fn put(&self, value: T) -> bool {
        match self.slot.lock() {
            Ok(mut slot) => slot.replace(value).is_some(),
            Err(poisoned) => {
                error!("Mailbox lock poisoned, recovering");
                poisoned.into_inner().replace(value).is_some()
            },
        }
    }

    /// 取走当前值（槽位变空），无值时立即返回 `None`
    pub fn try_take(&self) -> Option<T> {
        match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => {
                error!("Mailbox lock poisoned, recovering");
                poisoned.into_inner().take()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mailbox_yields_none() {
        let mailbox: Mailbox<u16> = Mailbox::new();
        assert_eq!(mailbox.try_take(), None);
    }

    #[test]
    fn test_put_then_take() {
        let mailbox = Mailbox::new();
        assert!(!mailbox.put(42));
        assert_eq!(mailbox.try_take(), Some(42));
        assert_eq!(mailbox.try_take(), None);
    }

    #[test]
    fn test_overwrite_keeps_latest_and_reports() {
        let mailbox = Mailbox::new();
        assert!(!mailbox.put(1));
        assert!(mailbox.put(2));
        assert!(mailbox.put(3));
        assert_eq!(mailbox.try_take(), Some(3));
    }

    #[test]
    fn test_shared_across_threads() {
        use std::sync::Arc;

        let mailbox = Arc::new(Mailbox::new());
        let producer = mailbox.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..100 {
                producer.put(i);
            }
        });
        handle.join().unwrap();
        assert_eq!(mailbox.try_take(), Some(99));
    }
}
