use std::sync::atomic::{AtomicUsize, Ordering};

/// Countdown of parents that have not completed yet.
#[derive(Debug)]
pub struct ReadinessCounter {
    remaining: AtomicUsize,
}

impl ReadinessCounter {
    pub fn new(parents: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(parents),
        }
    }

    /// Record one completed parent. Returns `true` for exactly one caller: the one
    /// whose decrement reaches zero.
    pub fn notify_parent_ready(&self) -> bool {
        match self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => previous == 1,
            Err(_) => {
                tracing::warn!("parent readiness reported more often than there are parents");
                false
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn source_is_ready_immediately() {
        let c = ReadinessCounter::new(0);
        assert!(c.is_ready());
        assert!(!c.notify_parent_ready());
    }

    #[test]
    fn only_the_last_notification_reports_ready() {
        let c = ReadinessCounter::new(3);
        assert!(!c.notify_parent_ready());
        assert!(!c.notify_parent_ready());
        assert!(!c.is_ready());
        assert!(c.notify_parent_ready());
        assert!(c.is_ready());
    }

    #[test]
    fn concurrent_notifications_elect_one_thread() {
        let k = 64;
        let c = Arc::new(ReadinessCounter::new(k));
        let handles = (0..k)
            .map(|_| {
                let c = Arc::clone(&c);
                std::thread::spawn(move || c.notify_parent_ready())
            })
            .collect::<Vec<_>>();
        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .filter(|ready| *ready)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(c.remaining(), 0);
    }
}
