use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Counts outstanding background deliveries so that a flush can wait for
/// all of them.
///
/// Callers must not [`add`](WaitGroup::add) concurrently with
/// [`wait`](WaitGroup::wait); the hook enforces this with its barrier lock.
#[derive(Debug, Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    pending: AtomicUsize,
    idle: Notify,
}

/// One registered unit of work. Dropping it marks the unit complete, also
/// when the task owning it panics.
#[derive(Debug)]
pub struct WaitGuard {
    inner: Arc<Inner>,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self) -> WaitGuard {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        WaitGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Resolve once no unit of work is outstanding.
    pub async fn wait(&self) {
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            // Register before checking so a `done` in between is not lost.
            idle.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if self.inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout, Duration};

    #[tokio::test]
    async fn wait_returns_immediately_when_idle() {
        let group = WaitGroup::new();
        timeout(Duration::from_millis(50), group.wait())
            .await
            .expect("idle group should not block");
    }

    #[tokio::test]
    async fn wait_blocks_until_every_guard_is_dropped() {
        let group = WaitGroup::new();
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..4u64 {
            let guard = group.add();
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                sleep(Duration::from_millis(10 * (i + 1))).await;
                done.fetch_add(1, Ordering::SeqCst);
                drop(guard);
            });
        }
        assert_eq!(group.pending(), 4);

        group.wait().await;
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(group.pending(), 0);
    }

    #[tokio::test]
    async fn guard_is_released_when_task_panics() {
        let group = WaitGroup::new();
        let guard = group.add();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            panic!("delivery task failed");
        });
        assert!(handle.await.is_err());
        timeout(Duration::from_millis(50), group.wait())
            .await
            .expect("panicked task must release its guard");
    }
}
