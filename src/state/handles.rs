use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Counts asynchronous operations borrowed from one owner.
///
/// `idle()` resolves once the count is zero. Suspend and close use it to wait
/// for in-flight work before releasing the connection.
#[derive(Debug, Default)]
pub struct HandleRefCounter {
    count: AtomicUsize,
    idle: Notify,
}

impl HandleRefCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// # Panics
    /// When called with a count of zero.
    pub fn dec(&self) {
        let previous = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match previous {
            Ok(1) => self.idle.notify_waiters(),
            Ok(_) => {}
            Err(_) => panic!("HandleRefCounter::dec called with no outstanding handles"),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.count() == 0
    }

    pub async fn idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a dec between the check and the
            // await is not missed
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// RAII handle: increments on creation, decrements on drop
#[derive(Debug)]
pub struct HandleGuard {
    counter: Arc<HandleRefCounter>,
}

impl HandleGuard {
    pub fn new(counter: Arc<HandleRefCounter>) -> Self {
        counter.inc();
        Self { counter }
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.counter.dec();
    }
}
