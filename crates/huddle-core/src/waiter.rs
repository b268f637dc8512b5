//! The pending long-poll registration of a participant.

use std::fmt;
use tokio::task::JoinHandle;

/// Completion callback of a long-poll request.
///
/// Invoked exactly once with the delivered events, which is empty when the
/// poll timed out or was superseded by a newer one.
pub type PollCallback<E> = Box<dyn FnOnce(Vec<E>) + Send + 'static>;

/// Deadline task of a waiter. Aborted when dropped.
struct DeadlineTimer(Option<JoinHandle<()>>);

impl DeadlineTimer {
    /// Forget the task without aborting it.
    ///
    /// Used when the timer task itself resolves the waiter.
    fn disarm(mut self) {
        self.0.take();
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

/// One outstanding long-poll: a deadline timer plus a completion callback.
pub(crate) struct Waiter<E> {
    generation: u64,
    timer: DeadlineTimer,
    callback: PollCallback<E>,
}

impl<E> Waiter<E> {
    pub(crate) fn new(generation: u64, timer: JoinHandle<()>, callback: PollCallback<E>) -> Self {
        Self {
            generation,
            timer: DeadlineTimer(Some(timer)),
            callback,
        }
    }

    /// Registration cycle this waiter belongs to.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancel the deadline and hand `events` to the poller.
    pub(crate) fn resolve(self, events: Vec<E>) {
        let Waiter {
            timer, callback, ..
        } = self;
        drop(timer);
        callback(events);
    }

    /// Resolve with no events from within the deadline task.
    pub(crate) fn expire(self) {
        let Waiter {
            timer, callback, ..
        } = self;
        timer.disarm();
        callback(Vec::new());
    }
}

impl<E> fmt::Debug for Waiter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// A one-hour timer that bumps `fired` if it ever runs to completion.
    fn hour_timer(fired: &Arc<AtomicUsize>) -> JoinHandle<()> {
        let fired = fired.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            fired.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_aborts_timer_and_calls_back() {
        let fired = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let waiter: Waiter<u32> = Waiter::new(
            7,
            hour_timer(&fired),
            Box::new(move |events| {
                assert_eq!(events, vec![1, 2]);
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(waiter.generation(), 7);

        waiter.resolve(vec![1, 2]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_timer_without_callback() {
        let fired = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let waiter: Waiter<u32> = Waiter::new(
            1,
            hour_timer(&fired),
            Box::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        drop(waiter);

        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_keeps_timer_task_alive() {
        let fired = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let waiter: Waiter<u32> = Waiter::new(
            2,
            hour_timer(&fired),
            Box::new(move |events| {
                assert!(events.is_empty());
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        waiter.expire();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
