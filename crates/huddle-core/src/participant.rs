//! Per-user event delivery.
//!
//! A participant reconciles the two ways an event can reach a user: an
//! attached push channel, and the long-poll cycle. Events raised while
//! nobody is polling are buffered; a poll either drains the buffer at once or
//! parks a single waiter that the next event (or the deadline) resolves.

use crate::channel::PushChannel;
use crate::waiter::{PollCallback, Waiter};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Participant errors.
#[derive(Debug, Error)]
pub enum ParticipantError {
    /// A long-poll is already outstanding and the policy forbids replacing it.
    #[error("A poll is already outstanding for: {0}")]
    ConflictingWaiter(String),

    /// A poll had to be parked outside a tokio runtime.
    #[error("No tokio runtime to run the poll deadline for: {0}")]
    NoRuntime(String),
}

/// What to do when a poll arrives while another one is still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaiterPolicy {
    /// Resolve the outstanding poll with no events and park the new one.
    #[default]
    Replace,
    /// Refuse the new poll with [`ParticipantError::ConflictingWaiter`].
    Reject,
}

/// Where a participant's delivery state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Nothing buffered, nobody polling.
    Idle,
    /// Events are buffered for the next poll.
    Buffering,
    /// A poll is parked waiting for the next event.
    Waiting,
}

/// External representation of a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    /// The participant's identifier.
    pub identifier: String,
}

/// Mutable delivery state, guarded by one lock per participant.
struct Inner<E> {
    queue: VecDeque<E>,
    channel: Option<Box<dyn PushChannel<E>>>,
    waiter: Option<Waiter<E>>,
    generation: u64,
}

/// The server-side record of one reachable chat user.
pub struct Participant<E> {
    identifier: String,
    poll_timeout: Duration,
    waiter_policy: WaiterPolicy,
    inner: Mutex<Inner<E>>,
}

impl<E: Send + 'static> Participant<E> {
    /// Create a participant with an empty buffer, no channel and no waiter.
    #[must_use]
    pub fn new(identifier: impl Into<String>, poll_timeout: Duration) -> Self {
        Self {
            identifier: identifier.into(),
            poll_timeout,
            waiter_policy: WaiterPolicy::default(),
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                channel: None,
                waiter: None,
                generation: 0,
            }),
        }
    }

    /// Set the policy applied to overlapping polls.
    #[must_use]
    pub fn with_waiter_policy(mut self, policy: WaiterPolicy) -> Self {
        self.waiter_policy = policy;
        self
    }

    /// Get the participant's identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Get the long-poll deadline.
    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Install a push channel.
    ///
    /// Any previously attached channel is dropped without being closed.
    pub fn attach<C: PushChannel<E>>(&self, channel: C) -> &Self {
        let previous = self.inner.lock().channel.replace(Box::new(channel));
        if previous.is_some() {
            debug!(participant = %self.identifier, "Push channel replaced");
        } else {
            debug!(participant = %self.identifier, "Push channel attached");
        }
        self
    }

    /// Close and forget the attached push channel, if any.
    pub fn detach(&self) -> &Self {
        let channel = self.inner.lock().channel.take();
        if let Some(mut channel) = channel {
            channel.close();
            debug!(participant = %self.identifier, "Push channel detached");
        }
        self
    }

    /// Detach the push channel only if it reports itself closed.
    ///
    /// Returns `true` if a channel was detached. A transport tearing down its
    /// own connection uses this so that it never closes a newer channel
    /// attached in the meantime.
    pub fn detach_if_closed(&self) -> bool {
        let channel = {
            let mut inner = self.inner.lock();
            let closed = inner
                .channel
                .as_deref()
                .is_some_and(|channel| !channel.is_open());
            if closed {
                inner.channel.take()
            } else {
                None
            }
        };
        match channel {
            Some(mut channel) => {
                channel.close();
                debug!(participant = %self.identifier, "Closed push channel detached");
                true
            }
            None => false,
        }
    }

    /// Raise an event for this participant.
    ///
    /// An outstanding poll receives the event immediately; otherwise it is
    /// buffered for the next one.
    pub fn emit(&self, event: E) -> &Self {
        let mut inner = self.inner.lock();
        match inner.waiter.take() {
            Some(waiter) => {
                drop(inner);
                trace!(participant = %self.identifier, "Resolving poll with emitted event");
                waiter.resolve(vec![event]);
            }
            None => {
                inner.queue.push_back(event);
                trace!(
                    participant = %self.identifier,
                    pending = inner.queue.len(),
                    "Event buffered"
                );
            }
        }
        self
    }

    /// Register a long-poll.
    ///
    /// If events are buffered, `callback` runs before this returns with all of
    /// them in emission order. Otherwise a waiter is parked until the next
    /// [`emit`](Self::emit) or until the poll timeout elapses, whichever comes
    /// first; on timeout `callback` receives an empty batch.
    ///
    /// Parking a waiter spawns its deadline on the current tokio runtime.
    /// Returns the parked waiter's generation, which
    /// [`cancel_wait`](Self::cancel_wait) accepts, or `None` if the buffer was
    /// flushed.
    ///
    /// # Errors
    ///
    /// Returns [`ParticipantError::ConflictingWaiter`] if a poll is already
    /// outstanding and the policy is [`WaiterPolicy::Reject`], and
    /// [`ParticipantError::NoRuntime`] if a waiter must be parked outside a
    /// tokio runtime.
    pub fn wait_for_events<F>(
        self: &Arc<Self>,
        callback: F,
    ) -> Result<Option<u64>, ParticipantError>
    where
        F: FnOnce(Vec<E>) + Send + 'static,
    {
        let mut inner = self.inner.lock();

        if !inner.queue.is_empty() {
            let events: Vec<E> = inner.queue.drain(..).collect();
            drop(inner);
            debug!(
                participant = %self.identifier,
                events = events.len(),
                "Flushing buffered events to poll"
            );
            callback(events);
            return Ok(None);
        }

        if inner.waiter.is_some() && self.waiter_policy == WaiterPolicy::Reject {
            warn!(participant = %self.identifier, "Rejected overlapping poll");
            return Err(ParticipantError::ConflictingWaiter(self.identifier.clone()));
        }

        let runtime = Handle::try_current()
            .map_err(|_| ParticipantError::NoRuntime(self.identifier.clone()))?;

        inner.generation += 1;
        let generation = inner.generation;
        let timer = self.arm_deadline(&runtime, generation);
        let callback: PollCallback<E> = Box::new(callback);
        let superseded = inner
            .waiter
            .replace(Waiter::new(generation, timer, callback));
        drop(inner);

        debug!(participant = %self.identifier, generation, "Poll parked");

        if let Some(old) = superseded {
            debug!(
                participant = %self.identifier,
                generation = old.generation(),
                "Superseded outstanding poll"
            );
            old.resolve(Vec::new());
        }

        Ok(Some(generation))
    }

    /// Withdraw a parked poll whose caller went away.
    ///
    /// The waiter is dropped without being called back, but only if it is
    /// still the one parked as `generation`. Returns `true` if it was.
    pub fn cancel_wait(&self, generation: u64) -> bool {
        let waiter = {
            let mut inner = self.inner.lock();
            if inner.waiter.as_ref().map(Waiter::generation) != Some(generation) {
                return false;
            }
            inner.waiter.take()
        };
        debug!(participant = %self.identifier, generation, "Poll withdrawn");
        drop(waiter);
        true
    }

    /// Give back events a poll took but could not deliver.
    ///
    /// They go ahead of anything buffered since, or straight to a parked
    /// poll.
    pub fn requeue(&self, events: Vec<E>) -> &Self {
        if events.is_empty() {
            return self;
        }
        let mut inner = self.inner.lock();
        match inner.waiter.take() {
            Some(waiter) => {
                drop(inner);
                waiter.resolve(events);
            }
            None => {
                debug!(
                    participant = %self.identifier,
                    events = events.len(),
                    "Requeueing undelivered events"
                );
                for event in events.into_iter().rev() {
                    inner.queue.push_front(event);
                }
            }
        }
        self
    }

    /// Push an event through the attached channel.
    ///
    /// Returns `false` if no open channel is attached or it refused the event.
    pub fn push(&self, event: &E) -> bool {
        let inner = self.inner.lock();
        match inner.channel.as_deref() {
            Some(channel) if channel.is_open() => match channel.deliver(event) {
                Ok(()) => true,
                Err(e) => {
                    warn!(participant = %self.identifier, error = %e, "Push failed");
                    false
                }
            },
            _ => false,
        }
    }

    /// Check if a push channel is attached.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.inner.lock().channel.is_some()
    }

    /// Check if a poll is parked.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.inner.lock().waiter.is_some()
    }

    /// Get the number of buffered events.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Get the current delivery state.
    #[must_use]
    pub fn delivery_state(&self) -> DeliveryState {
        let inner = self.inner.lock();
        if inner.waiter.is_some() {
            DeliveryState::Waiting
        } else if inner.queue.is_empty() {
            DeliveryState::Idle
        } else {
            DeliveryState::Buffering
        }
    }

    /// Get the external representation of this participant.
    #[must_use]
    pub fn serialize(&self) -> ParticipantInfo {
        ParticipantInfo {
            identifier: self.identifier.clone(),
        }
    }

    /// Tear down delivery state when leaving the registry.
    ///
    /// The outstanding poll, if any, is cancelled without being called back,
    /// and the push channel is closed.
    pub(crate) fn retire(&self) {
        let (waiter, channel) = {
            let mut inner = self.inner.lock();
            (inner.waiter.take(), inner.channel.take())
        };
        if let Some(waiter) = waiter {
            debug!(
                participant = %self.identifier,
                generation = waiter.generation(),
                "Cancelled outstanding poll"
            );
            drop(waiter);
        }
        if let Some(mut channel) = channel {
            channel.close();
        }
    }

    fn arm_deadline(self: &Arc<Self>, runtime: &Handle, generation: u64) -> JoinHandle<()> {
        let participant = Arc::downgrade(self);
        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(participant) = participant.upgrade() {
                participant.expire(generation);
            }
        })
    }

    fn expire(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.waiter.as_ref().map(Waiter::generation) != Some(generation) {
            return;
        }
        let Some(waiter) = inner.waiter.take() else {
            return;
        };
        drop(inner);

        debug!(participant = %self.identifier, generation, "Poll timed out");
        waiter.expire();
    }
}

impl<E> fmt::Debug for Participant<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("identifier", &self.identifier)
            .field("poll_timeout", &self.poll_timeout)
            .field("waiter_policy", &self.waiter_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::RecordingChannel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TIMEOUT: Duration = Duration::from_secs(30);

    type Batches = Arc<Mutex<Vec<Vec<String>>>>;

    fn participant(id: &str) -> Arc<Participant<String>> {
        Arc::new(Participant::new(id, TIMEOUT))
    }

    fn recorder() -> (Batches, impl FnOnce(Vec<String>) + Send + 'static) {
        let batches: Batches = Arc::default();
        let sink = batches.clone();
        (batches, move |events| sink.lock().push(events))
    }

    #[test]
    fn test_new_participant_is_idle() {
        let p = participant("alice");
        assert_eq!(p.identifier(), "alice");
        assert_eq!(p.delivery_state(), DeliveryState::Idle);
        assert!(!p.is_present());
        assert!(!p.is_waiting());
        assert_eq!(p.pending(), 0);
    }

    #[test]
    fn test_emit_buffers_in_order() {
        let p = participant("alice");
        p.emit("one".into()).emit("two".into());

        assert_eq!(p.delivery_state(), DeliveryState::Buffering);
        assert_eq!(p.pending(), 2);
    }

    #[test]
    fn test_poll_flushes_buffer_synchronously() {
        let p = participant("alice");
        p.emit("one".into()).emit("two".into()).emit("three".into());

        let (batches, cb) = recorder();
        p.wait_for_events(cb).unwrap();

        assert_eq!(
            *batches.lock(),
            vec![vec!["one".to_string(), "two".into(), "three".into()]]
        );
        assert_eq!(p.delivery_state(), DeliveryState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_resolves_parked_poll() {
        let p = participant("bob");
        let (batches, cb) = recorder();

        p.wait_for_events(cb).unwrap();
        assert_eq!(p.delivery_state(), DeliveryState::Waiting);

        p.emit("hello".into());
        assert_eq!(*batches.lock(), vec![vec!["hello".to_string()]]);
        assert_eq!(p.delivery_state(), DeliveryState::Idle);

        // The deadline was cancelled: no second, empty batch.
        tokio::time::sleep(TIMEOUT * 2).await;
        assert_eq!(batches.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_after_resolution_start_new_buffer() {
        let p = participant("bob");
        let (batches, cb) = recorder();

        p.wait_for_events(cb).unwrap();
        p.emit("first".into()).emit("second".into());

        assert_eq!(*batches.lock(), vec![vec!["first".to_string()]]);
        assert_eq!(p.delivery_state(), DeliveryState::Buffering);
        assert_eq!(p.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_with_empty_batch() {
        let p = participant("carol");
        let (batches, cb) = recorder();

        p.wait_for_events(cb).unwrap();
        tokio::time::sleep(TIMEOUT - Duration::from_millis(1)).await;
        assert!(batches.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(*batches.lock(), vec![Vec::<String>::new()]);
        assert_eq!(p.delivery_state(), DeliveryState::Idle);

        tokio::time::sleep(TIMEOUT * 2).await;
        assert_eq!(batches.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_poll_replaces_previous() {
        let p = participant("dave");
        let (first, cb1) = recorder();
        let (second, cb2) = recorder();

        p.wait_for_events(cb1).unwrap();
        tokio::time::sleep(TIMEOUT / 2).await;
        p.wait_for_events(cb2).unwrap();

        // The superseded poll is resolved empty, right away.
        assert_eq!(*first.lock(), vec![Vec::<String>::new()]);
        assert!(second.lock().is_empty());

        // The old deadline passes without touching the new poll.
        tokio::time::sleep(TIMEOUT / 2 + Duration::from_secs(1)).await;
        assert!(second.lock().is_empty());
        assert!(p.is_waiting());

        p.emit("late".into());
        assert_eq!(*second.lock(), vec![vec!["late".to_string()]]);
        assert_eq!(first.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_poll_rejected_by_policy() {
        let p = Arc::new(Participant::new("erin", TIMEOUT).with_waiter_policy(WaiterPolicy::Reject));
        let (first, cb1) = recorder();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        p.wait_for_events(cb1).unwrap();
        let result = p.wait_for_events(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert!(matches!(result, Err(ParticipantError::ConflictingWaiter(id)) if id == "erin"));

        p.emit("kept".into());
        assert_eq!(*first.lock(), vec![vec!["kept".to_string()]]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wait_withdraws_only_its_own_poll() {
        let p = Arc::new(Participant::new("erin", TIMEOUT).with_waiter_policy(WaiterPolicy::Reject));
        let (first, cb1) = recorder();

        let generation = p.wait_for_events(cb1).unwrap().unwrap();
        assert!(p.cancel_wait(generation));
        assert!(!p.is_waiting());
        assert!(!p.cancel_wait(generation));

        // The slot is free again and the withdrawn deadline never fires.
        let (second, cb2) = recorder();
        let next = p.wait_for_events(cb2).unwrap().unwrap();
        assert_ne!(next, generation);
        assert!(!p.cancel_wait(generation));
        assert!(p.is_waiting());

        tokio::time::sleep(TIMEOUT + Duration::from_secs(1)).await;
        assert!(first.lock().is_empty());
        assert_eq!(*second.lock(), vec![Vec::<String>::new()]);
    }

    #[test]
    fn test_flushing_poll_has_no_generation() {
        let p = participant("erin");
        p.emit("one".into());
        assert_eq!(p.wait_for_events(|_| {}).unwrap(), None);
    }

    #[test]
    fn test_requeue_goes_ahead_of_newer_events() {
        let p = participant("frank");
        p.emit("three".into());
        p.requeue(vec!["one".into(), "two".into()]);
        p.requeue(Vec::new());

        let (batches, cb) = recorder();
        p.wait_for_events(cb).unwrap();
        assert_eq!(
            *batches.lock(),
            vec![vec!["one".to_string(), "two".into(), "three".into()]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_resolves_parked_poll() {
        let p = participant("frank");
        let (batches, cb) = recorder();

        p.wait_for_events(cb).unwrap();
        p.requeue(vec!["one".into(), "two".into()]);

        assert_eq!(*batches.lock(), vec![vec!["one".to_string(), "two".into()]]);
        assert_eq!(p.delivery_state(), DeliveryState::Idle);
    }

    #[test]
    fn test_parking_outside_runtime_is_an_error() {
        let p = participant("grace");
        let (batches, cb) = recorder();

        let result = p.wait_for_events(cb);
        assert!(matches!(result, Err(ParticipantError::NoRuntime(id)) if id == "grace"));
        assert!(!p.is_waiting());
        assert!(batches.lock().is_empty());

        // Flushing needs no runtime.
        p.emit("one".into());
        let (batches, cb) = recorder();
        p.wait_for_events(cb).unwrap();
        assert_eq!(*batches.lock(), vec![vec!["one".to_string()]]);
    }

    #[test]
    fn test_attach_detach() {
        let p = participant("frank");
        let channel = RecordingChannel::default();

        p.attach(channel.clone());
        assert!(p.is_present());
        assert!(p.push(&"pushed".to_string()));
        assert_eq!(*channel.delivered.lock(), vec!["pushed".to_string()]);

        p.detach();
        assert!(!p.is_present());
        assert!(channel.is_closed());
        assert!(!p.push(&"dropped".to_string()));

        // Idempotent.
        p.detach();
        assert!(!p.is_present());
    }

    #[test]
    fn test_detach_if_closed_spares_open_channel() {
        let p = participant("frank");
        let stale = RecordingChannel::default();
        let fresh = RecordingChannel::default();

        p.attach(stale.clone());
        stale.closed.store(true, Ordering::SeqCst);
        p.attach(fresh.clone());

        assert!(!p.detach_if_closed());
        assert!(p.is_present());
        assert!(!fresh.is_closed());

        fresh.closed.store(true, Ordering::SeqCst);
        assert!(p.detach_if_closed());
        assert!(!p.is_present());
    }

    #[test]
    fn test_attach_overwrites_without_closing() {
        let p = participant("grace");
        let old = RecordingChannel::default();
        let new = RecordingChannel::default();

        p.attach(old.clone()).attach(new.clone());
        assert!(!old.is_closed());

        p.push(&"event".to_string());
        assert!(old.delivered.lock().is_empty());
        assert_eq!(new.delivered.lock().len(), 1);
    }

    #[test]
    fn test_attach_leaves_queue_untouched() {
        let p = participant("heidi");
        p.emit("buffered".into());
        p.attach(RecordingChannel::default());

        assert_eq!(p.pending(), 1);
        assert_eq!(p.delivery_state(), DeliveryState::Buffering);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retire_cancels_poll_and_closes_channel() {
        let p = participant("ivan");
        let channel = RecordingChannel::default();
        let (batches, cb) = recorder();

        p.attach(channel.clone());
        p.wait_for_events(cb).unwrap();
        p.retire();

        assert!(channel.is_closed());
        assert!(!p.is_waiting());

        tokio::time::sleep(TIMEOUT * 2).await;
        assert!(batches.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_participant_is_never_called_back() {
        let p = participant("judy");
        let (batches, cb) = recorder();

        p.wait_for_events(cb).unwrap();
        drop(p);

        tokio::time::sleep(TIMEOUT * 2).await;
        assert!(batches.lock().is_empty());
    }

    #[test]
    fn test_serialize_exposes_identifier_only() {
        let p = participant("alice");
        p.emit("secret".into());

        let value = serde_json::to_value(p.serialize()).unwrap();
        assert_eq!(value, serde_json::json!({"identifier": "alice"}));
    }
}
