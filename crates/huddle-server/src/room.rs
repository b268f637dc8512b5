//! The chat room: nick lifecycle and event fan-out on top of the registry.
//!
//! Every event goes to every participant. A participant with an open push
//! channel gets it pushed; everyone else gets it buffered for (or handed
//! straight to) their next long-poll.

use crate::config::{Config, LimitsConfig};
use crate::error::ApiError;
use crate::metrics;
use crate::push::WsPushChannel;
use huddle_protocol::{validate_nick, ChatEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tenvis_huddle_core::{Participant, ParticipantInfo, Registry, RegistryStats};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// How one event reached the room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatch {
    /// Participants the event was pushed to.
    pub pushed: usize,
    /// Participants the event was emitted to for polling.
    pub buffered: usize,
}

/// A single chat room.
pub struct Room {
    registry: Registry<ChatEvent>,
    limits: LimitsConfig,
    /// Joined nicks; reserved before registering so concurrent joins never
    /// overshoot `max_participants`.
    seats: AtomicUsize,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            registry: Registry::with_config(config.registry_config()),
            limits: config.limits.clone(),
            seats: AtomicUsize::new(0),
        }
    }

    /// Get the participant registry.
    #[must_use]
    pub fn registry(&self) -> &Registry<ChatEvent> {
        &self.registry
    }

    /// Register a nick and announce it.
    ///
    /// Returns everyone in the room, including the newcomer.
    ///
    /// # Errors
    ///
    /// Returns an error if the nick is invalid or taken, or the room is full.
    pub fn join(&self, nick: &str) -> Result<Vec<ParticipantInfo>, ApiError> {
        validate_nick(nick).map_err(ApiError::InvalidNick)?;

        let max = self.limits.max_participants;
        if self
            .seats
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_err()
        {
            return Err(ApiError::RoomFull);
        }
        if !self.registry.try_add(nick) {
            self.seats.fetch_sub(1, Ordering::SeqCst);
            return Err(ApiError::NickInUse(nick.to_string()));
        }

        info!(nick = %nick, "Joined");
        metrics::set_participants(self.registry.len());
        self.dispatch(ChatEvent::join(nick));

        Ok(self.registry.serialize(None))
    }

    /// Remove a nick and announce its departure.
    ///
    /// # Errors
    ///
    /// Returns an error if the nick is unknown.
    pub fn part(&self, nick: &str) -> Result<(), ApiError> {
        if !self.registry.try_remove(nick) {
            return Err(ApiError::UnknownNick(nick.to_string()));
        }
        self.seats.fetch_sub(1, Ordering::SeqCst);

        info!(nick = %nick, "Parted");
        metrics::set_participants(self.registry.len());
        self.dispatch(ChatEvent::part(nick));
        Ok(())
    }

    /// Send a message from `nick` to everyone.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is empty or too long, or the nick is unknown.
    pub fn say(&self, nick: &str, text: &str) -> Result<Dispatch, ApiError> {
        if text.trim().is_empty() {
            return Err(ApiError::EmptyMessage);
        }
        if text.len() > self.limits.max_text_length {
            return Err(ApiError::MessageTooLong(text.len()));
        }
        if !self.registry.has_identifier(nick) {
            return Err(ApiError::UnknownNick(nick.to_string()));
        }

        Ok(self.dispatch(ChatEvent::msg(nick, text)))
    }

    /// Hand an event to every participant, by push when possible.
    pub fn dispatch(&self, event: ChatEvent) -> Dispatch {
        let mut dispatch = Dispatch::default();
        self.registry.for_each(|participant| {
            if participant.push(&event) {
                dispatch.pushed += 1;
            } else {
                participant.emit(event.clone());
                dispatch.buffered += 1;
            }
        });

        debug!(
            nick = %event.nick(),
            pushed = dispatch.pushed,
            buffered = dispatch.buffered,
            "Dispatched event"
        );
        metrics::record_dispatch(dispatch.pushed, dispatch.buffered);
        dispatch
    }

    /// Long-poll for `nick`'s next events.
    ///
    /// Resolves with the buffered events at once if there are any, otherwise
    /// with the next event or, after the poll timeout, with none.
    ///
    /// # Errors
    ///
    /// Returns an error if the nick is unknown, another poll is outstanding
    /// and overlapping polls are rejected, or the nick parted while polling.
    ///
    /// Dropping the returned future withdraws the poll, so a client that
    /// reconnects is never refused because of its own abandoned request.
    pub async fn poll(&self, nick: &str) -> Result<Vec<ChatEvent>, ApiError> {
        let participant = self
            .registry
            .get(nick)
            .ok_or_else(|| ApiError::UnknownNick(nick.to_string()))?;

        let started = Instant::now();
        let (tx, rx) = oneshot::channel();
        let owner = Arc::downgrade(&participant);
        let generation = participant.wait_for_events(move |events| {
            if let Err(events) = tx.send(events) {
                // The poller hung up; keep the events for the next poll.
                if let Some(owner) = owner.upgrade() {
                    requeue(&owner, events);
                }
            }
        })?;

        let mut pending = PendingPoll {
            owner: Arc::downgrade(&participant),
            generation,
            rx,
            done: false,
        };
        drop(participant);

        let outcome = (&mut pending.rx).await;
        pending.done = true;
        let waited = started.elapsed().as_secs_f64();
        match outcome {
            Ok(events) => {
                let label = if events.is_empty() { "empty" } else { "events" };
                metrics::record_poll(label, waited);
                Ok(events)
            }
            Err(_) => {
                metrics::record_poll("gone", waited);
                Err(ApiError::Gone(nick.to_string()))
            }
        }
    }

    /// Attach a WebSocket push channel to an existing nick.
    ///
    /// # Errors
    ///
    /// Returns an error if the nick is unknown.
    pub fn attach(
        &self,
        nick: &str,
        channel: WsPushChannel,
    ) -> Result<Arc<Participant<ChatEvent>>, ApiError> {
        let participant = self
            .registry
            .get(nick)
            .ok_or_else(|| ApiError::UnknownNick(nick.to_string()))?;
        participant.attach(channel);
        Ok(participant)
    }

    /// List participants, or only those reachable by push.
    #[must_use]
    pub fn who(&self, present_only: bool) -> Vec<ParticipantInfo> {
        if present_only {
            let present = self.registry.present();
            self.registry.serialize(Some(&present))
        } else {
            self.registry.serialize(None)
        }
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}

/// A long-poll in flight, withdrawn if its future is dropped.
struct PendingPoll {
    owner: Weak<Participant<ChatEvent>>,
    generation: Option<u64>,
    rx: oneshot::Receiver<Vec<ChatEvent>>,
    done: bool,
}

impl Drop for PendingPoll {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        if let Some(generation) = self.generation {
            if owner.cancel_wait(generation) {
                debug!(nick = %owner.identifier(), "Abandoned poll withdrawn");
                return;
            }
        }
        // Resolved but never read.
        if let Ok(events) = self.rx.try_recv() {
            requeue(&owner, events);
        }
    }
}

fn requeue(participant: &Participant<ChatEvent>, events: Vec<ChatEvent>) {
    if events.is_empty() {
        return;
    }
    debug!(
        nick = %participant.identifier(),
        events = events.len(),
        "Requeueing events of abandoned poll"
    );
    participant.requeue(events);
}
