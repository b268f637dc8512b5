//! The participant registry.
//!
//! The registry owns every participant, keyed by identifier, and is the
//! entry point event sources and transport handlers use to reach them.

use crate::participant::{Participant, ParticipantInfo, WaiterPolicy};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Default long-poll deadline.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long a parked poll waits before resolving empty.
    pub poll_timeout: Duration,
    /// What to do with overlapping polls.
    pub waiter_policy: WaiterPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            waiter_policy: WaiterPolicy::default(),
        }
    }
}

/// Registry of participants indexed by identifier.
pub struct Registry<E> {
    members: DashMap<String, Arc<Participant<E>>>,
    config: RegistryConfig,
}

impl<E: Send + 'static> Registry<E> {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating registry with config: {:?}", config);
        Self {
            members: DashMap::new(),
            config,
        }
    }

    /// Get the registry configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Check if a participant with this identifier exists.
    #[must_use]
    pub fn has_identifier(&self, identifier: &str) -> bool {
        self.members.contains_key(identifier)
    }

    /// Register a fresh participant.
    ///
    /// An existing participant with the same identifier is replaced and its
    /// buffered events and outstanding poll are discarded. Check
    /// [`has_identifier`](Self::has_identifier) first if that is unwanted.
    pub fn add(&self, identifier: impl Into<String>) -> &Self {
        let identifier = identifier.into();
        let participant = Participant::new(identifier.clone(), self.config.poll_timeout)
            .with_waiter_policy(self.config.waiter_policy);

        if let Some(replaced) = self.members.insert(identifier.clone(), Arc::new(participant)) {
            replaced.retire();
            debug!(participant = %identifier, "Participant replaced");
        } else {
            debug!(participant = %identifier, "Participant added");
        }
        self
    }

    /// Register a fresh participant unless the identifier is taken.
    ///
    /// Returns `false`, leaving the existing participant untouched, if the
    /// identifier is already registered.
    pub fn try_add(&self, identifier: impl Into<String>) -> bool {
        let identifier = identifier.into();
        match self.members.entry(identifier.clone()) {
            Entry::Occupied(_) => {
                debug!(participant = %identifier, "Identifier already registered");
                false
            }
            Entry::Vacant(entry) => {
                let participant = Participant::new(identifier.clone(), self.config.poll_timeout)
                    .with_waiter_policy(self.config.waiter_policy);
                entry.insert(Arc::new(participant));
                debug!(participant = %identifier, "Participant added");
                true
            }
        }
    }

    /// Get a participant by identifier.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<Arc<Participant<E>>> {
        self.members.get(identifier).map(|entry| entry.value().clone())
    }

    /// Remove a participant.
    ///
    /// Its outstanding poll is cancelled without being called back and its
    /// push channel is closed. Unknown identifiers are ignored.
    pub fn remove(&self, identifier: &str) -> &Self {
        self.try_remove(identifier);
        self
    }

    /// Remove a participant, reporting whether it was registered.
    ///
    /// Of several concurrent removals of the same identifier exactly one
    /// returns `true`.
    pub fn try_remove(&self, identifier: &str) -> bool {
        match self.members.remove(identifier) {
            Some((_, participant)) => {
                participant.retire();
                debug!(participant = %identifier, "Participant removed");
                true
            }
            None => false,
        }
    }

    /// Get a snapshot of every registered participant.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Participant<E>>> {
        self.members.iter().map(|e| e.value().clone()).collect()
    }

    /// Run `f` once for every registered participant.
    ///
    /// Iterates over a snapshot, so `f` may add or remove participants.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Participant<E>>),
    {
        for participant in self.all() {
            f(&participant);
        }
    }

    /// Get the participants currently reachable through a push channel.
    #[must_use]
    pub fn present(&self) -> Vec<Arc<Participant<E>>> {
        self.members
            .iter()
            .filter(|e| e.value().is_present())
            .map(|e| e.value().clone())
            .collect()
    }

    /// Get the external representation of all participants, or of `subset`.
    #[must_use]
    pub fn serialize(&self, subset: Option<&[Arc<Participant<E>>]>) -> Vec<ParticipantInfo> {
        match subset {
            Some(participants) => participants.iter().map(|p| p.serialize()).collect(),
            None => self.members.iter().map(|e| e.value().serialize()).collect(),
        }
    }

    /// Raise an event for one participant.
    ///
    /// Returns `false` if the identifier is unknown.
    pub fn emit_to(&self, identifier: &str, event: E) -> bool {
        match self.get(identifier) {
            Some(participant) => {
                participant.emit(event);
                true
            }
            None => {
                trace!(participant = %identifier, "Emit to unknown participant");
                false
            }
        }
    }

    /// Get the number of registered participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for participant in self.all() {
            stats.participants += 1;
            if participant.is_present() {
                stats.present += 1;
            }
            if participant.is_waiting() {
                stats.waiting += 1;
            }
            stats.buffered_events += participant.pending();
        }
        stats
    }
}

impl<E: Send + 'static> Default for Registry<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Number of registered participants.
    pub participants: usize,
    /// Number of participants with a push channel attached.
    pub present: usize,
    /// Number of participants with a poll parked.
    pub waiting: usize,
    /// Total number of buffered events.
    pub buffered_events: usize,
}
