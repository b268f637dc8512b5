//! # huddle-core
//!
//! Participant registry and event delivery for the Huddle chat server.
//!
//! This crate decides, for every event raised for a user, whether it is
//! delivered right away to a parked long-poll or buffered for the next one.
//! It holds no network code:
//!
//! - **Participant** - One user's event buffer, push channel and long-poll waiter
//! - **Registry** - Identifier to participant mapping, presence queries
//! - **PushChannel** - Trait implemented by transports that can push events
//!
//! ## Delivery
//!
//! ```text
//!            emit                    emit
//!   ┌──────┐ ────────▶ ┌───────────┐ ────┐
//!   │ Idle │           │ Buffering │ ◀───┘
//!   └──────┘ ◀──────── └───────────┘
//!    │   ▲    poll (flush)
//!    │   │
//!    │   │ emit / deadline
//!    ▼   │
//!   ┌─────────┐
//!   │ Waiting │
//!   └─────────┘
//! ```
//!
//! A parked poll always runs its deadline on the tokio runtime it was
//! registered from.

pub mod channel;
pub mod participant;
pub mod registry;
mod waiter;

pub use channel::{ChannelError, PushChannel};
pub use participant::{
    DeliveryState, Participant, ParticipantError, ParticipantInfo, WaiterPolicy,
};
pub use registry::{Registry, RegistryConfig, RegistryStats, DEFAULT_POLL_TIMEOUT};
pub use waiter::PollCallback;
