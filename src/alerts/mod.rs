//! Alert gate + dispatcher and the notification seam they talk through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::monitor::ActorInfo;

pub mod dispatcher;
pub mod gate;

pub use dispatcher::AlertDispatcher;
pub use gate::{AlertGate, CooldownKey, CooldownPolicy, Reservation};

/// Errors returned when an alert could not be delivered.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The transport was unreachable or rejected the request.
    #[error("transport error: {0}")]
    Transport(String),

    /// The recipient cannot receive messages (unknown user, DMs closed).
    #[error("invalid recipient: {0}")]
    InvalidRecipient(u64),

    /// The room has no channel the bot can post informational messages to.
    #[error("room {0} has no channel to post to")]
    NoRoomChannel(u64),
}

/// Outbound side of the chat transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Private message to a single user (the room owner).
    async fn send_direct(&self, target_id: u64, text: &str) -> Result<(), DispatchError>;

    /// Informational post inside the room itself.
    async fn send_to_room(&self, room_id: u64, text: &str) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone)]
pub struct AlertPayload {
    pub room_id: u64,
    pub room_title: Option<String>,
    pub actor: ActorInfo,
    pub reasons: Vec<String>,
    pub content: Option<String>,
    pub timestamp: DateTime<Utc>,
}
