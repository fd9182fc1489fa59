//! Guardian – pełny pipeline jednej wiadomości:
//! check → persist (równolegle) → owner lookup → gate reserve → dispatch → commit/release.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::alerts::{AlertDispatcher, AlertGate, AlertPayload, CooldownPolicy, Notifier};
use crate::config::Settings;
use crate::monitor::{ActivityMonitor, DetectionResult, Message};

pub const ACTIVITY_SUSPICIOUS_MESSAGE: &str = "suspicious_message";

/// Row written for every flagged message.
#[derive(Debug, Clone, PartialEq)]
pub struct SuspiciousEvent {
    pub room_id: u64,
    pub actor_id: u64,
    pub actor_username: Option<String>,
    pub category: String,
    pub description: String,
    pub reasons: Vec<String>,
    pub content: String,
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: &SuspiciousEvent) -> Result<()>;
}

#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Who gets alerts for `room_id`; `None` = nobody (skip dispatch).
    async fn alert_recipient(&self, room_id: u64) -> Result<Option<u64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Clean,
    NoRecipient,
    Suppressed,
    Dispatched,
    DispatchFailed,
}

pub struct Guardian {
    monitor: ActivityMonitor,
    gate: AlertGate,
    dispatcher: AlertDispatcher,
    events: Arc<dyn EventSink>,
    rooms: Arc<dyn RoomDirectory>,
}

impl Guardian {
    pub fn new(
        monitor: ActivityMonitor,
        gate: AlertGate,
        dispatcher: AlertDispatcher,
        events: Arc<dyn EventSink>,
        rooms: Arc<dyn RoomDirectory>,
    ) -> Self {
        Self {
            monitor,
            gate,
            dispatcher,
            events,
            rooms,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        notifier: Arc<dyn Notifier>,
        events: Arc<dyn EventSink>,
        rooms: Arc<dyn RoomDirectory>,
    ) -> Self {
        Self::new(
            ActivityMonitor::new(&settings.detection),
            AlertGate::new(CooldownPolicy::from_minutes(settings.alerts.cooldown_minutes)),
            AlertDispatcher::new(notifier, settings.alerts.excerpt_chars),
            events,
            rooms,
        )
    }

    pub fn monitor(&self) -> &ActivityMonitor {
        &self.monitor
    }

    pub fn gate(&self) -> &AlertGate {
        &self.gate
    }

    /// Only detection, no side effects beyond the rate counters.
    pub fn check(&self, msg: &Message) -> DetectionResult {
        self.monitor.check(msg)
    }

    pub async fn handle_message(&self, msg: &Message) -> Outcome {
        self.handle_message_at(msg, Instant::now()).await
    }

    pub async fn handle_message_at(&self, msg: &Message, now: Instant) -> Outcome {
        let result = self.monitor.check_at(msg, now);
        if result.is_clean() {
            return Outcome::Clean;
        }
        let reasons = result.messages();

        let content = msg.content();
        let event = SuspiciousEvent {
            room_id: msg.room_id,
            actor_id: msg.actor.id,
            actor_username: msg.actor.username.clone(),
            category: ACTIVITY_SUSPICIOUS_MESSAGE.to_string(),
            description: reasons.join(" | "),
            reasons: reasons.clone(),
            content: if content.is_empty() {
                "Media content".to_string()
            } else {
                content.to_string()
            },
        };

        let persist = async {
            if let Err(e) = self.events.record(&event).await {
                warn!(error = ?e, room_id = event.room_id, actor_id = event.actor_id, "persisting suspicious event failed");
            }
        };

        let payload = AlertPayload {
            room_id: msg.room_id,
            room_title: msg.room_title.clone(),
            actor: msg.actor.clone(),
            reasons,
            content: Some(content.to_string()),
            timestamp: msg.timestamp,
        };

        let (_, outcome) = tokio::join!(persist, self.alert(&payload, now));
        outcome
    }

    async fn alert(&self, payload: &AlertPayload, now: Instant) -> Outcome {
        let (room_id, actor_id) = (payload.room_id, payload.actor.id);

        let owner = match self.rooms.alert_recipient(room_id).await {
            Ok(owner) => owner,
            Err(e) => {
                warn!(error = ?e, room_id, "alert recipient lookup failed");
                None
            }
        };
        let Some(owner) = owner else {
            warn!(room_id, actor_id, "no alert recipient for room; alert skipped");
            return Outcome::NoRecipient;
        };

        let Some(slot) = self.gate.reserve(room_id, actor_id, now) else {
            debug!(room_id, actor_id, "alert suppressed");
            return Outcome::Suppressed;
        };

        // panika albo porzucony future zwalnia slot w Drop
        match self.dispatcher.send(owner, payload).await {
            Ok(()) => {
                slot.commit(now);
                Outcome::Dispatched
            }
            Err(_) => {
                drop(slot);
                Outcome::DispatchFailed
            }
        }
    }

    pub async fn request_elevated_access(&self, room_id: u64) {
        self.dispatcher.request_elevated_access(room_id).await;
    }

    /// Bounds the cooldown map; returns how many keys were dropped.
    pub fn sweep_cooldowns(&self, now: Instant) -> usize {
        let purged = self.gate.purge_expired(now);
        if purged > 0 {
            debug!(purged, remaining = self.gate.len(), "cooldown sweep");
        }
        purged
    }
}
