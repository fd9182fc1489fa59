use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{AlertPayload, DispatchError, Notifier};

const ALERT_TITLE: &str = "🚨 **Security Alert** 🚨";

pub const ELEVATED_ACCESS_TEXT: &str = "🔒 **Protection Bot Setup Required**\n\n\
To fully protect this community, I need the following permissions:\n\
• Delete messages (Manage Messages)\n\
• Ban users (Ban Members)\n\
• Pin messages (Manage Messages)\n\
• Invite users (Create Invite)\n\
• Manage the server (Manage Server)\n\n\
Please grant these permissions to enable full protection.";

/// Formats alerts and hands them to the [`Notifier`].
pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
    excerpt_chars: usize,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, excerpt_chars: usize) -> Self {
        Self {
            notifier,
            excerpt_chars,
        }
    }

    /// Sends the formatted alert to `target_id`. Errors are returned, never raised.
    pub async fn send(&self, target_id: u64, payload: &AlertPayload) -> Result<(), DispatchError> {
        let text = self.format(payload);
        debug!(room_id = payload.room_id, actor_id = payload.actor.id, target_id, "dispatching alert");
        match self.notifier.send_direct(target_id, &text).await {
            Ok(()) => {
                info!(room_id = payload.room_id, actor_id = payload.actor.id, target_id, "alert sent");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, room_id = payload.room_id, actor_id = payload.actor.id, target_id, "alert dispatch failed");
                Err(e)
            }
        }
    }

    /// Best-effort request for the permissions the guardian needs in `room_id`.
    pub async fn request_elevated_access(&self, room_id: u64) {
        if let Err(e) = self.notifier.send_to_room(room_id, ELEVATED_ACCESS_TEXT).await {
            warn!(error = %e, room_id, "elevated access request failed");
        }
    }

    pub fn format(&self, p: &AlertPayload) -> String {
        let na = "N/A";
        let mut s = String::new();
        let _ = writeln!(s, "{ALERT_TITLE}\n");
        let _ = writeln!(s, "**Community:** {}", p.room_title.as_deref().unwrap_or("Unknown"));
        let _ = writeln!(
            s,
            "**User:** {} ({}, ID: {})",
            p.actor.display_name,
            p.actor.username.as_deref().unwrap_or(na),
            p.actor.id
        );
        let _ = writeln!(s, "**First Name:** {}", p.actor.first_name.as_deref().unwrap_or(na));
        let _ = writeln!(s, "**Last Name:** {}\n", p.actor.last_name.as_deref().unwrap_or(na));

        let _ = writeln!(s, "**Reasons for Alert:**");
        for (i, r) in p.reasons.iter().enumerate() {
            let _ = writeln!(s, "{}. {}", i + 1, r);
        }

        if let Some(content) = p.content.as_deref().filter(|c| !c.trim().is_empty()) {
            let excerpt = truncate_chars(content, self.excerpt_chars).replace("```", "'''");
            let _ = write!(s, "\n**Message Content:**\n```\n{excerpt}\n```\n");
        }

        let _ = write!(s, "\n⏰ *Alert generated at: {}*", p.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
        s
    }
}

/// First `max` characters of `s` (char-boundary safe).
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
