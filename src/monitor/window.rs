//! Fixed-window per-actor counters (messages and links).
//!
//! Every actor shares one reset clock per counter kind: when the window
//! elapses, the whole map is cleared at once. Messages and links run on
//! independent clocks (`message_window`, `link_window`).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

/// Counter values for one actor inside the current windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActorWindowState {
    pub message_count: u32,
    pub link_count: u32,
}

#[derive(Debug)]
struct Windows {
    messages: HashMap<u64, u32>,
    links: HashMap<u64, u32>,
    messages_since: Instant,
    links_since: Instant,
}

impl Windows {
    fn maybe_reset(&mut self, now: Instant, message_window: Duration, link_window: Duration) {
        if now.saturating_duration_since(self.messages_since) > message_window {
            debug!(actors = self.messages.len(), "message window reset");
            self.messages.clear();
            self.messages_since = now;
        }
        if now.saturating_duration_since(self.links_since) > link_window {
            debug!(actors = self.links.len(), "link window reset");
            self.links.clear();
            self.links_since = now;
        }
    }
}

#[derive(Debug)]
pub struct RateWindowTracker {
    message_window: Duration,
    link_window: Duration,
    state: Mutex<Windows>,
}

impl RateWindowTracker {
    pub fn new(message_window: Duration, link_window: Duration) -> Self {
        Self::starting_at(message_window, link_window, Instant::now())
    }

    /// Tracker whose windows open at `start` (tests drive the clock explicitly).
    pub fn starting_at(message_window: Duration, link_window: Duration, start: Instant) -> Self {
        Self {
            message_window,
            link_window,
            state: Mutex::new(Windows {
                messages: HashMap::new(),
                links: HashMap::new(),
                messages_since: start,
                links_since: start,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Windows> {
        // counters are plain integers, a poisoned lock still holds valid data
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Counts one message for `actor`, returns the count inside the current window.
    pub fn record_message(&self, actor: u64, now: Instant) -> u32 {
        let mut w = self.lock();
        w.maybe_reset(now, self.message_window, self.link_window);
        let c = w.messages.entry(actor).or_insert(0);
        *c = c.saturating_add(1);
        *c
    }

    /// Adds `n` links for `actor`, returns the count inside the current window.
    pub fn record_links(&self, actor: u64, n: u32, now: Instant) -> u32 {
        let mut w = self.lock();
        w.maybe_reset(now, self.message_window, self.link_window);
        let c = w.links.entry(actor).or_insert(0);
        *c = c.saturating_add(n);
        *c
    }

    /// Current counters for `actor`, after applying any pending reset.
    pub fn snapshot(&self, actor: u64, now: Instant) -> ActorWindowState {
        let mut w = self.lock();
        w.maybe_reset(now, self.message_window, self.link_window);
        ActorWindowState {
            message_count: w.messages.get(&actor).copied().unwrap_or(0),
            link_count: w.links.get(&actor).copied().unwrap_or(0),
        }
    }

    /// Clears both windows for every actor.
    pub fn reset(&self, now: Instant) {
        let mut w = self.lock();
        w.messages.clear();
        w.links.clear();
        w.messages_since = now;
        w.links_since = now;
    }
}
