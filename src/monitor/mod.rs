//! ActivityMonitor – łączy klasyfikator treści i liczniki okien.
//!
//! `check` zwraca uporządkowaną listę powodów:
//! flood → links (excess, then one per shortener link) → keyword → shouting → repetition.
//! Downstream formatting numbers reasons in this order.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::DetectionConfig;

pub mod classifier;
pub mod window;

pub use classifier::PatternClassifier;
pub use window::{ActorWindowState, RateWindowTracker};

/* ==============================
   Typy wejściowe
   ============================== */

/// Who wrote the message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorInfo {
    pub id: u64,
    pub display_name: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Snapshot of one inbound message handed to the core.
#[derive(Debug, Clone)]
pub struct Message {
    pub actor: ActorInfo,
    pub room_id: u64,
    pub room_title: Option<String>,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Text, else caption, else empty (media-only messages).
    pub fn content(&self) -> &str {
        self.text
            .as_deref()
            .or(self.caption.as_deref())
            .unwrap_or("")
    }
}

/* ==============================
   Wynik detekcji
   ============================== */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    Flood { count: u32 },
    ExcessLinks { count: u32 },
    SuspiciousUrl(String),
    Keyword(String),
    Shouting,
    Repetition,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Flood { count } => write!(f, "Message flood: {count} messages per minute"),
            Reason::ExcessLinks { count } => write!(f, "Excessive links: {count} links per hour"),
            Reason::SuspiciousUrl(link) => write!(f, "Suspicious URL detected: {link}"),
            Reason::Keyword(k) => write!(f, "Suspicious keyword detected: {k}"),
            Reason::Shouting => f.write_str("Excessive capitalization detected"),
            Reason::Repetition => f.write_str("Repetitive content detected"),
        }
    }
}

/// Ordered reasons for one message; empty iff nothing fired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionResult {
    reasons: Vec<Reason>,
}

impl DetectionResult {
    pub fn is_clean(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn len(&self) -> usize {
        self.reasons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn reasons(&self) -> &[Reason] {
        &self.reasons
    }

    /// Human-readable reason strings, in order.
    pub fn messages(&self) -> Vec<String> {
        self.reasons.iter().map(ToString::to_string).collect()
    }
}

/* ==============================
   ActivityMonitor
   ============================== */

#[derive(Debug)]
pub struct ActivityMonitor {
    classifier: PatternClassifier,
    windows: RateWindowTracker,
    messages_limit: u32,
    links_limit: u32,
}

impl ActivityMonitor {
    pub fn new(cfg: &DetectionConfig) -> Self {
        Self::with_tracker(
            cfg,
            RateWindowTracker::new(cfg.message_window(), cfg.link_window()),
        )
    }

    pub fn with_tracker(cfg: &DetectionConfig, windows: RateWindowTracker) -> Self {
        Self {
            classifier: PatternClassifier::new(cfg),
            windows,
            messages_limit: cfg.messages_per_minute,
            links_limit: cfg.links_per_hour,
        }
    }

    pub fn classifier(&self) -> &PatternClassifier {
        &self.classifier
    }

    pub fn windows(&self) -> &RateWindowTracker {
        &self.windows
    }

    pub fn check(&self, msg: &Message) -> DetectionResult {
        self.check_at(msg, Instant::now())
    }

    pub fn check_at(&self, msg: &Message, now: Instant) -> DetectionResult {
        let actor = msg.actor.id;
        let text = msg.content();
        let mut reasons = Vec::new();

        // 1) flood
        let count = self.windows.record_message(actor, now);
        if count > self.messages_limit {
            reasons.push(Reason::Flood { count });
        }

        // 2) linki
        let links = self.classifier.extract_links(text);
        if !links.is_empty() {
            let n = u32::try_from(links.len()).unwrap_or(u32::MAX);
            let link_count = self.windows.record_links(actor, n, now);
            if link_count > self.links_limit {
                reasons.push(Reason::ExcessLinks { count: link_count });
            }
            for link in links {
                if self.classifier.is_suspicious_url(link) {
                    reasons.push(Reason::SuspiciousUrl(link.to_string()));
                }
            }
        }

        // 3) słowa kluczowe – tylko pierwsze trafienie
        if let Some(k) = self.classifier.keyword_match(text) {
            reasons.push(Reason::Keyword(k.to_string()));
        }

        // 4) heurystyki
        if self.classifier.is_shouting(text) {
            reasons.push(Reason::Shouting);
        }
        if self.classifier.is_repetitive(text) {
            reasons.push(Reason::Repetition);
        }

        if !reasons.is_empty() {
            info!(
                room_id = msg.room_id,
                actor_id = actor,
                reasons = reasons.len(),
                "suspicious message"
            );
        }

        DetectionResult { reasons }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn msg(actor: u64, text: &str) -> Message {
        Message {
            actor: ActorInfo {
                id: actor,
                display_name: format!("user{actor}"),
                ..Default::default()
            },
            room_id: 100,
            room_title: Some("Main".into()),
            text: Some(text.to_string()),
            caption: None,
            timestamp: Utc::now(),
        }
    }

    fn monitor_at(t0: Instant) -> ActivityMonitor {
        let cfg = DetectionConfig::default();
        ActivityMonitor::with_tracker(
            &cfg,
            RateWindowTracker::starting_at(cfg.message_window(), cfg.link_window(), t0),
        )
    }

    #[test]
    fn clean_message_has_no_reasons() {
        let t0 = Instant::now();
        let m = monitor_at(t0);
        let r = m.check_at(&msg(1, "hello everyone, how are you"), t0);
        assert!(r.is_clean());
        assert!(r.messages().is_empty());
    }

    #[test]
    fn flood_fires_on_eleventh_message_only() {
        let t0 = Instant::now();
        let m = monitor_at(t0);
        for i in 1..=10 {
            let r = m.check_at(&msg(1, "hi"), t0 + Duration::from_secs(i));
            assert!(r.is_clean(), "message {i} flagged early");
        }
        let r = m.check_at(&msg(1, "hi"), t0 + Duration::from_secs(11));
        assert_eq!(r.messages(), vec!["Message flood: 11 messages per minute"]);
    }

    #[test]
    fn flood_clears_after_window() {
        let t0 = Instant::now();
        let m = monitor_at(t0);
        for _ in 0..11 {
            m.check_at(&msg(1, "hi"), t0);
        }
        let r = m.check_at(&msg(1, "hi"), t0 + Duration::from_secs(61));
        assert!(r.is_clean());
        assert_eq!(m.windows().snapshot(1, t0 + Duration::from_secs(61)).message_count, 1);
    }

    #[test]
    fn reasons_follow_fixed_order() {
        let t0 = Instant::now();
        let m = monitor_at(t0);
        for _ in 0..10 {
            m.check_at(&msg(5, "x"), t0);
        }
        let text = ["https://bit.ly/a"; 6].join(" ");
        let r = m.check_at(&msg(5, &text), t0);
        let got = r.reasons();
        assert_eq!(got[0], Reason::Flood { count: 11 });
        assert_eq!(got[1], Reason::ExcessLinks { count: 6 });
        assert_eq!(
            got.iter().filter(|r| matches!(r, Reason::SuspiciousUrl(_))).count(),
            6
        );
        assert_eq!(got[8], Reason::Keyword("https://".into()));
        // repetycja: 6 słów, 1 unikalne
        assert_eq!(got[9], Reason::Repetition);
        assert_eq!(got.len(), 10);
    }

    #[test]
    fn only_blacklisted_links_produce_url_reasons() {
        let t0 = Instant::now();
        let m = monitor_at(t0);
        let r = m.check_at(&msg(2, "https://bit.ly/x https://example.com/y"), t0);
        let urls: Vec<_> = r
            .reasons()
            .iter()
            .filter(|r| matches!(r, Reason::SuspiciousUrl(_)))
            .collect();
        assert_eq!(urls, vec![&Reason::SuspiciousUrl("https://bit.ly/x".into())]);
    }

    #[test]
    fn two_keywords_yield_one_reason() {
        let t0 = Instant::now();
        let m = monitor_at(t0);
        let r = m.check_at(&msg(3, "total scam, pure phishing"), t0);
        assert_eq!(r.messages(), vec!["Suspicious keyword detected: scam"]);
    }

    #[test]
    fn caption_used_when_text_missing() {
        let t0 = Instant::now();
        let m = monitor_at(t0);
        let mut mm = msg(4, "");
        mm.text = None;
        mm.caption = Some("free phishing kit".into());
        assert_eq!(
            m.check_at(&mm, t0).messages(),
            vec!["Suspicious keyword detected: phishing"]
        );

        mm.caption = None;
        assert!(m.check_at(&mm, t0).is_clean());
    }

    #[test]
    fn shouting_and_repetition_both_reported() {
        let t0 = Instant::now();
        let m = monitor_at(t0);
        let r = m.check_at(&msg(6, "WOW WOW WOW WOW WOW WOW WOW"), t0);
        assert_eq!(
            r.messages(),
            vec!["Excessive capitalization detected", "Repetitive content detected"]
        );
    }

    proptest! {
        #[test]
        fn flood_never_before_limit(limit in 1u32..30, extra in 1u32..10) {
            let t0 = Instant::now();
            let cfg = DetectionConfig { messages_per_minute: limit, ..Default::default() };
            let m = ActivityMonitor::with_tracker(
                &cfg,
                RateWindowTracker::starting_at(cfg.message_window(), cfg.link_window(), t0),
            );
            for i in 1..=(limit + extra) {
                let r = m.check_at(&msg(9, "ok"), t0);
                let flagged = r.reasons().iter().any(|r| matches!(r, Reason::Flood { .. }));
                prop_assert_eq!(flagged, i > limit);
            }
        }
    }
}
