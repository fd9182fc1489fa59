//! Tekstowe odpowiedzi dla `/guard-report` i `/guard-settings`.

use std::fmt::Write as _;

use crate::alerts::CooldownPolicy;
use crate::db::{AlertSettings, RoomStats};

pub fn render_room_report(title: &str, stats: &RoomStats, window_label: &str) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "📊 **Guard report – {title}** ({window_label})\n");

    if stats.total_events == 0 {
        let _ = write!(s, "✅ No suspicious activity recorded.");
        return s;
    }

    let _ = writeln!(s, "🚨 Flagged messages: **{}**", stats.total_events);
    let _ = writeln!(s, "👥 Distinct users: **{}**", stats.distinct_actors);
    if let Some(at) = stats.last_event_at {
        let _ = writeln!(s, "🕒 Last event: {}", at.format("%Y-%m-%d %H:%M UTC"));
    }

    if !stats.top_actors.is_empty() {
        let _ = writeln!(s, "\n**Top users:**");
        for (i, a) in stats.top_actors.iter().enumerate() {
            let name = a
                .username
                .as_deref()
                .map(|u| format!("{u} ({})", a.actor_id))
                .unwrap_or_else(|| a.actor_id.to_string());
            let _ = writeln!(s, "{}. {} – {}", i + 1, name, a.events);
        }
    }
    s.trim_end().to_string()
}

/// `changed` = the command just flipped the toggle.
pub fn render_alert_settings(
    title: &str,
    settings: &AlertSettings,
    cooldown: CooldownPolicy,
    changed: bool,
) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "⚙️ **Alert settings – {title}**\n");
    let _ = writeln!(
        s,
        "Owner alerts: **{}**",
        if settings.alert_owner { "on" } else { "off" }
    );
    let cooldown = match cooldown {
        CooldownPolicy::Indefinite => "until restart".to_string(),
        CooldownPolicy::For(d) => format!("{} min per user", d.as_secs() / 60),
    };
    let _ = write!(s, "Cooldown: {cooldown}");
    if changed {
        let _ = write!(s, "\n\n✅ Saved.");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::db::ActorStat;
    use chrono::{TimeZone, Utc};

    #[test]
    fn empty_report() {
        let out = render_room_report("Main", &RoomStats::default(), "24h");
        assert!(out.contains("Guard report – Main"));
        assert!(out.contains("No suspicious activity"));
    }

    #[test]
    fn lists_top_actors_in_order() {
        let stats = RoomStats {
            total_events: 7,
            distinct_actors: 2,
            top_actors: vec![
                ActorStat { actor_id: 1, username: Some("alice".into()), events: 5 },
                ActorStat { actor_id: 2, username: None, events: 2 },
            ],
            last_event_at: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 0).unwrap()),
        };
        let out = render_room_report("Main", &stats, "24h");
        assert!(out.contains("Flagged messages: **7**"));
        assert!(out.contains("1. alice (1) – 5"));
        assert!(out.contains("2. 2 – 2"));
        assert!(out.contains("2024-01-02 03:04 UTC"));
    }

    #[test]
    fn settings_show_toggle_and_cooldown() {
        let out = render_alert_settings(
            "Main",
            &AlertSettings::default(),
            CooldownPolicy::For(Duration::from_secs(300)),
            false,
        );
        assert!(out.contains("Owner alerts: **on**"));
        assert!(out.contains("Cooldown: 5 min per user"));
        assert!(!out.contains("Saved"));

        let off = render_alert_settings(
            "Main",
            &AlertSettings { alert_owner: false },
            CooldownPolicy::Indefinite,
            true,
        );
        assert!(off.contains("Owner alerts: **off**"));
        assert!(off.contains("until restart"));
        assert!(off.ends_with("✅ Saved."));
    }
}
