//! Cooldown gate keyed by (room, actor).
//!
//! `allow` reserves the key, so two concurrent callers can never both get
//! `true`. The winner either confirms with `mark_sent` or hands the slot
//! back with `release` when the dispatch failed.
//!
//! [`AlertGate::reserve`] wraps the same pair in a [`Reservation`] guard:
//! if the holder panics or its future is dropped mid-dispatch, the slot is
//! released on drop instead of staying pending forever.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub room_id: u64,
    pub actor_id: u64,
}

impl CooldownKey {
    pub fn new(room_id: u64, actor_id: u64) -> Self {
        Self { room_id, actor_id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownPolicy {
    /// Once alerted, the key stays suppressed until restart or `clear`.
    Indefinite,
    /// Suppressed for the given duration after the last successful alert.
    For(Duration),
}

impl CooldownPolicy {
    /// `0` minutes selects [`CooldownPolicy::Indefinite`].
    pub fn from_minutes(minutes: u64) -> Self {
        if minutes == 0 {
            CooldownPolicy::Indefinite
        } else {
            CooldownPolicy::For(Duration::from_secs(minutes * 60))
        }
    }

    fn expired(&self, sent_at: Instant, now: Instant) -> bool {
        match self {
            CooldownPolicy::Indefinite => false,
            CooldownPolicy::For(d) => now.saturating_duration_since(sent_at) >= *d,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    /// `allow` returned true, dispatch in flight.
    Pending,
    Sent(Instant),
}

#[derive(Debug)]
pub struct AlertGate {
    policy: CooldownPolicy,
    entries: DashMap<CooldownKey, Slot>,
}

impl AlertGate {
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            policy,
            entries: DashMap::new(),
        }
    }

    pub fn policy(&self) -> CooldownPolicy {
        self.policy
    }

    pub fn allow(&self, room_id: u64, actor_id: u64, now: Instant) -> bool {
        let key = CooldownKey::new(room_id, actor_id);
        match self.entries.entry(key) {
            Entry::Vacant(v) => {
                v.insert(Slot::Pending);
                true
            }
            Entry::Occupied(mut o) => match *o.get() {
                Slot::Pending => false,
                Slot::Sent(at) if self.policy.expired(at, now) => {
                    o.insert(Slot::Pending);
                    true
                }
                Slot::Sent(_) => {
                    debug!(room_id, actor_id, "alert suppressed by cooldown");
                    false
                }
            },
        }
    }

    /// Like [`allow`](Self::allow), but the reservation is released on drop
    /// unless [`Reservation::commit`] consumed it.
    pub fn reserve(&self, room_id: u64, actor_id: u64, now: Instant) -> Option<Reservation<'_>> {
        self.allow(room_id, actor_id, now).then(|| Reservation {
            gate: self,
            key: CooldownKey::new(room_id, actor_id),
            committed: false,
        })
    }

    pub fn mark_sent(&self, room_id: u64, actor_id: u64, now: Instant) {
        self.entries
            .insert(CooldownKey::new(room_id, actor_id), Slot::Sent(now));
    }

    /// Drops a pending reservation so the next message may retry.
    pub fn release(&self, room_id: u64, actor_id: u64) {
        self.entries
            .remove_if(&CooldownKey::new(room_id, actor_id), |_, slot| {
                matches!(slot, Slot::Pending)
            });
    }

    /// Forgets the key entirely (manual pardon).
    pub fn clear(&self, room_id: u64, actor_id: u64) {
        self.entries.remove(&CooldownKey::new(room_id, actor_id));
    }

    /// Removes expired `Sent` entries. No-op under the indefinite policy.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| match slot {
            Slot::Pending => true,
            Slot::Sent(at) => !self.policy.expired(*at, now),
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Pending slot held by whoever won [`AlertGate::reserve`].
#[must_use = "dropping the reservation releases the slot immediately"]
#[derive(Debug)]
pub struct Reservation<'a> {
    gate: &'a AlertGate,
    key: CooldownKey,
    committed: bool,
}

impl Reservation<'_> {
    pub fn key(&self) -> CooldownKey {
        self.key
    }

    /// Dispatch succeeded: start the cooldown at `now`.
    pub fn commit(mut self, now: Instant) {
        self.gate.mark_sent(self.key.room_id, self.key.actor_id, now);
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.gate.release(self.key.room_id, self.key.actor_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIVE_MIN: Duration = Duration::from_secs(300);

    #[test]
    fn first_allow_then_blocked_until_released() {
        let t0 = Instant::now();
        let g = AlertGate::new(CooldownPolicy::For(FIVE_MIN));
        assert!(g.allow(1, 2, t0));
        // no mark_sent yet – still reserved
        assert!(!g.allow(1, 2, t0));
        g.release(1, 2);
        assert!(g.allow(1, 2, t0));
    }

    #[test]
    fn keys_are_per_room_and_actor() {
        let t0 = Instant::now();
        let g = AlertGate::new(CooldownPolicy::For(FIVE_MIN));
        assert!(g.allow(1, 2, t0));
        assert!(g.allow(1, 3, t0));
        assert!(g.allow(9, 2, t0));
    }

    #[test]
    fn duration_policy_reopens_after_cooldown() {
        let t0 = Instant::now();
        let g = AlertGate::new(CooldownPolicy::For(FIVE_MIN));
        assert!(g.allow(1, 2, t0));
        g.mark_sent(1, 2, t0);
        assert!(!g.allow(1, 2, t0 + Duration::from_secs(299)));
        assert!(g.allow(1, 2, t0 + FIVE_MIN));
    }

    #[test]
    fn indefinite_policy_never_reopens() {
        let t0 = Instant::now();
        let g = AlertGate::new(CooldownPolicy::from_minutes(0));
        assert_eq!(g.policy(), CooldownPolicy::Indefinite);
        assert!(g.allow(1, 2, t0));
        g.mark_sent(1, 2, t0);
        assert!(!g.allow(1, 2, t0 + Duration::from_secs(86_400 * 365)));
        assert_eq!(g.purge_expired(t0 + Duration::from_secs(86_400 * 365)), 0);
        // tylko ręczne wyczyszczenie
        g.clear(1, 2);
        assert!(g.allow(1, 2, t0));
    }

    #[test]
    fn release_does_not_drop_sent_entries() {
        let t0 = Instant::now();
        let g = AlertGate::new(CooldownPolicy::For(FIVE_MIN));
        g.mark_sent(1, 2, t0);
        g.release(1, 2);
        assert!(!g.allow(1, 2, t0));
    }

    #[test]
    fn purge_drops_only_expired() {
        let t0 = Instant::now();
        let g = AlertGate::new(CooldownPolicy::For(FIVE_MIN));
        g.mark_sent(1, 1, t0);
        g.mark_sent(1, 2, t0 + Duration::from_secs(200));
        assert!(g.allow(1, 3, t0)); // pending stays
        assert_eq!(g.purge_expired(t0 + FIVE_MIN), 1);
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn reservation_commit_starts_cooldown() {
        let t0 = Instant::now();
        let g = AlertGate::new(CooldownPolicy::For(FIVE_MIN));
        let slot = g.reserve(1, 2, t0).unwrap();
        assert_eq!(slot.key(), CooldownKey::new(1, 2));
        assert!(g.reserve(1, 2, t0).is_none());
        slot.commit(t0);
        assert!(g.reserve(1, 2, t0 + Duration::from_secs(10)).is_none());
        assert!(g.reserve(1, 2, t0 + FIVE_MIN).is_some());
    }

    #[test]
    fn dropped_reservation_frees_the_slot() {
        let t0 = Instant::now();
        let g = AlertGate::new(CooldownPolicy::For(FIVE_MIN));
        drop(g.reserve(1, 2, t0).unwrap());
        assert!(g.is_empty());
        assert!(g.allow(1, 2, t0));
    }

    #[test]
    fn reservation_released_when_holder_panics() {
        let t0 = Instant::now();
        let g = AlertGate::new(CooldownPolicy::For(FIVE_MIN));
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _slot = g.reserve(3, 4, t0).unwrap();
            panic!("notifier blew up");
        }));
        assert!(res.is_err());
        // slot wrócił, kolejna wiadomość może ponowić alert
        assert!(g.reserve(3, 4, t0).is_some());
    }

    #[test]
    fn concurrent_allow_has_single_winner() {
        let t0 = Instant::now();
        let g = std::sync::Arc::new(AlertGate::new(CooldownPolicy::For(FIVE_MIN)));
        let wins: usize = (0..16)
            .map(|_| {
                let g = g.clone();
                std::thread::spawn(move || g.allow(5, 5, t0))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }
}
