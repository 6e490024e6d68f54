use chrono::{DateTime, Utc};

use crate::models::{Listing, Reaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    Like,
    Save,
}

impl ReactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Save => "save",
        }
    }

    fn parts(self, listing: &mut Listing) -> (&mut Vec<Reaction>, &mut i32) {
        match self {
            Self::Like => (&mut listing.liked_by, &mut listing.likes),
            Self::Save => (&mut listing.saved_by, &mut listing.saves),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOutcome {
    /// Whether the caller is in the set after the toggle.
    pub active: bool,
    pub count: i32,
}

/// Flip the caller's membership in the liked/saved set. The counter is
/// always re-derived from the set length.
pub fn toggle_reaction(
    listing: &mut Listing,
    kind: ReactionKind,
    user_id: &str,
    now: DateTime<Utc>,
) -> ToggleOutcome {
    let (entries, counter) = kind.parts(listing);

    let active = match entries.iter().position(|entry| entry.user_id == user_id) {
        Some(index) => {
            entries.remove(index);
            false
        }
        None => {
            entries.push(Reaction {
                user_id: user_id.to_string(),
                timestamp: now,
            });
            true
        }
    };

    *counter = i32::try_from(entries.len()).unwrap_or(i32::MAX);
    ToggleOutcome {
        active,
        count: *counter,
    }
}

#[cfg(test)]
mod tests {
    use super::{toggle_reaction, ReactionKind};
    use crate::models::fixtures::{at, listing};

    #[test]
    fn like_twice_returns_to_original_state() {
        let mut item = listing("owner");
        let now = at(2026, 6, 1, 10, 0);

        let liked = toggle_reaction(&mut item, ReactionKind::Like, "u2", now);
        assert!(liked.active);
        assert_eq!(liked.count, 1);
        assert!(item.is_liked_by("u2"));

        let unliked = toggle_reaction(&mut item, ReactionKind::Like, "u2", now);
        assert!(!unliked.active);
        assert_eq!(unliked.count, 0);
        assert!(!item.is_liked_by("u2"));
        assert!(item.counters_consistent());
    }

    #[test]
    fn save_is_independent_of_like() {
        let mut item = listing("owner");
        let now = at(2026, 6, 1, 10, 0);
        toggle_reaction(&mut item, ReactionKind::Like, "u2", now);
        let saved = toggle_reaction(&mut item, ReactionKind::Save, "u2", now);
        assert!(saved.active);
        assert_eq!((item.likes, item.saves), (1, 1));
    }

    #[test]
    fn counter_is_rederived_from_set() {
        let mut item = listing("owner");
        let now = at(2026, 6, 1, 10, 0);
        toggle_reaction(&mut item, ReactionKind::Save, "u1", now);
        toggle_reaction(&mut item, ReactionKind::Save, "u2", now);
        // A drifted counter heals on the next toggle.
        item.saves = 17;
        let outcome = toggle_reaction(&mut item, ReactionKind::Save, "u1", now);
        assert_eq!(outcome.count, 1);
        assert_eq!(item.saves, 1);
        assert!(item.counters_consistent());
    }

    #[test]
    fn set_never_holds_duplicates() {
        let mut item = listing("owner");
        let now = at(2026, 6, 1, 10, 0);
        for _ in 0..5 {
            toggle_reaction(&mut item, ReactionKind::Like, "u3", now);
        }
        assert_eq!(item.liked_by.len(), 1);
        assert_eq!(item.likes, 1);
    }
}
