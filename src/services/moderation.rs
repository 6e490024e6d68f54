use chrono::{DateTime, Utc};

use crate::{access::require_admin, auth::Viewer, error::AppResult, models::Listing};

pub const DEFAULT_REJECTION_REASON: &str = "Listing rejected by administrator.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationState {
    Pending,
    Approved,
}

impl ModerationState {
    pub fn of(listing: &Listing) -> Self {
        if listing.approved {
            Self::Approved
        } else {
            Self::Pending
        }
    }
}

/// The four moderation columns, written together so that an approved
/// listing never carries a rejection reason.
#[derive(Debug, Clone, PartialEq)]
pub struct ModerationPatch {
    pub approved: bool,
    pub rejection_reason: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
}

impl ModerationPatch {
    pub fn approve(actor: &Viewer, now: DateTime<Utc>) -> AppResult<Self> {
        require_admin(actor)?;
        Ok(Self::approved_by(&actor.id, now))
    }

    pub fn reject(actor: &Viewer, reason: Option<&str>) -> AppResult<Self> {
        require_admin(actor)?;
        let reason = reason
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_REJECTION_REASON)
            .to_string();
        Ok(Self {
            approved: false,
            rejection_reason: Some(reason),
            approved_at: None,
            approved_by: None,
        })
    }

    /// Starting state for a new listing: admins publish directly.
    pub fn on_create(creator: &Viewer, now: DateTime<Utc>) -> Self {
        if creator.is_admin {
            Self::approved_by(&creator.id, now)
        } else {
            Self::pending()
        }
    }

    /// Effect of the `approved` field on a listing edit. Only an admin moves
    /// it: `true` approves, `false` withdraws an approved listing and leaves
    /// a pending one (and its rejection reason) alone. Anyone else's value is
    /// ignored.
    pub fn for_update(
        actor: &Viewer,
        requested: Option<bool>,
        current: &Listing,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if !actor.is_admin {
            return None;
        }
        match (requested?, ModerationState::of(current)) {
            (true, _) => Some(Self::approved_by(&actor.id, now)),
            (false, ModerationState::Approved) => Some(Self::pending()),
            (false, ModerationState::Pending) => None,
        }
    }

    fn approved_by(admin_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            approved: true,
            rejection_reason: None,
            approved_at: Some(now),
            approved_by: Some(admin_id.to_string()),
        }
    }

    fn pending() -> Self {
        Self {
            approved: false,
            rejection_reason: None,
            approved_at: None,
            approved_by: None,
        }
    }

    pub fn apply(&self, listing: &mut Listing) {
        listing.approved = self.approved;
        listing.rejection_reason = self.rejection_reason.clone();
        listing.approved_at = self.approved_at;
        listing.approved_by = self.approved_by.clone();
    }
}
