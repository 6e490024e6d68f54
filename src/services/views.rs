use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::{
    config::AppConfig,
    models::{AnonymousView, Listing, UserView},
};

/// Who is looking at a listing, as far as view attribution cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visitor {
    Authenticated {
        user_id: String,
        ip: Option<String>,
        user_agent: Option<String>,
    },
    Anonymous {
        ip: Option<String>,
        user_agent: Option<String>,
        session_token: Option<String>,
    },
}

impl Visitor {
    /// Client-supplied token wins; otherwise `ip-userAgent`.
    pub fn anonymous_session_id(
        ip: Option<&str>,
        user_agent: Option<&str>,
        session_token: Option<&str>,
    ) -> String {
        if let Some(token) = session_token.map(str::trim).filter(|token| !token.is_empty()) {
            return token.to_string();
        }
        format!(
            "{}-{}",
            ip.map(str::trim).filter(|value| !value.is_empty()).unwrap_or("unknown"),
            user_agent
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or("unknown")
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ViewPolicy {
    pub day_timezone: Tz,
    pub anonymous_window: Duration,
    pub anonymous_retention: Duration,
}

impl ViewPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            day_timezone: config.view_day_timezone,
            anonymous_window: Duration::hours(config.anonymous_view_window_hours.max(1)),
            anonymous_retention: Duration::days(config.anonymous_view_retention_days.max(1)),
        }
    }
}

impl Default for ViewPolicy {
    fn default() -> Self {
        Self {
            day_timezone: Tz::UTC,
            anonymous_window: Duration::hours(24),
            anonymous_retention: Duration::days(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOutcome {
    Recorded,
    Duplicate,
    /// Admin-panel reads never count.
    Skipped,
}

impl ViewOutcome {
    pub fn recorded(self) -> bool {
        matches!(self, Self::Recorded)
    }
}

/// Decide whether this visit counts and, if so, bump `views` and append the
/// detail entry. The listing is left untouched unless `Recorded` is returned.
pub fn attribute_view(
    listing: &mut Listing,
    visitor: &Visitor,
    admin_panel: bool,
    policy: &ViewPolicy,
    now: DateTime<Utc>,
) -> ViewOutcome {
    if admin_panel {
        return ViewOutcome::Skipped;
    }

    match visitor {
        Visitor::Authenticated {
            user_id,
            ip,
            user_agent,
        } => {
            let today = now.with_timezone(&policy.day_timezone).date_naive();
            let seen_today = listing.viewed_by.iter().any(|entry| {
                entry.user_id == *user_id
                    && entry.timestamp.with_timezone(&policy.day_timezone).date_naive() == today
            });
            if seen_today {
                return ViewOutcome::Duplicate;
            }
            listing.viewed_by.push(UserView {
                user_id: user_id.clone(),
                timestamp: now,
                user_agent: user_agent.clone(),
                ip: ip.clone(),
            });
        }
        Visitor::Anonymous {
            ip,
            user_agent,
            session_token,
        } => {
            let session_id = Visitor::anonymous_session_id(
                ip.as_deref(),
                user_agent.as_deref(),
                session_token.as_deref(),
            );
            let recent = listing.anonymous_views.iter().any(|entry| {
                entry.session_id == session_id && now - entry.timestamp < policy.anonymous_window
            });
            if recent {
                return ViewOutcome::Duplicate;
            }
            let horizon = now - policy.anonymous_retention;
            listing
                .anonymous_views
                .retain(|entry| entry.timestamp >= horizon);
            listing.anonymous_views.push(AnonymousView {
                session_id,
                ip: ip.clone(),
                user_agent: user_agent.clone(),
                timestamp: now,
            });
        }
    }

    listing.views += 1;
    ViewOutcome::Recorded
}

/// The outcome `attribute_view` would reach, leaving `listing` as it is.
pub fn peek_view(
    listing: &Listing,
    visitor: &Visitor,
    admin_panel: bool,
    policy: &ViewPolicy,
    now: DateTime<Utc>,
) -> ViewOutcome {
    if admin_panel {
        return ViewOutcome::Skipped;
    }
    attribute_view(&mut listing.clone(), visitor, false, policy, now)
}
