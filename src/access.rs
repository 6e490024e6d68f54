use crate::{
    auth::Viewer,
    error::{AppError, AppResult},
    models::Listing,
    repository::user_store::fetch_admin_flag,
    state::AppState,
};

pub fn require_admin(viewer: &Viewer) -> AppResult<()> {
    if viewer.is_admin {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Forbidden: administrator access required.".to_string(),
    ))
}

pub fn require_owner_or_admin(viewer: &Viewer, listing: &Listing) -> AppResult<()> {
    if viewer.is_admin || listing.is_owned_by(&viewer.id) {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Forbidden: you can only change your own listings.".to_string(),
    ))
}

/// Unapproved listings exist only for their owner and admins; everyone else
/// gets the same answer as for a missing id.
pub fn ensure_visible(viewer: Option<&Viewer>, listing: &Listing) -> AppResult<()> {
    if listing.approved {
        return Ok(());
    }
    match viewer {
        Some(viewer) if viewer.is_admin || listing.is_owned_by(&viewer.id) => Ok(()),
        _ => Err(AppError::NotFound("Listing not found.".to_string())),
    }
}

/// The directory's `is_admin` wins over the token claim so that role changes
/// apply before tokens are reissued. Falls back to the claim when the store
/// is absent, unreachable, or has no row for the user.
pub async fn resolve_admin_flag(state: &AppState, user_id: &str, claimed: bool) -> bool {
    let Some(pool) = state.db_pool.as_ref() else {
        return claimed;
    };
    if uuid::Uuid::parse_str(user_id).is_err() {
        return claimed;
    }

    if let Some(cached) = state.admin_flags.get(user_id).await {
        return cached;
    }

    match fetch_admin_flag(pool, user_id).await {
        Ok(Some(flag)) => {
            state.admin_flags.insert(user_id.to_string(), flag).await;
            flag
        }
        Ok(None) => claimed,
        Err(error) => {
            tracing::warn!(user_id, error = %error, "Admin flag lookup failed, using token claim");
            claimed
        }
    }
}

pub async fn forget_admin_flag(state: &AppState, user_id: &str) {
    state.admin_flags.invalidate(user_id).await;
}
