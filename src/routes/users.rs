use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    access::{forget_admin_flag, require_admin},
    auth::{require_identity, require_viewer, Claims},
    error::{AppError, AppResult},
    repository::user_store::{get_user, list_users, set_admin_flag, upsert_user},
    schemas::{parse_json_body, parse_uuid, UpdateRoleInput, UserPath, UsersQuery},
    state::AppState,
};

const DEFAULT_USERS_PAGE: i64 = 20;
const MAX_USERS_PAGE: i64 = 100;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/user/me", axum::routing::get(me))
        .route("/user/list", axum::routing::get(list_directory))
        .route("/user/role/{id}", axum::routing::post(update_role))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let identity = require_identity(&state, &headers).await?;
    let user_id = parse_uuid(&identity.viewer.id, "user id")?;
    let pool = db_pool(&state)?;

    let profile = match identity.claims.as_ref().and_then(directory_fields) {
        Some((username, email, avatar)) => {
            upsert_user(pool, user_id, username, email, avatar).await?
        }
        None => get_user(pool, user_id).await?,
    };

    Ok(Json(json!({
        "success": true,
        "user": profile,
        "isAdmin": identity.viewer.is_admin,
    })))
}

/// Username and email are both needed to create a directory row; the
/// username falls back to the local part of the email.
fn directory_fields(claims: &Claims) -> Option<(&str, &str, Option<&str>)> {
    let email = claims
        .email
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())?;
    let username = claims
        .username
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| email.split('@').next().filter(|local| !local.is_empty()))?;
    let avatar = claims
        .avatar
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    Some((username, email, avatar))
}

async fn list_directory(
    State(state): State<AppState>,
    Query(query): Query<UsersQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let viewer = require_viewer(&state, &headers).await?;
    require_admin(&viewer)?;
    let pool = db_pool(&state)?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_USERS_PAGE)
        .clamp(1, MAX_USERS_PAGE);
    let offset = query.start_index.unwrap_or(0).max(0);
    let (users, total) = list_users(pool, limit, offset).await?;

    Ok(Json(json!({
        "success": true,
        "users": users,
        "total": total,
        "limit": limit,
        "startIndex": offset,
    })))
}

async fn update_role(
    State(state): State<AppState>,
    Path(path): Path<UserPath>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let viewer = require_viewer(&state, &headers).await?;
    require_admin(&viewer)?;
    let payload: UpdateRoleInput = parse_json_body(&body)?;
    let target = parse_uuid(&path.id, "user id")?;
    if !payload.is_admin && Uuid::parse_str(&viewer.id).ok() == Some(target) {
        return Err(AppError::BadRequest(
            "You cannot remove your own administrator access.".to_string(),
        ));
    }
    let pool = db_pool(&state)?;

    let updated = set_admin_flag(pool, target, payload.is_admin).await?;
    forget_admin_flag(&state, &target.to_string()).await;
    tracing::info!(
        admin_id = %viewer.id,
        user_id = %target,
        is_admin = payload.is_admin,
        "User role changed"
    );

    Ok(Json(json!({ "success": true, "user": updated })))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}
