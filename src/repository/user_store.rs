use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    error::{map_db_error, AppError, AppResult},
    models::UserProfile,
};

const RETURN_USER: &str = "json_build_object(
    'id', users.id, 'username', users.username, 'email', users.email,
    'avatar', users.avatar, 'is_admin', users.is_admin, 'created_at', users.created_at
) AS row";

const SELECT_USER: &str =
    "SELECT row_to_json(t) AS row FROM (SELECT id, username, email, avatar, is_admin, created_at FROM users) t";

pub async fn get_user(pool: &PgPool, user_id: Uuid) -> AppResult<UserProfile> {
    let row = sqlx::query(&format!("{SELECT_USER} WHERE t.id = $1"))
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| AppError::NotFound("User not found.".to_string()))?;
    decode_user(row.try_get("row").map_err(map_db_error)?)
}

/// Keeps the directory row in step with token claims. The admin flag is
/// never taken from the caller here; it changes only through `set_admin_flag`.
pub async fn upsert_user(
    pool: &PgPool,
    user_id: Uuid,
    username: &str,
    email: &str,
    avatar: Option<&str>,
) -> AppResult<UserProfile> {
    let row = sqlx::query(&format!(
        "INSERT INTO users (id, username, email, avatar)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (id) DO UPDATE
         SET username = EXCLUDED.username,
             email = EXCLUDED.email,
             avatar = COALESCE(EXCLUDED.avatar, users.avatar),
             updated_at = now()
         RETURNING {RETURN_USER}"
    ))
    .bind(user_id)
    .bind(username)
    .bind(email)
    .bind(avatar)
    .fetch_one(pool)
    .await
    .map_err(map_db_error)?;
    decode_user(row.try_get("row").map_err(map_db_error)?)
}

pub async fn list_users(pool: &PgPool, limit: i64, offset: i64) -> AppResult<(Vec<UserProfile>, i64)> {
    let (rows, total) = tokio::try_join!(
        async {
            sqlx::query(&format!(
                "{SELECT_USER} ORDER BY t.created_at DESC, t.id ASC LIMIT $1 OFFSET $2"
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
            .map_err(map_db_error)
        },
        async {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*)::bigint FROM users")
                .fetch_one(pool)
                .await
                .map_err(map_db_error)
        }
    )?;

    let users = rows
        .into_iter()
        .map(|row| decode_user(row.try_get("row").map_err(map_db_error)?))
        .collect::<AppResult<Vec<_>>>()?;
    Ok((users, total))
}

pub async fn set_admin_flag(pool: &PgPool, user_id: Uuid, is_admin: bool) -> AppResult<UserProfile> {
    let row = sqlx::query(&format!(
        "UPDATE users SET is_admin = $2, updated_at = now()
         WHERE id = $1
         RETURNING {RETURN_USER}"
    ))
    .bind(user_id)
    .bind(is_admin)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?
    .ok_or_else(|| AppError::NotFound("User not found.".to_string()))?;
    decode_user(row.try_get("row").map_err(map_db_error)?)
}

pub async fn fetch_admin_flag(pool: &PgPool, user_id: &str) -> AppResult<Option<bool>> {
    let user_id = Uuid::parse_str(user_id)
        .map_err(|_| AppError::BadRequest("Invalid user id format.".to_string()))?;
    sqlx::query_scalar::<_, bool>("SELECT is_admin FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)
}

fn decode_user(value: Value) -> AppResult<UserProfile> {
    serde_json::from_value(value)
        .map_err(|error| AppError::Internal(format!("Could not decode user row: {error}")))
}
