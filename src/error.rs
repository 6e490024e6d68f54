use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    UnprocessableEntity(String),
    #[error("{0}")]
    Dependency(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Dependency(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Internal(detail) => {
                tracing::error!(detail = %detail, "Internal error");
                "Internal server error.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "success": false,
            "statusCode": status.as_u16(),
            "message": self.public_message(),
        });
        (status, Json(body)).into_response()
    }
}

/// Translate a store failure into the caller-facing taxonomy. Constraint
/// violations name the offending field; anything unexpected is logged and
/// reported generically.
pub fn map_db_error(error: sqlx::Error) -> AppError {
    match &error {
        sqlx::Error::RowNotFound => AppError::NotFound("Record not found.".to_string()),
        sqlx::Error::Database(db_error) => {
            let field = db_error
                .constraint()
                .map(constraint_field)
                .unwrap_or_else(|| "value".to_string());
            match db_error.code().as_deref() {
                Some("23505") => AppError::Conflict(format!("A record with this {field} already exists.")),
                Some("23514") => AppError::BadRequest(format!("Invalid value for {field}.")),
                Some("23502") => AppError::BadRequest(format!("Missing required field {field}.")),
                Some("22P02") => AppError::BadRequest("Invalid identifier format.".to_string()),
                _ => {
                    tracing::error!(db_error = %error, "Database operation failed");
                    AppError::Dependency("Database operation failed.".to_string())
                }
            }
        }
        _ => {
            tracing::error!(db_error = %error, "Database operation failed");
            AppError::Dependency("Database operation failed.".to_string())
        }
    }
}

/// `listings_regular_price_check` -> `regular_price`, `users_email_key` -> `email`.
fn constraint_field(constraint: &str) -> String {
    let trimmed = constraint
        .trim_end_matches("_check")
        .trim_end_matches("_key")
        .trim_end_matches("_fkey");
    trimmed
        .split_once('_')
        .map(|(_, rest)| rest.to_string())
        .filter(|rest| !rest.is_empty())
        .unwrap_or_else(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::{constraint_field, AppError};
    use axum::{http::StatusCode, response::IntoResponse};

    #[test]
    fn constraint_names_map_to_fields() {
        assert_eq!(constraint_field("listings_regular_price_check"), "regular_price");
        assert_eq!(constraint_field("users_email_key"), "email");
        assert_eq!(constraint_field("listings_user_ref_fkey"), "user_ref");
    }

    #[tokio::test]
    async fn internal_errors_do_not_leak_detail() {
        let response = AppError::Internal("pool exploded at 0xdead".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["success"], false);
        assert_eq!(body["statusCode"], 500);
        assert_eq!(body["message"], "Internal server error.");
    }

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(
            AppError::Forbidden(String::new()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::Dependency(String::new()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::UnprocessableEntity(String::new()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
