use std::time::Duration;

use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let db_ok = match &state.db_pool {
        Some(pool) => {
            match tokio::time::timeout(PROBE_TIMEOUT, sqlx::query("SELECT 1").fetch_one(pool)).await
            {
                Ok(Ok(_)) => true,
                Ok(Err(error)) => {
                    tracing::error!(error = %error, "Health check query failed");
                    false
                }
                Err(_) => {
                    tracing::error!("Health check query timed out");
                    false
                }
            }
        }
        // Nothing to probe.
        None => true,
    };

    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "now": Utc::now().to_rfc3339(),
        "db": db_ok,
    }))
}
