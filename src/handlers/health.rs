use axum::{extract::State, response::IntoResponse, Extension};
use serde_json::json;

use crate::error::ApiError;
use crate::handlers::success;
use crate::middleware::auth::AuthedMerchant;
use crate::AppState;

/// Authenticated liveness: proves the signed-request pipeline and the
/// store both answer.
pub async fn health(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedMerchant>,
) -> Result<impl IntoResponse, ApiError> {
    sqlx::query("SELECT 1").execute(&state.db).await?;

    Ok(success(json!({
        "status": "ok",
        "env": auth.env.as_str(),
    })))
}
