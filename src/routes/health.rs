use axum::extract::State;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::extractors::{Json, MaybeUser};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(status))
        .route("/api/health/", get(status))
}

/// Liveness plus a database round trip. Echoes the caller when a token is sent.
async fn status(State(state): State<AppState>, maybe_user: MaybeUser) -> AppResult<Json<Value>> {
    let conn = state.db.get()?;
    let migrations: i64 =
        conn.query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))?;
    Ok(Json(json!({
        "status": "ok",
        "migrations": migrations,
        "user": maybe_user.0.map(|u| u.0.id),
    })))
}
