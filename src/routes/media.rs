use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::storage::{Bucket, StorageError};

pub fn router() -> Router<AppState> {
    Router::new().route("/media/{bucket}/{*key}", get(serve))
}

/// Public objects (avatars, post images). Resource files are not served here.
async fn serve(State(state): State<AppState>, Path((bucket, key)): Path<(String, String)>) -> Response {
    let Some(bucket) = Bucket::ALL
        .into_iter()
        .find(|b| b.is_public() && b.as_str() == bucket)
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match state.storage.get(bucket, &key).await {
        Ok(data) => {
            let mime = mime_guess::from_path(&key).first_or_octet_stream();
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, mime.as_ref().to_string()),
                    (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
                ],
                data,
            )
                .into_response()
        }
        Err(StorageError::NotFound(_)) | Err(StorageError::InvalidKey(_)) => {
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => {
            tracing::error!("media read failed for {}/{}: {}", bucket.as_str(), key, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
