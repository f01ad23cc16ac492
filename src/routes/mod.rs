pub mod accounts;
pub mod health;
pub mod interactions;
pub mod media;
pub mod posts;
pub mod resources;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::state::AppState;
use crate::storage::upload::{MAX_IMAGES_PER_POST, MAX_UPLOAD_BYTES};

/// A full batch of post images plus form overhead.
const MAX_BODY_BYTES: usize = (MAX_IMAGES_PER_POST + 2) * MAX_UPLOAD_BYTES;

/// The complete application: API routes, public media and middleware.
pub fn app(state: AppState) -> Router {
    let router = Router::new()
        .merge(health::router())
        .merge(accounts::router())
        .merge(posts::router())
        .merge(interactions::router())
        .merge(resources::router())
        .merge(media::router());

    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    router.layer(middleware).with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
}
