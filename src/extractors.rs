use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::policy;
use crate::auth::request::{self, NOT_PROVIDED};
use crate::auth::TokenType;
use crate::db::models::User;
use crate::error::AppError;
use crate::state::AppState;

/// The user behind a valid `Authorization: Bearer` access token.
/// Rejects with 401 otherwise.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.0.id
    }

    /// Admin role, staff or superuser.
    pub fn is_privileged(&self) -> bool {
        policy::is_privileged(&self.0)
    }

    pub fn is_staff(&self) -> bool {
        self.0.is_staff || self.0.is_superuser
    }

    /// Owner of a record, or privileged.
    pub fn can_modify(&self, owner_id: &str) -> bool {
        self.0.id == owner_id || self.is_privileged()
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = request::bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized(NOT_PROVIDED.to_string()))?;

        let conn = state.db.get().map_err(|e| {
            tracing::error!("no database connection for authentication: {}", e);
            AppError::Unauthorized(request::USER_NOT_FOUND.to_string())
        })?;
        request::authenticate_token(&conn, &state.tokens, token, TokenType::Access).map(CurrentUser)
    }
}

/// Optional user extractor: `None` when no Authorization header is sent.
/// A header carrying a bad token still rejects with 401.
pub struct MaybeUser(pub Option<CurrentUser>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if request::bearer_token(&parts.headers).is_none() {
            return Ok(MaybeUser(None));
        }
        CurrentUser::from_request_parts(parts, state)
            .await
            .map(|user| MaybeUser(Some(user)))
    }
}

/// JSON body extractor whose rejections go through `AppError`, so a
/// malformed or incomplete body is a 400 like any other validation failure.
/// Also usable as a response body.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json<T>(pub T);

impl<T, S> FromRequest<S> for Json<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(Json(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    match rejection {
        JsonRejection::JsonDataError(e) => {
            let text = e.body_text();
            match missing_field(&text) {
                Some(name) => AppError::field(name, "This field is required."),
                None => AppError::field("non_field_errors", text),
            }
        }
        other => AppError::BadRequest(other.body_text()),
    }
}

/// Field name out of serde's "missing field `name`" message.
fn missing_field(message: &str) -> Option<&str> {
    let rest = message.split_once("missing field `")?.1;
    rest.split_once('`').map(|(name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[derive(Debug, serde::Deserialize)]
    struct Login {
        #[allow(dead_code)]
        email: String,
        #[allow(dead_code)]
        password: String,
    }

    async fn extract(body: &'static str, content_type: &str) -> Result<Json<Login>, AppError> {
        let req = axum::http::Request::builder()
            .method("POST")
            .header("content-type", content_type)
            .body(Body::from(body))
            .unwrap();
        Json::<Login>::from_request(req, &()).await
    }

    #[test]
    fn missing_field_name_is_extracted() {
        let msg = "Failed to deserialize the JSON body into the target type: missing field `password` at line 1 column 19";
        assert_eq!(missing_field(msg), Some("password"));
        assert_eq!(missing_field("invalid type: string"), None);
    }

    #[tokio::test]
    async fn missing_field_is_a_field_error() {
        match extract(r#"{"email":"a@x.com"}"#, "application/json").await {
            Err(AppError::Validation(errors)) => {
                assert_eq!(errors["password"], vec!["This field is required.".to_string()]);
            }
            other => panic!("expected a validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn syntax_and_content_type_errors_are_bad_requests() {
        assert!(matches!(
            extract("{not json", "application/json").await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            extract(r#"{"email":"a","password":"b"}"#, "text/plain").await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn well_formed_body_extracts() {
        assert!(extract(r#"{"email":"a@x.com","password":"pw"}"#, "application/json")
            .await
            .is_ok());
    }
}
