use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::google::{self, GoogleUser, VerifyError};
use crate::auth::login::{self, LoginRequest, LoginResponse};
use crate::auth::request::{self, INVALID_TOKEN};
use crate::auth::{policy, TokenType};
use crate::db::accounts::{self, CredentialChanges, NewUser, UserPatch};
use crate::db::models::{AuthProvider, Credential, Role, User};
use crate::db::new_id;
use crate::error::{AppError, AppResult, FieldErrors};
use crate::extractors::{CurrentUser, Json};
use crate::mail::{self, ContactMessage};
use crate::state::AppState;
use crate::storage::upload::{self, MultipartForm};
use crate::storage::Bucket;

const EMAIL_TAKEN: &str = "user with this email already exists.";
const CREDENTIAL_EXISTS: &str = "credential with this user already exists.";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/accounts/login/", post(login))
        .route("/api/accounts/google/", post(google_login))
        .route("/api/accounts/token/refresh/", post(refresh_token))
        .route("/api/accounts/me/", get(me))
        .route("/api/accounts/users/", get(list_users).post(signup))
        .route(
            "/api/accounts/users/{id}/",
            get(get_user).patch(patch_user).delete(delete_user),
        )
        .route("/api/accounts/users/{id}/avatar/", post(upload_avatar))
        .route(
            "/api/accounts/credentials/",
            get(list_credentials).post(create_credential),
        )
        .route(
            "/api/accounts/credentials/{id}/",
            get(get_credential)
                .patch(patch_credential)
                .delete(delete_credential),
        )
        .route(
            "/api/accounts/credentials/{id}/verify/",
            get(verify_credential).patch(verify_credential),
        )
        .route("/api/accounts/contact/", post(contact))
}

// -- Representations --

/// Credential as returned by the API. The password never leaves the server.
#[derive(Debug, Serialize)]
pub struct CredentialView {
    pub id: String,
    pub user: String,
    pub auth_provider: AuthProvider,
    pub is_verified: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Credential> for CredentialView {
    fn from(c: Credential) -> Self {
        Self {
            id: c.id,
            user: c.user_id,
            auth_provider: c.auth_provider,
            is_verified: c.is_verified,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserView {
    #[serde(flatten)]
    pub user: User,
    pub credential: Option<CredentialView>,
}

fn user_view(conn: &Connection, user: User) -> AppResult<UserView> {
    let credential = accounts::credential_for_user(conn, &user.id)?.map(CredentialView::from);
    Ok(UserView { user, credential })
}

fn load_user(conn: &Connection, id: &str) -> AppResult<User> {
    accounts::find_user_by_id(conn, id)?.ok_or(AppError::NotFound)
}

// -- Authentication --

/// POST /api/accounts/login/
async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> AppResult<Response> {
    let db = state.db.clone();
    let tokens = state.tokens.clone();
    // bcrypt runs on the blocking pool
    let response = tokio::task::spawn_blocking(move || -> AppResult<LoginResponse> {
        let conn = db.get()?;
        login::authenticate(&conn, &tokens, &req.email, &req.password)
    })
    .await??;
    Ok(Json(response).into_response())
}

#[derive(Deserialize)]
struct GoogleLoginRequest {
    #[serde(default)]
    token: Option<String>,
}

/// POST /api/accounts/google/
async fn google_login(
    State(state): State<AppState>,
    Json(req): Json<GoogleLoginRequest>,
) -> AppResult<Response> {
    let token = req
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Token is required.".to_string()))?;

    let identity = state.identity.verify(&token).await.map_err(|e| match e {
        VerifyError::Invalid(detail) => AppError::OAuth(detail),
        other => AppError::Internal(other.to_string()),
    })?;

    let mut conn = state.db.get()?;
    let user = google::establish_account(&mut conn, &identity)?;
    let pair = state
        .tokens
        .issue_pair(&user)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    tracing::info!(user_id = %user.id, "Google sign-in succeeded");

    Ok(Json(json!({
        "access": pair.access,
        "refresh": pair.refresh,
        "user": GoogleUser {
            first_name: user.first_name,
            last_name: user.last_name,
            img_url: user.img_url,
        },
    }))
    .into_response())
}

#[derive(Deserialize)]
struct RefreshRequest {
    #[serde(default)]
    refresh: String,
}

/// POST /api/accounts/token/refresh/
async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> AppResult<Response> {
    let claims = state
        .tokens
        .verify(&req.refresh, TokenType::Refresh)
        .map_err(|_| AppError::Unauthorized(INVALID_TOKEN.to_string()))?;

    let conn = state.db.get()?;
    let user = request::resolve_claims(&conn, &claims)?;
    let access = state
        .tokens
        .issue(&user, TokenType::Access)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(json!({ "access": access })).into_response())
}

/// GET /api/accounts/me/
async fn me(State(state): State<AppState>, current: CurrentUser) -> AppResult<Json<UserView>> {
    let conn = state.db.get()?;
    Ok(Json(user_view(&conn, current.0)?))
}

// -- Users --

async fn list_users(
    State(state): State<AppState>,
    current: CurrentUser,
) -> AppResult<Json<Vec<UserView>>> {
    let conn = state.db.get()?;
    let users = if current.is_privileged() {
        accounts::list_users(&conn)?
    } else {
        vec![current.0]
    };
    let views = users
        .into_iter()
        .map(|u| user_view(&conn, u))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(Json(views))
}

#[derive(Debug, Deserialize)]
pub struct SignupCredential {
    pub auth_provider: Option<AuthProvider>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub role: Option<Role>,
    pub credential: Option<SignupCredential>,
}

fn valid_email(email: &str) -> bool {
    match email.trim().split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

fn validate_signup(req: &SignupRequest) -> AppResult<()> {
    let mut errors = FieldErrors::new();
    if req.email.trim().is_empty() {
        errors.insert("email".into(), vec!["This field may not be blank.".into()]);
    } else if !valid_email(&req.email) {
        errors.insert("email".into(), vec!["Enter a valid email address.".into()]);
    }
    if req.role.is_some_and(|r| r != Role::Author) {
        errors.insert("role".into(), vec!["New accounts are created as authors.".into()]);
    }
    if let Some(credential) = &req.credential {
        let provider = credential.auth_provider.unwrap_or(AuthProvider::Email);
        let blank = credential.password.as_deref().map_or(true, |p| p.is_empty());
        if provider == AuthProvider::Email && blank {
            errors.insert(
                "credential".into(),
                vec!["A password is required for email accounts.".into()],
            );
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}

/// POST /api/accounts/users/
///
/// Creates the user and, when given, its credential in one transaction.
async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> AppResult<Response> {
    validate_signup(&req)?;

    let db = state.db.clone();
    let (view, unverified) = tokio::task::spawn_blocking(move || -> AppResult<_> {
        let mut conn = db.get()?;
        let tx = conn.transaction()?;
        let user = accounts::insert_user(
            &tx,
            &NewUser {
                email: req.email.clone(),
                first_name: req.first_name.clone(),
                last_name: req.last_name.clone(),
                role: Role::Author,
                img_url: None,
            },
        )
        .map_err(|e| AppError::unique(e, "email", EMAIL_TAKEN))?;

        if let Some(credential) = &req.credential {
            accounts::upsert_credential(
                &tx,
                &user.id,
                &CredentialChanges {
                    auth_provider: credential.auth_provider,
                    password: credential.password.clone(),
                    is_verified: Some(false),
                },
            )?;
        }
        tx.commit()?;

        let view = user_view(&conn, user)?;
        let unverified = view
            .credential
            .as_ref()
            .filter(|c| c.auth_provider == AuthProvider::Email && !c.is_verified)
            .map(|c| c.id.clone());
        Ok((view, unverified))
    })
    .await??;

    tracing::info!(user_id = %view.user.id, "account created");

    if let Some(credential_id) = unverified {
        match mail::verification_link(&state.config.server.public_url, &credential_id) {
            Ok(link) => {
                let email = mail::verification_email(&view.user, &link);
                if let Err(e) = state.mailer.send(&email).await {
                    tracing::warn!(user_id = %view.user.id, "verification email not sent: {}", e);
                }
            }
            Err(e) => tracing::warn!("bad server.public_url, no verification email: {}", e),
        }
    }

    Ok((StatusCode::CREATED, Json(view)).into_response())
}

async fn get_user(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<UserView>> {
    if !policy::can_manage(&current.0, &id) {
        return Err(AppError::Forbidden(
            "You do not have permission to view this user.".to_string(),
        ));
    }
    let conn = state.db.get()?;
    let user = load_user(&conn, &id)?;
    Ok(Json(user_view(&conn, user)?))
}

/// PATCH /api/accounts/users/{id}/
async fn patch_user(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(patch): Json<UserPatch>,
) -> AppResult<Json<UserView>> {
    policy::check_patch(&current.0, &id, &patch.fields())?;
    if patch.email.as_deref().is_some_and(|e| !valid_email(e)) {
        return Err(AppError::field("email", "Enter a valid email address."));
    }

    let db = state.db.clone();
    let view = tokio::task::spawn_blocking(move || -> AppResult<UserView> {
        let mut conn = db.get()?;
        let tx = conn.transaction()?;
        let user = accounts::update_user(&tx, &id, &patch)
            .map_err(|e| AppError::unique(e, "email", EMAIL_TAKEN))?
            .ok_or(AppError::NotFound)?;
        if let Some(credential) = &patch.credential {
            accounts::upsert_credential(
                &tx,
                &user.id,
                &CredentialChanges {
                    auth_provider: credential.auth_provider,
                    password: credential.password.clone(),
                    is_verified: None,
                },
            )?;
        }
        tx.commit()?;
        user_view(&conn, user)
    })
    .await??;

    tracing::info!(user_id = %view.user.id, actor = %current.id(), "user updated");
    Ok(Json(view))
}

async fn delete_user(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    if !policy::can_manage(&current.0, &id) {
        return Err(AppError::Forbidden(
            "You do not have permission to delete this user.".to_string(),
        ));
    }
    let conn = state.db.get()?;
    if !accounts::delete_user(&conn, &id)? {
        return Err(AppError::NotFound);
    }
    tracing::info!(user_id = %id, actor = %current.id(), "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/accounts/users/{id}/avatar/
async fn upload_avatar(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
    multipart: Multipart,
) -> AppResult<Json<UserView>> {
    if !policy::can_manage(&current.0, &id) {
        return Err(AppError::Forbidden(
            "You do not have permission to modify this user.".to_string(),
        ));
    }
    let previous = {
        let conn = state.db.get()?;
        load_user(&conn, &id)?.img_url
    };

    let mut form = MultipartForm::read(multipart).await?;
    let file = form
        .take_file("avatar")
        .ok_or_else(|| AppError::field("avatar", "No file was submitted."))?;
    upload::validate_avatar(&file)?;

    let ext = file.extension().unwrap_or_default();
    let key = format!("{}/{}.{}", id, new_id(), ext);
    state
        .storage
        .put(Bucket::Avatars, &key, file.data)
        .await?;
    let url = state.storage.public_url(Bucket::Avatars, &key);

    let conn = state.db.get()?;
    let user = accounts::set_avatar(&conn, &id, &url)?.ok_or(AppError::NotFound)?;

    // Drop the replaced object when it was one of ours
    let prefix = state.storage.public_url(Bucket::Avatars, "");
    if let Some(old_key) = previous.as_deref().and_then(|u| u.strip_prefix(&prefix)) {
        if let Err(e) = state.storage.delete(Bucket::Avatars, old_key).await {
            tracing::warn!("could not remove old avatar {}: {}", old_key, e);
        }
    }

    Ok(Json(user_view(&conn, user)?))
}

// -- Credentials --

fn load_credential_for(conn: &Connection, current: &CurrentUser, id: &str) -> AppResult<Credential> {
    let credential = accounts::find_credential(conn, id)?.ok_or(AppError::NotFound)?;
    if credential.user_id != current.id() && !current.is_staff() {
        return Err(AppError::Forbidden(
            "You do not have permission to access this credential.".to_string(),
        ));
    }
    Ok(credential)
}

async fn list_credentials(
    State(state): State<AppState>,
    current: CurrentUser,
) -> AppResult<Json<Vec<CredentialView>>> {
    if !current.is_staff() {
        return Err(AppError::Forbidden(
            "You do not have permission to perform this action.".to_string(),
        ));
    }
    let conn = state.db.get()?;
    let credentials = accounts::list_credentials(&conn)?;
    Ok(Json(credentials.into_iter().map(CredentialView::from).collect()))
}

#[derive(Debug, Deserialize)]
struct CreateCredentialRequest {
    user: String,
    auth_provider: Option<AuthProvider>,
    password: Option<String>,
    is_verified: Option<bool>,
}

async fn create_credential(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(req): Json<CreateCredentialRequest>,
) -> AppResult<Response> {
    if req.user != current.id() && !current.is_staff() {
        return Err(AppError::Forbidden(
            "You do not have permission to perform this action.".to_string(),
        ));
    }
    if req.is_verified.is_some() && !current.is_staff() {
        return Err(AppError::Forbidden(
            "You do not have permission to change: is_verified.".to_string(),
        ));
    }

    let db = state.db.clone();
    let credential = tokio::task::spawn_blocking(move || -> AppResult<Credential> {
        let conn = db.get()?;
        load_user(&conn, &req.user).map_err(|_| {
            AppError::field("user", format!("Invalid pk \"{}\" - object does not exist.", req.user))
        })?;
        if accounts::credential_for_user(&conn, &req.user)?.is_some() {
            return Err(AppError::field("user", CREDENTIAL_EXISTS));
        }
        Ok(accounts::upsert_credential(
            &conn,
            &req.user,
            &CredentialChanges {
                auth_provider: req.auth_provider,
                password: req.password,
                is_verified: req.is_verified,
            },
        )?)
    })
    .await??;

    Ok((StatusCode::CREATED, Json(CredentialView::from(credential))).into_response())
}

async fn get_credential(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<CredentialView>> {
    let conn = state.db.get()?;
    Ok(Json(load_credential_for(&conn, &current, &id)?.into()))
}

#[derive(Debug, Deserialize)]
struct CredentialUpdate {
    auth_provider: Option<AuthProvider>,
    password: Option<String>,
    is_verified: Option<bool>,
}

async fn patch_credential(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<CredentialUpdate>,
) -> AppResult<Json<CredentialView>> {
    if req.is_verified.is_some() && !current.is_staff() {
        return Err(AppError::Forbidden(
            "You do not have permission to change: is_verified.".to_string(),
        ));
    }

    let db = state.db.clone();
    let credential = tokio::task::spawn_blocking(move || -> AppResult<Credential> {
        let conn = db.get()?;
        let existing = load_credential_for(&conn, &current, &id)?;
        Ok(accounts::upsert_credential(
            &conn,
            &existing.user_id,
            &CredentialChanges {
                auth_provider: req.auth_provider,
                password: req.password,
                is_verified: req.is_verified,
            },
        )?)
    })
    .await??;

    Ok(Json(credential.into()))
}

async fn delete_credential(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let conn = state.db.get()?;
    let credential = load_credential_for(&conn, &current, &id)?;
    accounts::delete_credential(&conn, &credential.id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET|PATCH /api/accounts/credentials/{id}/verify/
///
/// Reached from the emailed link, so it needs no session.
async fn verify_credential(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let message = match accounts::mark_verified(&conn, &id)? {
        None => return Err(AppError::NotFound),
        Some(false) => "Account is already verified.",
        Some(true) => {
            tracing::info!(credential_id = %id, "account verified");
            "Account successfully verified."
        }
    };
    Ok(Json(json!({ "message": message })).into_response())
}

// -- Contact --

/// POST /api/accounts/contact/
async fn contact(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(req): Json<ContactMessage>,
) -> AppResult<Response> {
    let mut errors = FieldErrors::new();
    if req.subject.trim().is_empty() {
        errors.insert("subject".into(), vec!["This field may not be blank.".into()]);
    }
    if req.message.trim().is_empty() {
        errors.insert("message".into(), vec!["This field may not be blank.".into()]);
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let email = mail::contact_email(&current.0, &req, &state.config.mail.contact_email);
    state.mailer.send(&email).await?;
    Ok(Json(json!({ "message": "Message sent." })).into_response())
}
