//! User and credential queries shared by the auth flows and the accounts routes.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;

use super::models::{AuthProvider, Credential, Role, User};
use super::new_id;
use crate::auth::password;

/// Fields for a new user row.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub img_url: Option<String>,
}

/// Trim and lower-case the domain part, keeping the local part as typed.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE email = ?1", User::COLUMNS),
        params![normalize_email(email)],
        User::from_row,
    )
    .optional()
}

pub fn find_user_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", User::COLUMNS),
        params![id],
        User::from_row,
    )
    .optional()
}

pub fn list_users(conn: &Connection) -> rusqlite::Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users ORDER BY created_at ASC, id ASC",
        User::COLUMNS
    ))?;
    let users = stmt
        .query_map([], User::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

pub fn insert_user(conn: &Connection, new: &NewUser) -> rusqlite::Result<User> {
    let id = new_id();
    conn.execute(
        "INSERT INTO users (id, email, first_name, last_name, role, img_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            normalize_email(&new.email),
            new.first_name,
            new.last_name,
            new.role,
            new.img_url
        ],
    )?;
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", User::COLUMNS),
        params![id],
        User::from_row,
    )
}

pub fn credential_for_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<Credential>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM credentials WHERE user_id = ?1",
            Credential::COLUMNS
        ),
        params![user_id],
        Credential::from_row,
    )
    .optional()
}

pub fn find_credential(conn: &Connection, id: &str) -> rusqlite::Result<Option<Credential>> {
    conn.query_row(
        &format!("SELECT {} FROM credentials WHERE id = ?1", Credential::COLUMNS),
        params![id],
        Credential::from_row,
    )
    .optional()
}

pub fn list_credentials(conn: &Connection) -> rusqlite::Result<Vec<Credential>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM credentials ORDER BY created_at ASC, id ASC",
        Credential::COLUMNS
    ))?;
    let credentials = stmt
        .query_map([], Credential::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(credentials)
}

/// Credential fields a user patch may carry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialPatch {
    pub auth_provider: Option<AuthProvider>,
    pub password: Option<String>,
}

/// Whitelisted user fields for a partial update. Anything else in the body
/// is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub img_url: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub is_staff: Option<bool>,
    pub credential: Option<CredentialPatch>,
}

impl UserPatch {
    /// Names of the fields present in this patch.
    pub fn fields(&self) -> Vec<&'static str> {
        let present = [
            ("first_name", self.first_name.is_some()),
            ("last_name", self.last_name.is_some()),
            ("email", self.email.is_some()),
            ("img_url", self.img_url.is_some()),
            ("role", self.role.is_some()),
            ("is_active", self.is_active.is_some()),
            ("is_staff", self.is_staff.is_some()),
            ("credential", self.credential.is_some()),
        ];
        present
            .into_iter()
            .filter(|(_, set)| *set)
            .map(|(name, _)| name)
            .collect()
    }
}

/// Apply the user columns of `patch`. An empty `img_url` clears the avatar.
/// The nested credential is written separately with [`upsert_credential`].
pub fn update_user(conn: &Connection, id: &str, patch: &UserPatch) -> rusqlite::Result<Option<User>> {
    let email = patch.email.as_deref().map(normalize_email);
    let changed = conn.execute(
        "UPDATE users SET
            first_name = COALESCE(?2, first_name),
            last_name = COALESCE(?3, last_name),
            email = COALESCE(?4, email),
            img_url = CASE WHEN ?5 IS NULL THEN img_url ELSE NULLIF(?5, '') END,
            role = COALESCE(?6, role),
            is_active = COALESCE(?7, is_active),
            is_staff = COALESCE(?8, is_staff),
            updated_at = datetime('now')
         WHERE id = ?1",
        params![
            id,
            patch.first_name,
            patch.last_name,
            email,
            patch.img_url,
            patch.role,
            patch.is_active,
            patch.is_staff
        ],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    find_user_by_id(conn, id)
}

pub fn set_avatar(conn: &Connection, id: &str, img_url: &str) -> rusqlite::Result<Option<User>> {
    let changed = conn.execute(
        "UPDATE users SET img_url = ?2, updated_at = datetime('now') WHERE id = ?1",
        params![id, img_url],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    find_user_by_id(conn, id)
}

/// Removes the user and, through cascades, everything they own.
pub fn delete_user(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    Ok(conn.execute("DELETE FROM users WHERE id = ?1", params![id])? > 0)
}

pub fn delete_credential(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    Ok(conn.execute("DELETE FROM credentials WHERE id = ?1", params![id])? > 0)
}

/// Desired credential state for an insert-or-update. `None` fields keep the
/// stored value on update and take the column default on insert.
#[derive(Debug, Clone, Default)]
pub struct CredentialChanges {
    pub auth_provider: Option<AuthProvider>,
    pub password: Option<String>,
    pub is_verified: Option<bool>,
}

/// Insert or update the user's credential. Raw email passwords are hashed here,
/// so every write path goes through the same storage rule.
pub fn upsert_credential(
    conn: &Connection,
    user_id: &str,
    changes: &CredentialChanges,
) -> Result<Credential, CredentialWriteError> {
    let existing = credential_for_user(conn, user_id)?;

    let provider = changes
        .auth_provider
        .or(existing.as_ref().map(|c| c.auth_provider))
        .unwrap_or(AuthProvider::Email);
    let password = match &changes.password {
        Some(raw) => Some(raw.as_str()),
        None => existing.as_ref().and_then(|c| c.password.as_deref()),
    };
    let stored_password = password::prepare_for_storage(provider, password)?;
    let is_verified = changes
        .is_verified
        .or(existing.as_ref().map(|c| c.is_verified))
        .unwrap_or(false);

    match existing {
        Some(credential) => {
            conn.execute(
                "UPDATE credentials
                 SET auth_provider = ?1, password = ?2, is_verified = ?3, updated_at = datetime('now')
                 WHERE id = ?4",
                params![provider, stored_password, is_verified, credential.id],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO credentials (id, user_id, auth_provider, password, is_verified)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![new_id(), user_id, provider, stored_password, is_verified],
            )?;
        }
    }

    credential_for_user(conn, user_id)?.ok_or(CredentialWriteError::Missing)
}

/// Record a verified sign-in through a third-party provider. Only the
/// provider and the verified flag change; a stored password hash survives,
/// so the account can still log in with email and password.
pub fn link_verified_provider(
    conn: &Connection,
    user_id: &str,
    provider: AuthProvider,
) -> Result<Credential, CredentialWriteError> {
    let updated = conn.execute(
        "UPDATE credentials
         SET auth_provider = ?1, is_verified = 1, updated_at = datetime('now')
         WHERE user_id = ?2",
        params![provider, user_id],
    )?;
    if updated == 0 {
        conn.execute(
            "INSERT INTO credentials (id, user_id, auth_provider, password, is_verified)
             VALUES (?1, ?2, ?3, NULL, 1)",
            params![new_id(), user_id, provider],
        )?;
    }
    credential_for_user(conn, user_id)?.ok_or(CredentialWriteError::Missing)
}

/// Mark a credential verified. Returns `Some(true)` if it changed,
/// `Some(false)` if it was already verified, `None` if it does not exist.
pub fn mark_verified(conn: &Connection, credential_id: &str) -> rusqlite::Result<Option<bool>> {
    let Some(credential) = find_credential(conn, credential_id)? else {
        return Ok(None);
    };
    if credential.is_verified {
        return Ok(Some(false));
    }
    conn.execute(
        "UPDATE credentials SET is_verified = 1, updated_at = datetime('now') WHERE id = ?1",
        params![credential_id],
    )?;
    Ok(Some(true))
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialWriteError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Credential row vanished after write")]
    Missing,
}

impl From<CredentialWriteError> for crate::error::AppError {
    fn from(e: CredentialWriteError) -> Self {
        match e {
            CredentialWriteError::Database(e) => crate::error::AppError::Database(e),
            other => crate::error::AppError::Internal(other.to_string()),
        }
    }
}
