//! Email/password login.
//!
//! The checks run in a fixed order and stop at the first failure. Unknown
//! email and wrong password share one message so a caller cannot tell which
//! accounts exist.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::auth::password;
use crate::auth::tokens::TokenIssuer;
use crate::db::accounts;
use crate::db::models::Role;
use crate::error::{AppError, AppResult};

pub const INVALID_CREDENTIALS: &str = "Invalid credentials.";
pub const ACCOUNT_DISABLED: &str = "User account is disabled.";
pub const NO_CREDENTIALS: &str = "No credentials found for this user.";
pub const NOT_VERIFIED: &str = "Account is not verified.";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    pub user: LoginUser,
}

/// Public profile subset returned on login. Never includes the password hash.
#[derive(Debug, Serialize)]
pub struct LoginUser {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

fn reject(message: &str) -> AppError {
    AppError::AuthFailed(message.to_string())
}

pub fn authenticate(
    conn: &Connection,
    issuer: &TokenIssuer,
    email: &str,
    raw_password: &str,
) -> AppResult<LoginResponse> {
    let Some(user) = accounts::find_user_by_email(conn, email)? else {
        password::verify_password(raw_password, password::dummy_hash());
        return Err(reject(INVALID_CREDENTIALS));
    };

    if !user.is_active {
        return Err(reject(ACCOUNT_DISABLED));
    }

    let credential =
        accounts::credential_for_user(conn, &user.id)?.ok_or_else(|| reject(NO_CREDENTIALS))?;

    if !credential.is_verified {
        return Err(reject(NOT_VERIFIED));
    }

    let stored = credential.password.as_deref().filter(|hash| !hash.is_empty());
    let matches =
        password::verify_password(raw_password, stored.unwrap_or(password::dummy_hash()))
            && stored.is_some();
    if !matches {
        return Err(reject(INVALID_CREDENTIALS));
    }

    let tokens = issuer
        .issue_pair(&user)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    tracing::info!(user_id = %user.id, "login succeeded");

    Ok(LoginResponse {
        access: tokens.access,
        refresh: tokens.refresh,
        user: LoginUser {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tokens::TokenType;
    use crate::db::accounts::{insert_user, upsert_credential, CredentialChanges, NewUser};
    use crate::db::models::AuthProvider;
    use crate::db::test_pool;
    use chrono::Duration;
    use rusqlite::params;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(b"login-test", Duration::minutes(5), Duration::days(1))
    }

    fn seed(conn: &Connection, verified: bool) -> String {
        let user = insert_user(
            conn,
            &NewUser {
                email: "a@x.com".to_string(),
                first_name: "A".to_string(),
                last_name: "X".to_string(),
                role: Role::Author,
                img_url: None,
            },
        )
        .unwrap();
        upsert_credential(
            conn,
            &user.id,
            &CredentialChanges {
                auth_provider: Some(AuthProvider::Email),
                password: Some("right".to_string()),
                is_verified: Some(verified),
            },
        )
        .unwrap();
        user.id
    }

    fn message(result: AppResult<LoginResponse>) -> String {
        match result {
            Err(AppError::AuthFailed(msg)) => msg,
            Err(other) => panic!("unexpected error kind: {:?}", other),
            Ok(_) => panic!("login unexpectedly succeeded"),
        }
    }

    #[test]
    fn valid_login_returns_token_for_that_user() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let user_id = seed(&conn, true);
        let issuer = issuer();

        let response = authenticate(&conn, &issuer, "a@x.com", "right").unwrap();
        assert_eq!(response.user.id, user_id);
        assert_eq!(response.user.role, Role::Author);

        let claims = issuer.verify(&response.access, TokenType::Access).unwrap();
        assert_eq!(claims.user_id.as_deref(), Some(user_id.as_str()));
        assert!(issuer.verify(&response.refresh, TokenType::Refresh).is_ok());
    }

    #[test]
    fn wrong_password_and_unknown_email_are_indistinguishable() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        seed(&conn, true);
        let issuer = issuer();

        let wrong_password = message(authenticate(&conn, &issuer, "a@x.com", "wrong"));
        let unknown_email = message(authenticate(&conn, &issuer, "nobody@x.com", "right"));
        assert_eq!(wrong_password.as_bytes(), unknown_email.as_bytes());
        assert_eq!(wrong_password, INVALID_CREDENTIALS);
    }

    #[test]
    fn unknown_email_still_pays_for_a_hash_check() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        seed(&conn, true);

        // The dummy hash must be a real bcrypt hash or the check is free
        assert!(password::is_hashed(password::dummy_hash()));
        assert_eq!(
            message(authenticate(&conn, &issuer(), "nobody@x.com", "right")),
            INVALID_CREDENTIALS
        );
    }

    #[test]
    fn password_login_survives_google_link() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let user_id = seed(&conn, true);
        crate::db::accounts::link_verified_provider(&conn, &user_id, AuthProvider::Google)
            .unwrap();

        let response = authenticate(&conn, &issuer(), "a@x.com", "right").unwrap();
        assert_eq!(response.user.id, user_id);
    }

    #[test]
    fn unverified_account_is_rejected_before_password_check() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        seed(&conn, false);

        // Even a wrong password reports the verification state first
        assert_eq!(message(authenticate(&conn, &issuer(), "a@x.com", "wrong")), NOT_VERIFIED);
    }

    #[test]
    fn disabled_account_is_rejected() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let user_id = seed(&conn, true);
        conn.execute("UPDATE users SET is_active = 0 WHERE id = ?1", params![user_id])
            .unwrap();

        assert_eq!(
            message(authenticate(&conn, &issuer(), "a@x.com", "right")),
            ACCOUNT_DISABLED
        );
    }

    #[test]
    fn user_without_credential_is_rejected() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let user_id = seed(&conn, true);
        conn.execute("DELETE FROM credentials WHERE user_id = ?1", params![user_id])
            .unwrap();

        assert_eq!(
            message(authenticate(&conn, &issuer(), "a@x.com", "right")),
            NO_CREDENTIALS
        );
    }

    #[test]
    fn credential_without_password_is_rejected_generically() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let user_id = seed(&conn, true);
        conn.execute(
            "UPDATE credentials SET password = NULL WHERE user_id = ?1",
            params![user_id],
        )
        .unwrap();

        assert_eq!(
            message(authenticate(&conn, &issuer(), "a@x.com", "")),
            INVALID_CREDENTIALS
        );
    }
}
