use axum::http::{header, HeaderMap};
use rusqlite::Connection;

use crate::auth::tokens::{Claims, TokenIssuer, TokenType};
use crate::db::accounts;
use crate::db::models::User;
use crate::error::AppError;

pub const NOT_PROVIDED: &str = "Authentication credentials were not provided.";
pub const INVALID_TOKEN: &str = "Given token not valid for any token type.";
pub const MISSING_USER_ID: &str = "Token missing 'user_id' claim.";
pub const USER_NOT_FOUND: &str = "User not found.";
pub const USER_INACTIVE: &str = "User is inactive.";

/// The token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve an access token to its active user. Read-only.
pub fn authenticate_token(
    conn: &Connection,
    issuer: &TokenIssuer,
    token: &str,
    expected: TokenType,
) -> Result<User, AppError> {
    let claims = issuer.verify(token, expected).map_err(|e| {
        tracing::debug!("rejected bearer token: {}", e);
        AppError::Unauthorized(INVALID_TOKEN.to_string())
    })?;
    resolve_claims(conn, &claims)
}

/// Map verified claims to an active user. Lookup errors collapse into
/// "user not found" so store failures never reach the caller.
pub fn resolve_claims(conn: &Connection, claims: &Claims) -> Result<User, AppError> {
    let user_id = claims
        .user_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Unauthorized(MISSING_USER_ID.to_string()))?;

    let user = match accounts::find_user_by_id(conn, user_id) {
        Ok(Some(user)) => user,
        Ok(None) => return Err(AppError::Unauthorized(USER_NOT_FOUND.to_string())),
        Err(e) => {
            tracing::error!("user lookup failed during authentication: {}", e);
            return Err(AppError::Unauthorized(USER_NOT_FOUND.to_string()));
        }
    };

    if !user.is_active {
        return Err(AppError::Unauthorized(USER_INACTIVE.to_string()));
    }

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::accounts::{insert_user, NewUser};
    use crate::db::models::Role;
    use crate::db::test_pool;
    use axum::http::HeaderValue;
    use chrono::{Duration, Utc};
    use rusqlite::params;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(b"request-test", Duration::minutes(5), Duration::days(1))
    }

    fn seed(conn: &Connection) -> User {
        insert_user(
            conn,
            &NewUser {
                email: "reader@x.com".to_string(),
                first_name: "Re".to_string(),
                last_name: "Ader".to_string(),
                role: Role::Author,
                img_url: None,
            },
        )
        .unwrap()
    }

    fn unauthorized_message(result: Result<User, AppError>) -> String {
        match result {
            Err(AppError::Unauthorized(msg)) => msg,
            other => panic!("expected Unauthorized, got {:?}", other.map(|u| u.id)),
        }
    }

    #[test]
    fn bearer_token_parses_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[test]
    fn valid_token_resolves_user() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let user = seed(&conn);
        let issuer = issuer();
        let token = issuer.issue(&user, TokenType::Access).unwrap();

        let resolved = authenticate_token(&conn, &issuer, &token, TokenType::Access).unwrap();
        assert_eq!(resolved.id, user.id);
    }

    #[test]
    fn inactive_user_is_rejected_with_valid_token() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let user = seed(&conn);
        let issuer = issuer();
        let token = issuer.issue(&user, TokenType::Access).unwrap();
        conn.execute("UPDATE users SET is_active = 0 WHERE id = ?1", params![user.id])
            .unwrap();

        let msg = unauthorized_message(authenticate_token(&conn, &issuer, &token, TokenType::Access));
        assert_eq!(msg, USER_INACTIVE);
    }

    #[test]
    fn deleted_user_is_not_found() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let user = seed(&conn);
        let issuer = issuer();
        let token = issuer.issue(&user, TokenType::Access).unwrap();
        conn.execute("DELETE FROM users WHERE id = ?1", params![user.id])
            .unwrap();

        let msg = unauthorized_message(authenticate_token(&conn, &issuer, &token, TokenType::Access));
        assert_eq!(msg, USER_NOT_FOUND);
    }

    #[test]
    fn token_without_user_id_is_rejected() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let issuer = issuer();
        let now = Utc::now();
        let token = issuer
            .sign(&Claims {
                user_id: None,
                email: Some("ghost@x.com".to_string()),
                role: None,
                token_type: TokenType::Access,
                iat: now.timestamp(),
                exp: (now + Duration::minutes(5)).timestamp(),
            })
            .unwrap();

        let msg = unauthorized_message(authenticate_token(&conn, &issuer, &token, TokenType::Access));
        assert_eq!(msg, MISSING_USER_ID);
    }

    #[test]
    fn bad_signature_is_distinct_from_identity_failures() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let msg = unauthorized_message(authenticate_token(&conn, &issuer(), "x.y.z", TokenType::Access));
        assert_eq!(msg, INVALID_TOKEN);
    }

    #[test]
    fn resolving_does_not_write() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let user = seed(&conn);
        let issuer = issuer();
        let token = issuer.issue(&user, TokenType::Access).unwrap();

        let total_changes = |conn: &Connection| -> i64 {
            conn.query_row("SELECT total_changes()", [], |r| r.get(0)).unwrap()
        };
        let before = total_changes(&conn);
        authenticate_token(&conn, &issuer, &token, TokenType::Access).unwrap();
        assert_eq!(total_changes(&conn), before);
    }
}
