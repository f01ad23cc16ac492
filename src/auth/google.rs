//! Google sign-in: verify an ID token, then find-or-create the local account.

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::accounts::{self, NewUser};
use crate::db::models::{AuthProvider, Role, User};
use crate::error::AppResult;

const GOOGLE_ISSUERS: &[&str] = &["accounts.google.com", "https://accounts.google.com"];

/// Identity facts taken from a verified provider token.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedIdentity {
    pub email: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    #[serde(default)]
    pub picture: String,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Google client id is not configured")]
    NotConfigured,

    #[error("Could not fetch signing keys: {0}")]
    Keys(String),

    #[error("{0}")]
    Invalid(String),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, VerifyError>;
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    n: String,
    e: String,
}

/// Verifies Google ID tokens against Google's published RSA keys.
pub struct GoogleVerifier {
    client: reqwest::Client,
    certs_url: String,
    client_id: Option<String>,
}

impl GoogleVerifier {
    pub fn new(client_id: Option<String>, certs_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            certs_url,
            client_id,
        }
    }

    async fn fetch_keys(&self) -> Result<Jwks, VerifyError> {
        self.client
            .get(&self.certs_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| VerifyError::Keys(e.to_string()))?
            .json::<Jwks>()
            .await
            .map_err(|e| VerifyError::Keys(e.to_string()))
    }
}

#[async_trait]
impl IdentityVerifier for GoogleVerifier {
    async fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, VerifyError> {
        let client_id = self.client_id.as_deref().ok_or(VerifyError::NotConfigured)?;

        let header = decode_header(id_token).map_err(|e| VerifyError::Invalid(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| VerifyError::Invalid("Token header has no key id".to_string()))?;

        let jwks = self.fetch_keys().await?;
        let jwk = jwks
            .keys
            .iter()
            .find(|k| k.kid == kid)
            .ok_or_else(|| VerifyError::Invalid(format!("Unknown signing key {}", kid)))?;
        let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| VerifyError::Keys(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[client_id]);
        validation.set_issuer(GOOGLE_ISSUERS);

        let data = decode::<VerifiedIdentity>(id_token, &key, &validation)
            .map_err(|e| VerifyError::Invalid(e.to_string()))?;
        Ok(data.claims)
    }
}

/// Profile subset returned by the Google sign-in endpoint.
#[derive(Debug, Serialize)]
pub struct GoogleUser {
    pub first_name: String,
    pub last_name: String,
    pub img_url: Option<String>,
}

/// Find-or-create the user for `identity` and mark its credential as a
/// verified Google credential, in one transaction.
///
/// Name and avatar are only written when the account is created.
pub fn establish_account(conn: &mut Connection, identity: &VerifiedIdentity) -> AppResult<User> {
    let tx = conn.transaction()?;

    let user = match accounts::find_user_by_email(&tx, &identity.email)? {
        Some(user) => user,
        None => {
            let user = accounts::insert_user(
                &tx,
                &NewUser {
                    email: identity.email.clone(),
                    first_name: identity.given_name.clone(),
                    last_name: identity.family_name.clone(),
                    role: Role::Author,
                    img_url: Some(identity.picture.clone()).filter(|p| !p.is_empty()),
                },
            )?;
            tracing::info!(user_id = %user.id, "created account from Google sign-in");
            user
        }
    };

    accounts::link_verified_provider(&tx, &user.id, AuthProvider::Google)?;

    tx.commit()?;
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::accounts::CredentialChanges;
    use crate::db::test_pool;

    fn identity() -> VerifiedIdentity {
        VerifiedIdentity {
            email: "g@x.com".to_string(),
            given_name: "Grace".to_string(),
            family_name: "Hopper".to_string(),
            picture: "https://lh3.googleusercontent.com/a/grace".to_string(),
        }
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn establishing_twice_yields_one_user_and_one_credential() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();

        let first = establish_account(&mut conn, &identity()).unwrap();
        let second = establish_account(&mut conn, &identity()).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(count(&conn, "users"), 1);
        assert_eq!(count(&conn, "credentials"), 1);

        let credential = accounts::credential_for_user(&conn, &first.id).unwrap().unwrap();
        assert!(credential.is_verified);
        assert_eq!(credential.auth_provider, AuthProvider::Google);
        assert!(credential.password.is_none());
    }

    #[test]
    fn new_account_takes_profile_from_identity() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let user = establish_account(&mut conn, &identity()).unwrap();

        assert_eq!(user.first_name, "Grace");
        assert_eq!(user.last_name, "Hopper");
        assert_eq!(user.role, Role::Author);
        assert_eq!(
            user.img_url.as_deref(),
            Some("https://lh3.googleusercontent.com/a/grace")
        );
    }

    #[test]
    fn returning_login_keeps_stored_profile() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        establish_account(&mut conn, &identity()).unwrap();

        let mut renamed = identity();
        renamed.given_name = "Amazing".to_string();
        let user = establish_account(&mut conn, &renamed).unwrap();
        assert_eq!(user.first_name, "Grace");
    }

    #[test]
    fn existing_email_account_is_verified_by_google_login() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let user = accounts::insert_user(
            &conn,
            &NewUser {
                email: "g@x.com".to_string(),
                first_name: "G".to_string(),
                last_name: "H".to_string(),
                role: Role::Admin,
                img_url: None,
            },
        )
        .unwrap();
        accounts::upsert_credential(
            &conn,
            &user.id,
            &CredentialChanges {
                password: Some("pw".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let established = establish_account(&mut conn, &identity()).unwrap();
        assert_eq!(established.id, user.id);
        assert_eq!(established.role, Role::Admin);

        let credential = accounts::credential_for_user(&conn, &user.id).unwrap().unwrap();
        assert!(credential.is_verified);
        assert_eq!(credential.auth_provider, AuthProvider::Google);
        let hash = credential.password.expect("password hash kept");
        assert!(crate::auth::password::verify_password("pw", &hash));
    }

    #[tokio::test]
    async fn unconfigured_verifier_rejects() {
        let verifier = GoogleVerifier::new(None, "http://127.0.0.1:9/certs".to_string());
        assert!(matches!(
            verifier.verify("a.b.c").await,
            Err(VerifyError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn malformed_token_is_invalid_before_fetching_keys() {
        let verifier = GoogleVerifier::new(
            Some("client-id".to_string()),
            "http://127.0.0.1:9/certs".to_string(),
        );
        assert!(matches!(
            verifier.verify("not-a-jwt").await,
            Err(VerifyError::Invalid(_))
        ));
    }
}
