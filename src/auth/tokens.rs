use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::db::models::{Role, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Signed token payload. `user_id` is optional on decode so a token without it
/// can be told apart from one with a bad signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Failed to sign token: {0}")]
    Encode(jsonwebtoken::errors::Error),

    #[error("Token is invalid or expired.")]
    Invalid(#[source] jsonwebtoken::errors::Error),

    #[error("Token has wrong type.")]
    WrongType,
}

/// Mints and verifies HS256 access/refresh tokens.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], access_ttl: Duration, refresh_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn issue_pair(&self, user: &User) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access: self.issue(user, TokenType::Access)?,
            refresh: self.issue(user, TokenType::Refresh)?,
        })
    }

    pub fn issue(&self, user: &User, token_type: TokenType) -> Result<String, TokenError> {
        let now = Utc::now();
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            user_id: Some(user.id.clone()),
            email: Some(user.email.clone()),
            role: Some(user.role),
            token_type,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        self.sign(&claims)
    }

    pub(crate) fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(TokenError::Encode)
    }

    /// Check signature, expiry and token type.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        let data =
            decode::<Claims>(token, &self.decoding, &self.validation).map_err(TokenError::Invalid)?;
        if data.claims.token_type != expected {
            return Err(TokenError::WrongType);
        }
        Ok(data.claims)
    }
}

/// Random 64-character hex secret for runs without a configured one.
pub fn random_secret() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(b"test-secret", Duration::minutes(5), Duration::days(1))
    }

    fn user() -> User {
        User {
            id: "0192d1e0-0000-7000-8000-000000000001".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            role: Role::Admin,
            is_active: true,
            is_staff: false,
            is_superuser: false,
            img_url: None,
            created_at: "2025-01-01 00:00:00".to_string(),
            updated_at: "2025-01-01 00:00:00".to_string(),
        }
    }

    #[test]
    fn issued_access_token_carries_identity_claims() {
        let issuer = issuer();
        let pair = issuer.issue_pair(&user()).unwrap();
        assert!(!pair.access.is_empty());
        assert!(!pair.refresh.is_empty());

        let claims = issuer.verify(&pair.access, TokenType::Access).unwrap();
        assert_eq!(claims.user_id.as_deref(), Some(user().id.as_str()));
        assert_eq!(claims.email.as_deref(), Some("ada@example.com"));
        assert_eq!(claims.role, Some(Role::Admin));
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let issuer = issuer();
        let pair = issuer.issue_pair(&user()).unwrap();
        assert!(matches!(
            issuer.verify(&pair.refresh, TokenType::Access),
            Err(TokenError::WrongType)
        ));
        assert!(issuer.verify(&pair.refresh, TokenType::Refresh).is_ok());
    }

    #[test]
    fn token_signed_with_other_secret_is_invalid() {
        let other = TokenIssuer::new(b"other-secret", Duration::minutes(5), Duration::days(1));
        let token = other.issue(&user(), TokenType::Access).unwrap();
        assert!(matches!(
            issuer().verify(&token, TokenType::Access),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn expired_token_is_invalid() {
        let issuer = TokenIssuer::new(b"test-secret", Duration::minutes(-10), Duration::days(1));
        let token = issuer.issue(&user(), TokenType::Access).unwrap();
        assert!(matches!(
            issuer.verify(&token, TokenType::Access),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(issuer().verify("not.a.jwt", TokenType::Access).is_err());
    }

    #[test]
    fn random_secret_is_64_hex_chars() {
        let secret = random_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(secret, random_secret());
    }
}
