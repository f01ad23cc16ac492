use std::sync::OnceLock;

use crate::db::models::AuthProvider;

const BCRYPT_PREFIXES: &[&str] = &["$2a$", "$2b$", "$2x$", "$2y$"];
const BCRYPT_HASH_LEN: usize = 60;

/// A real hash of a throwaway value. Logins for unknown emails verify
/// against it so they cost the same bcrypt work as a wrong password.
pub fn dummy_hash() -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| hash_password("quillpad-no-such-user").unwrap_or_default())
}

pub fn hash_password(raw: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(raw, bcrypt::DEFAULT_COST)
}

/// Verify plaintext against a stored hash - constant-time via bcrypt.
/// A malformed hash never verifies.
pub fn verify_password(raw: &str, hash: &str) -> bool {
    bcrypt::verify(raw, hash).unwrap_or(false)
}

/// Whether `value` already has the shape of a bcrypt hash.
pub fn is_hashed(value: &str) -> bool {
    value.len() == BCRYPT_HASH_LEN && BCRYPT_PREFIXES.iter().any(|p| value.starts_with(p))
}

/// The value to persist in `credentials.password`.
///
/// Email credentials store a bcrypt hash: raw values are hashed, existing
/// hashes are kept as-is so re-saving never double-hashes. Third-party
/// providers keep a hash left over from an email signup but never take a
/// raw password.
pub fn prepare_for_storage(
    provider: AuthProvider,
    password: Option<&str>,
) -> Result<Option<String>, bcrypt::BcryptError> {
    match password {
        Some(value) if provider != AuthProvider::Email && is_hashed(value) => {
            Ok(Some(value.to_string()))
        }
        _ if provider != AuthProvider::Email => Ok(None),
        None | Some("") => Ok(None),
        Some(value) if is_hashed(value) => Ok(Some(value.to_string())),
        Some(raw) => hash_password(raw).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("hunter2").unwrap();
        assert!(is_hashed(&hash));
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-hash"));
        assert!(!verify_password("", ""));
    }

    #[test]
    fn plaintext_is_not_mistaken_for_hash() {
        assert!(!is_hashed("password"));
        assert!(!is_hashed("$2b$short"));
    }

    #[test]
    fn prepare_hashes_raw_email_password() {
        let stored = prepare_for_storage(AuthProvider::Email, Some("right"))
            .unwrap()
            .unwrap();
        assert!(is_hashed(&stored));
        assert!(verify_password("right", &stored));
    }

    #[test]
    fn prepare_keeps_existing_hash() {
        let hash = hash_password("right").unwrap();
        let stored = prepare_for_storage(AuthProvider::Email, Some(&hash))
            .unwrap()
            .unwrap();
        assert_eq!(stored, hash);
    }

    #[test]
    fn prepare_drops_password_for_third_party_providers() {
        assert_eq!(
            prepare_for_storage(AuthProvider::Google, Some("right")).unwrap(),
            None
        );
        assert_eq!(prepare_for_storage(AuthProvider::Email, Some("")).unwrap(), None);
    }

    #[test]
    fn prepare_keeps_hash_when_provider_changes() {
        let hash = hash_password("right").unwrap();
        assert_eq!(
            prepare_for_storage(AuthProvider::Google, Some(&hash)).unwrap(),
            Some(hash)
        );
    }

    #[test]
    fn dummy_hash_is_real_and_rejects_guesses() {
        assert!(is_hashed(dummy_hash()));
        assert!(!verify_password("hunter2", dummy_hash()));
        assert_eq!(dummy_hash(), dummy_hash());
    }
}
