pub mod google;
pub mod login;
pub mod password;
pub mod policy;
pub mod request;
pub mod tokens;

pub use google::{GoogleVerifier, IdentityVerifier, VerifiedIdentity, VerifyError};
pub use tokens::{TokenIssuer, TokenType};
