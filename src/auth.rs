//! Bearer-token verification.
//!
//! The core treats authentication as a pure function from an opaque token
//! to a stable user id. [`TokenVerifier`] is the seam; the default
//! implementation verifies `"{user_id}.{signature}"` tokens where the
//! signature is hex-encoded HMAC-SHA256 of the user id under a shared
//! secret. Verification runs before any user-scoped resource is touched.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ServiceError;

pub trait TokenVerifier: Send + Sync {
    /// Resolve a bearer token to a user id, or fail with
    /// [`ServiceError::Authentication`].
    fn verify(&self, token: &str) -> Result<String, ServiceError>;
}

/// HMAC-SHA256 token verifier.
///
/// The user id doubles as a directory name under the vector-store root,
/// so it is constrained to a conservative charset on top of signature
/// verification.
pub struct HmacTokenVerifier {
    secret: Vec<u8>,
}

impl HmacTokenVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Mint a token for `user_id`. Used by deployments that issue their
    /// own tokens and by tests.
    pub fn issue(&self, user_id: &str) -> String {
        format!("{}.{}", user_id, self.sign(user_id))
    }

    fn sign(&self, user_id: &str) -> String {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(user_id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl TokenVerifier for HmacTokenVerifier {
    fn verify(&self, token: &str) -> Result<String, ServiceError> {
        let (user_id, signature) = token
            .rsplit_once('.')
            .ok_or_else(|| ServiceError::Authentication("malformed token".to_string()))?;

        if user_id.is_empty() || !is_safe_user_id(user_id) {
            return Err(ServiceError::Authentication("invalid user id".to_string()));
        }

        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(user_id.as_bytes());
        let expected = hex::decode(signature)
            .map_err(|_| ServiceError::Authentication("malformed signature".to_string()))?;
        mac.verify_slice(&expected)
            .map_err(|_| ServiceError::Authentication("invalid authentication token".to_string()))?;

        Ok(user_id.to_string())
    }
}

/// User ids name filesystem directories; keep them boring.
fn is_safe_user_id(user_id: &str) -> bool {
    user_id.len() <= 128
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Pull the bearer token out of an `Authorization` header value.
pub fn bearer_token(header: &str) -> Result<&str, ServiceError> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ServiceError::Authentication("missing bearer token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_verify_roundtrip() {
        let verifier = HmacTokenVerifier::new(b"test-secret".to_vec());
        let token = verifier.issue("user-42");
        assert_eq!(verifier.verify(&token).unwrap(), "user-42");
    }

    #[test]
    fn test_tampered_user_id_rejected() {
        let verifier = HmacTokenVerifier::new(b"test-secret".to_vec());
        let token = verifier.issue("user-42");
        let signature = token.rsplit_once('.').unwrap().1;
        let forged = format!("other-user.{}", signature);
        assert!(verifier.verify(&forged).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = HmacTokenVerifier::new(b"secret-a".to_vec());
        let verifier = HmacTokenVerifier::new(b"secret-b".to_vec());
        let token = issuer.issue("user-42");
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let verifier = HmacTokenVerifier::new(b"s".to_vec());
        assert!(verifier.verify("no-dot-here").is_err());
        assert!(verifier.verify(".justsig").is_err());
        assert!(verifier.verify("user.nothex!!").is_err());
    }

    #[test]
    fn test_path_hostile_user_id_rejected() {
        let verifier = HmacTokenVerifier::new(b"s".to_vec());
        let token = verifier.issue("../etc/passwd");
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token("Bearer abc.def").unwrap(), "abc.def");
        assert!(bearer_token("Basic abc").is_err());
        assert!(bearer_token("Bearer ").is_err());
    }
}
