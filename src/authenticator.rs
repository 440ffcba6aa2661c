//! Pluggable credential validation strategies.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::credentials::Credentials;
use crate::error::BoxError;

/// A predicate validating a credential pair against some store.
///
/// Implementations must treat absent user or password as a plain failed
/// lookup, never as an error. An `Err` return is reserved for internal
/// faults, such as a lost database connection, and propagates out of the
/// middleware as a service error.
///
/// Closures of the shape `Fn(&Credentials) -> bool` satisfy this trait.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns `true` when the credentials are valid.
    async fn authenticate(&self, credentials: &Credentials) -> Result<bool, BoxError>;
}

#[async_trait]
impl<F> Authenticator for F
where
    F: Fn(&Credentials) -> bool + Send + Sync,
{
    async fn authenticate(&self, credentials: &Credentials) -> Result<bool, BoxError> {
        Ok(self(credentials))
    }
}

/// Authenticator backed by an in-memory map of users to secrets.
///
/// A secret in bcrypt form is verified as a password hash; any other secret
/// is compared as cleartext. A cleartext secret whose value happens to look
/// like a bcrypt hash is still treated as a hash; store such passwords
/// hashed. The cleartext comparison is not constant time.
#[derive(Clone, Debug, Default)]
pub struct ArrayAuthenticator {
    users: HashMap<String, String>,
}

impl ArrayAuthenticator {
    /// Creates an authenticator from `(user, secret)` pairs.
    pub fn new(
        users: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        ArrayAuthenticator {
            users: users
                .into_iter()
                .map(|(user, secret)| (user.into(), secret.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl Authenticator for ArrayAuthenticator {
    async fn authenticate(&self, credentials: &Credentials) -> Result<bool, BoxError> {
        let (Some(user), Some(password)) = (credentials.user(), credentials.password()) else {
            return Ok(false);
        };
        let Some(secret) = self.users.get(user) else {
            debug!(user, "unknown user");
            return Ok(false);
        };
        if is_bcrypt_hash(secret) {
            // A malformed stored hash fails verification instead of erroring.
            Ok(bcrypt::verify(password, secret).unwrap_or(false))
        } else {
            Ok(secret == password)
        }
    }
}

/// Recognizes `$2$`, `$2a$` and `$2y$` secrets with a two-digit cost.
///
/// Modular crypt strings shorter than 60 bytes cannot be complete bcrypt
/// hashes and fall back to cleartext comparison.
fn is_bcrypt_hash(secret: &str) -> bool {
    if secret.len() < 60 {
        return false;
    }
    let rest = ["$2a$", "$2y$", "$2$"]
        .iter()
        .find_map(|prefix| secret.strip_prefix(prefix));
    match rest {
        Some(rest) => {
            let bytes = rest.as_bytes();
            bytes.len() > 2
                && bytes[0].is_ascii_digit()
                && bytes[1].is_ascii_digit()
                && bytes[2] == b'$'
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHEEL_HASH: &str = "$2y$10$Tm03qGT4FLqobzbZcfLDcOVIwZEpg20QZYffleeA2jfcClLpufYpy";

    fn authenticator() -> ArrayAuthenticator {
        ArrayAuthenticator::new([
            ("root", "t00r"),
            ("somebody", "passw0rd"),
            ("wheel", WHEEL_HASH),
        ])
    }

    #[tokio::test]
    async fn accepts_cleartext_match() {
        let authenticator = authenticator();
        let credentials = Credentials::new("root", "t00r");
        assert!(authenticator.authenticate(&credentials).await.unwrap());
    }

    #[tokio::test]
    async fn accepts_hashed_match() {
        let authenticator = authenticator();
        let credentials = Credentials::new("wheel", "gashhash");
        assert!(authenticator.authenticate(&credentials).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_wrong_password() {
        let authenticator = authenticator();
        let credentials = Credentials::new("root", "nosuch");
        assert!(!authenticator.authenticate(&credentials).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_unknown_user() {
        let authenticator = authenticator();
        let credentials = Credentials::new("nosuch", "nosuch");
        assert!(!authenticator.authenticate(&credentials).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_hash_supplied_as_password() {
        // The stored secret is a hash, so the literal hash string is not a
        // valid password for it.
        let authenticator = authenticator();
        let credentials = Credentials::new("wheel", WHEEL_HASH);
        assert!(!authenticator.authenticate(&credentials).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_empty_credentials() {
        let authenticator = authenticator();
        let credentials = Credentials::default();
        assert!(!authenticator.authenticate(&credentials).await.unwrap());
    }

    #[tokio::test]
    async fn closure_authenticator() {
        let authenticator = |credentials: &Credentials| credentials.user() == Some("root");
        let credentials = Credentials::new("root", "anything");
        assert!(authenticator.authenticate(&credentials).await.unwrap());
    }

    #[test]
    fn hash_detection() {
        assert!(is_bcrypt_hash(WHEEL_HASH));
        assert!(is_bcrypt_hash(&WHEEL_HASH.replace("$2y$", "$2a$")));
        // Too short to be a complete hash.
        assert!(!is_bcrypt_hash("$2y$10$short"));
        // Unrecognized variant falls back to cleartext comparison.
        assert!(!is_bcrypt_hash(&WHEEL_HASH.replace("$2y$", "$2b$")));
        assert!(!is_bcrypt_hash("hunter2"));
    }
}
