use std::error::Error as StdError;

/// Boxed error type used at the service boundary.
///
/// Inner service errors and authenticator errors are erased into this type so
/// the middleware can forward either without knowing the concrete type.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors produced by the middleware itself.
///
/// Authentication *failures* are not errors; they resolve to a `401`
/// response. This type covers configuration mistakes caught at build time
/// and the transport policy violation, which is surfaced as a service error
/// rather than a response because it signals a deployment problem, not a
/// client problem.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Neither a users map nor an explicit authenticator was configured.
    #[error("authenticator or users must be configured")]
    MissingAuthenticator,

    /// The configured realm cannot be encoded into a `WWW-Authenticate`
    /// header value.
    #[error("realm {0:?} is not a valid header value")]
    InvalidRealm(String),

    /// A plaintext request reached a protected path while `secure` was
    /// enabled and the host was not in the relaxed set.
    #[error("insecure use of middleware over {scheme} denied by configuration")]
    InsecureTransport {
        /// Uppercased scheme of the offending request.
        scheme: String,
    },
}
