#![deny(missing_docs)]

//! HTTP Basic Authentication middleware for [tower] services.
//!
//! The middleware wraps any `tower_service::Service` over [`http`] request
//! and response types. Per request it decides *whether* credentials are
//! required at all (a short-circuiting chain of [`Rule`]s over method and
//! path), extracts a username and password pair from the `Authorization`
//! header, and hands the pair to a pluggable [`Authenticator`]. Denied
//! requests resolve to a `401` carrying a `WWW-Authenticate` challenge;
//! accepted ones are delegated to the wrapped service, with optional
//! `before`, `after` and `error` hooks at the seams.
//!
//! Because Basic credentials travel in a reversible encoding, the
//! middleware refuses plaintext transport by default: a protected `http`
//! request from a host outside the relaxed set resolves to a service error
//! rather than a response. See [`Builder::secure`] and
//! [`Builder::relaxed`].
//!
//! [tower]: https://crates.io/crates/tower
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use http_body_util::Full;
//! use tower::{service_fn, ServiceExt};
//! use tower_basic_auth::BasicAuth;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), tower_basic_auth::BoxError> {
//! let auth = BasicAuth::builder()
//!     .realm("access")
//!     .allow("user", "1234")
//!     .path(["/admin"])
//!     .build()?;
//!
//! let service = auth.wrap(service_fn(|_req: Request<Full<Bytes>>| async {
//!     Ok::<_, std::convert::Infallible>(Response::new(Full::<Bytes>::default()))
//! }));
//!
//! let request = Request::builder()
//!     .uri("https://example.com/admin")
//!     .header("authorization", "Basic dXNlcjoxMjM0")
//!     .body(Full::<Bytes>::default())?;
//!
//! let response = service.oneshot(request).await?;
//! assert_eq!(response.status(), 200);
//! # Ok(())
//! # }
//! ```

mod authenticator;
mod credentials;
mod error;
mod middleware;
mod rules;
#[cfg(feature = "sql")]
mod sql;

pub use self::authenticator::{ArrayAuthenticator, Authenticator};
pub use self::credentials::Credentials;
pub use self::error::{BoxError, Error};
pub use self::middleware::{BasicAuth, BasicAuthService, Builder, Failure, ResponseFuture};
pub use self::rules::{MethodRule, PathRule, Rule};
#[cfg(feature = "sql")]
pub use self::sql::SqlAuthenticator;
