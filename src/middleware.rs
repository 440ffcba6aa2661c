//! The middleware itself: configuration, layer and service.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::ready;
use headers::{HeaderMapExt, Host};
use http::header::{HeaderName, HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use http::{request, response, Request, Response, StatusCode};
use pin_project::pin_project;
use tower_layer::Layer;
use tower_service::Service;
use tracing::{debug, trace};

use crate::authenticator::{ArrayAuthenticator, Authenticator};
use crate::credentials::Credentials;
use crate::error::{BoxError, Error};
use crate::rules::{MethodRule, PathRule, Rule};

/// Reason payload handed to the `error` hook.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Failure {
    /// Human readable reason for the denial.
    pub message: &'static str,
}

type BeforeHook = Arc<dyn Fn(&mut request::Parts, &Credentials) + Send + Sync>;
type AfterHook = Arc<dyn Fn(&mut response::Parts, &Credentials) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&mut response::Parts, &Failure) -> Option<Bytes> + Send + Sync>;

/// Hostname sentinel that relaxes the transport policy based on
/// `X-Forwarded-Proto` and `X-Forwarded-Port` instead of the request host.
const FORWARDED_SENTINEL: &str = "headers";

#[derive(Clone)]
struct Options {
    secure: bool,
    relaxed: HashSet<String>,
    realm: String,
    challenge: HeaderValue,
    header: HeaderName,
    authenticator: Arc<dyn Authenticator>,
    rules: Vec<Arc<dyn Rule>>,
    before: Option<BeforeHook>,
    after: Option<AfterHook>,
    error: Option<ErrorHook>,
}

impl Options {
    /// Lazy AND over the rule chain; the first `false` short-circuits.
    fn should_authenticate(&self, request: &request::Parts) -> bool {
        self.rules.iter().all(|rule| rule.should_authenticate(request))
    }

    /// Enforces the HTTPS-required policy for protected requests.
    ///
    /// A violation is a deployment mistake, so it resolves to a service
    /// error instead of a 401.
    fn check_transport(&self, request: &request::Parts) -> Result<(), Error> {
        if !self.secure {
            return Ok(());
        }
        let scheme = request.uri.scheme_str().unwrap_or("http");
        if scheme == "https" {
            return Ok(());
        }
        if let Some(host) = host_of(request) {
            if self.relaxed.contains(&host) {
                return Ok(());
            }
        }
        if self.relaxed.contains(FORWARDED_SENTINEL) && forwarded_tls(&request.headers) {
            return Ok(());
        }
        Err(Error::InsecureTransport {
            scheme: scheme.to_ascii_uppercase(),
        })
    }

    fn extract(&self, request: &request::Parts) -> Credentials {
        if let Some(credentials) = request.extensions.get::<Credentials>() {
            return credentials.clone();
        }
        Credentials::from_header(request.headers.get(&self.header))
    }

    /// Builds the 401 challenge response, letting the `error` hook adjust
    /// the head and optionally supply a body.
    fn unauthorized<B: From<Bytes>>(&self) -> Response<B> {
        let mut response = Response::new(B::from(Bytes::new()));
        *response.status_mut() = StatusCode::UNAUTHORIZED;
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, self.challenge.clone());

        if let Some(error) = &self.error {
            let failure = Failure {
                message: "Authentication failed",
            };
            let (mut parts, body) = response.into_parts();
            let body = match error(&mut parts, &failure) {
                Some(replacement) => B::from(replacement),
                None => body,
            };
            return Response::from_parts(parts, body);
        }
        response
    }
}

fn host_of(request: &request::Parts) -> Option<String> {
    if let Some(host) = request.uri.host() {
        return Some(host.to_owned());
    }
    request
        .headers
        .typed_get::<Host>()
        .map(|host| host.hostname().to_owned())
}

/// True when forwarded headers claim TLS was terminated upstream.
fn forwarded_tls(headers: &http::HeaderMap) -> bool {
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim);
    if proto.is_some_and(|proto| proto.eq_ignore_ascii_case("https")) {
        return true;
    }
    headers
        .get("x-forwarded-port")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|port| port.trim() == "443")
}

/// Configured HTTP Basic Authentication middleware.
///
/// Built once via [`BasicAuth::builder`] and shared by every in-flight
/// request; cloning is cheap and the configuration is immutable. Apply it
/// either as a [`tower_layer::Layer`] or directly with [`BasicAuth::wrap`].
#[derive(Clone)]
pub struct BasicAuth {
    options: Arc<Options>,
}

impl BasicAuth {
    /// Creates a [`Builder`] with the default configuration.
    pub fn builder() -> Builder {
        Builder {
            secure: true,
            relaxed: ["localhost", "127.0.0.1"].map(String::from).into(),
            realm: "Protected".into(),
            header: AUTHORIZATION,
            users: Vec::new(),
            authenticator: None,
            paths: None,
            ignore: None,
            rules: None,
            before: None,
            after: None,
            error: None,
        }
    }

    /// The realm presented in the `WWW-Authenticate` challenge.
    pub fn realm(&self) -> &str {
        &self.options.realm
    }

    /// Returns a new middleware with `rule` appended to the chain.
    ///
    /// The original value is untouched, so configurations shared with
    /// in-flight requests never change underneath them.
    pub fn add_rule(&self, rule: impl Rule + 'static) -> BasicAuth {
        let mut options = Options::clone(&self.options);
        options.rules.push(Arc::new(rule));
        BasicAuth {
            options: Arc::new(options),
        }
    }

    /// Returns a new middleware with the rule chain replaced.
    pub fn with_rules(
        &self,
        rules: impl IntoIterator<Item = Arc<dyn Rule>>,
    ) -> BasicAuth {
        let mut options = Options::clone(&self.options);
        options.rules = rules.into_iter().collect();
        BasicAuth {
            options: Arc::new(options),
        }
    }

    /// Wraps a service with this middleware.
    pub fn wrap<S>(&self, inner: S) -> BasicAuthService<S> {
        BasicAuthService {
            options: self.options.clone(),
            inner,
        }
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("secure", &self.options.secure)
            .field("relaxed", &self.options.relaxed)
            .field("realm", &self.options.realm)
            .field("rules", &self.options.rules.len())
            .finish()
    }
}

impl<S> Layer<S> for BasicAuth {
    type Service = BasicAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        self.wrap(inner)
    }
}

/// A builder constructed via [`BasicAuth::builder`].
pub struct Builder {
    secure: bool,
    relaxed: HashSet<String>,
    realm: String,
    header: HeaderName,
    users: Vec<(String, String)>,
    authenticator: Option<Arc<dyn Authenticator>>,
    paths: Option<Vec<String>>,
    ignore: Option<Vec<String>>,
    rules: Option<Vec<Arc<dyn Rule>>>,
    before: Option<BeforeHook>,
    after: Option<AfterHook>,
    error: Option<ErrorHook>,
}

impl Builder {
    /// Requires HTTPS transport for protected requests. Defaults to `true`.
    ///
    /// When enabled, a plaintext request to a protected path resolves to
    /// [`Error::InsecureTransport`] unless the host is relaxed.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Replaces the hosts exempted from the HTTPS requirement.
    ///
    /// Defaults to `localhost` and `127.0.0.1`. The special entry
    /// `"headers"` trusts `X-Forwarded-Proto: https` or
    /// `X-Forwarded-Port: 443` from an upstream TLS terminator.
    pub fn relaxed(mut self, hosts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.relaxed = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the protection space named in the challenge. Defaults to
    /// `Protected`.
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// Sets the header credentials are read from. Defaults to
    /// `Authorization`.
    pub fn header(mut self, header: HeaderName) -> Self {
        self.header = header;
        self
    }

    /// Adds a user and secret to the users map.
    ///
    /// The secret is either a cleartext password or a bcrypt hash; the form
    /// is detected per entry. Any configured users take precedence over an
    /// explicit [`authenticator`](Builder::authenticator).
    pub fn allow(mut self, user: impl Into<String>, secret: impl Into<String>) -> Self {
        self.users.push((user.into(), secret.into()));
        self
    }

    /// Adds every `(user, secret)` pair from an iterator.
    pub fn users(
        mut self,
        users: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.users
            .extend(users.into_iter().map(|(u, s)| (u.into(), s.into())));
        self
    }

    /// Sets the authenticator strategy.
    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Restricts authentication to the given path prefixes.
    ///
    /// Without this option every path is protected.
    pub fn path(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.paths
            .get_or_insert_with(Vec::new)
            .extend(paths.into_iter().map(Into::into));
        self
    }

    /// Excludes path prefixes from authentication.
    pub fn ignore(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ignore
            .get_or_insert_with(Vec::new)
            .extend(paths.into_iter().map(Into::into));
        self
    }

    /// Appends a rule to an explicit rule chain.
    ///
    /// Supplying any rule this way replaces the default chain (the
    /// `OPTIONS` passthrough and any [`path`](Builder::path) /
    /// [`ignore`](Builder::ignore) rule) entirely.
    pub fn rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.get_or_insert_with(Vec::new).push(Arc::new(rule));
        self
    }

    /// Sets a hook run after authentication succeeds, before delegation.
    ///
    /// The hook may mutate the request head, typically to expose the
    /// authenticated user to handlers via the extensions.
    pub fn before(
        mut self,
        hook: impl Fn(&mut request::Parts, &Credentials) + Send + Sync + 'static,
    ) -> Self {
        self.before = Some(Arc::new(hook));
        self
    }

    /// Sets a hook run on the delegated response of an authenticated
    /// request.
    pub fn after(
        mut self,
        hook: impl Fn(&mut response::Parts, &Credentials) + Send + Sync + 'static,
    ) -> Self {
        self.after = Some(Arc::new(hook));
        self
    }

    /// Sets a hook run on the 401 response before it is returned.
    ///
    /// The hook may mutate the response head and return a replacement body,
    /// which takes precedence over the default empty one.
    pub fn error(
        mut self,
        hook: impl Fn(&mut response::Parts, &Failure) -> Option<Bytes> + Send + Sync + 'static,
    ) -> Self {
        self.error = Some(Arc::new(hook));
        self
    }

    /// Builds the middleware, validating the configuration.
    ///
    /// Fails with [`Error::MissingAuthenticator`] when neither users nor an
    /// authenticator were supplied, and with [`Error::InvalidRealm`] when
    /// the realm cannot form a header value.
    pub fn build(self) -> Result<BasicAuth, Error> {
        let authenticator: Arc<dyn Authenticator> = if !self.users.is_empty() {
            Arc::new(ArrayAuthenticator::new(self.users))
        } else {
            self.authenticator.ok_or(Error::MissingAuthenticator)?
        };

        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{}\"", self.realm))
            .map_err(|_| Error::InvalidRealm(self.realm.clone()))?;

        let rules = match self.rules {
            Some(rules) => rules,
            None => {
                let mut rules: Vec<Arc<dyn Rule>> = vec![Arc::new(MethodRule::default())];
                if self.paths.is_some() || self.ignore.is_some() {
                    let mut rule = match self.paths {
                        Some(paths) => PathRule::new(paths),
                        None => PathRule::default(),
                    };
                    if let Some(ignore) = self.ignore {
                        rule = rule.ignore(ignore);
                    }
                    rules.push(Arc::new(rule));
                }
                rules
            }
        };

        Ok(BasicAuth {
            options: Arc::new(Options {
                secure: self.secure,
                relaxed: self.relaxed,
                realm: self.realm,
                challenge,
                header: self.header,
                authenticator,
                rules,
                before: self.before,
                after: self.after,
                error: self.error,
            }),
        })
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("secure", &self.secure)
            .field("relaxed", &self.relaxed)
            .field("realm", &self.realm)
            .finish()
    }
}

/// Middleware service produced by wrapping an inner service.
#[derive(Clone)]
pub struct BasicAuthService<S> {
    options: Arc<Options>,
    inner: S,
}

impl<S: fmt::Debug> fmt::Debug for BasicAuthService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthService")
            .field("realm", &self.options.realm)
            .field("inner", &self.inner)
            .finish()
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for BasicAuthService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone,
    S::Error: Into<BoxError>,
    ResBody: From<Bytes>,
{
    type Response = Response<ResBody>;
    type Error = BoxError;
    type Future = ResponseFuture<S, ReqBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let options = self.options.clone();
        // Take the service that was driven to readiness and leave a fresh
        // clone behind, as the readiness contract requires.
        let clone = self.inner.clone();
        let mut inner = mem::replace(&mut self.inner, clone);

        let (parts, body) = request.into_parts();

        if !options.should_authenticate(&parts) {
            trace!(path = parts.uri.path(), "authentication disabled by rule");
            let future = inner.call(Request::from_parts(parts, body));
            return ResponseFuture {
                state: State::Skip { future },
                options,
                credentials: None,
            };
        }

        if let Err(error) = options.check_transport(&parts) {
            return ResponseFuture {
                state: State::Invalid {
                    error: Some(error.into()),
                },
                options,
                credentials: None,
            };
        }

        let credentials = options.extract(&parts);
        let authenticator = options.authenticator.clone();
        let checked = credentials.clone();
        let verify: BoxFuture<'static, Result<bool, BoxError>> =
            Box::pin(async move { authenticator.authenticate(&checked).await });

        ResponseFuture {
            state: State::Authorize {
                verify,
                request: Some((parts, body)),
                inner,
            },
            options,
            credentials: Some(credentials),
        }
    }
}

/// Response future for [`BasicAuthService`].
#[pin_project]
pub struct ResponseFuture<S, ReqBody>
where
    S: Service<Request<ReqBody>>,
{
    #[pin]
    state: State<S, S::Future, ReqBody>,
    options: Arc<Options>,
    credentials: Option<Credentials>,
}

#[pin_project(project = StateProj)]
enum State<S, F, B> {
    /// Rules disabled authentication; delegating unchanged.
    Skip {
        #[pin]
        future: F,
    },
    /// Transport policy violation, resolved as a service error.
    Invalid { error: Option<BoxError> },
    /// Waiting on the authenticator.
    Authorize {
        verify: BoxFuture<'static, Result<bool, BoxError>>,
        request: Option<(request::Parts, B)>,
        inner: S,
    },
    /// Waiting on the wrapped service of an authenticated request.
    Respond {
        #[pin]
        future: F,
    },
}

impl<S, ReqBody, ResBody> Future for ResponseFuture<S, ReqBody>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    ResBody: From<Bytes>,
{
    type Output = Result<Response<ResBody>, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();
        loop {
            match this.state.as_mut().project() {
                StateProj::Skip { future } => {
                    return future.poll(cx).map_err(Into::into);
                }
                StateProj::Invalid { error } => {
                    let error = error.take().expect("polled after completion");
                    return Poll::Ready(Err(error));
                }
                StateProj::Authorize {
                    verify,
                    request,
                    inner,
                } => match ready!(verify.as_mut().poll(cx)) {
                    Ok(true) => {
                        let (mut parts, body) =
                            request.take().expect("polled after completion");
                        if let Some(before) = &this.options.before {
                            let credentials = this
                                .credentials
                                .as_ref()
                                .expect("credentials set when authorizing");
                            before(&mut parts, credentials);
                        }
                        let future = inner.call(Request::from_parts(parts, body));
                        this.state.set(State::Respond { future });
                    }
                    Ok(false) => {
                        debug!("authentication failed");
                        return Poll::Ready(Ok(this.options.unauthorized()));
                    }
                    Err(error) => return Poll::Ready(Err(error)),
                },
                StateProj::Respond { future } => {
                    let response = match ready!(future.poll(cx)) {
                        Ok(response) => response,
                        Err(error) => return Poll::Ready(Err(error.into())),
                    };
                    let response = match (&this.options.after, this.credentials.as_ref()) {
                        (Some(after), Some(credentials)) => {
                            let (mut parts, body) = response.into_parts();
                            after(&mut parts, credentials);
                            Response::from_parts(parts, body)
                        }
                        _ => response,
                    };
                    return Poll::Ready(Ok(response));
                }
            }
        }
    }
}
