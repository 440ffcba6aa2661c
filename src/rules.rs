//! Rules deciding whether a request requires authentication.
//!
//! Rules are evaluated in insertion order as a lazy logical AND: the first
//! rule returning `false` disables authentication for that request and the
//! rest of the chain is skipped. An empty chain authenticates everything.

use std::collections::HashSet;

use http::request::Parts;
use http::Method;

/// A predicate over a request deciding whether it must be authenticated.
///
/// Returning `false` means "do not authenticate this request"; the
/// middleware then delegates to the wrapped service unchanged.
///
/// Closures of the shape `Fn(&Parts) -> bool` satisfy this trait, so ad hoc
/// rules do not need a named type:
///
/// ```
/// use tower_basic_auth::BasicAuth;
///
/// let auth = BasicAuth::builder()
///     .allow("user", "1234")
///     .rule(|request: &http::request::Parts| {
///         !request.headers.contains_key("x-internal")
///     })
///     .build()
///     .unwrap();
/// ```
pub trait Rule: Send + Sync {
    /// Returns `true` when the given request head requires authentication.
    fn should_authenticate(&self, request: &Parts) -> bool;
}

impl<F> Rule for F
where
    F: Fn(&Parts) -> bool + Send + Sync,
{
    fn should_authenticate(&self, request: &Parts) -> bool {
        self(request)
    }
}

/// Rule disabling authentication for an ignore set of request methods.
///
/// The default set contains only `OPTIONS`, letting preflight requests
/// through without credentials.
#[derive(Clone, Debug)]
pub struct MethodRule {
    ignore: HashSet<Method>,
}

impl MethodRule {
    /// Creates a rule that skips authentication for the given methods.
    pub fn new(ignore: impl IntoIterator<Item = Method>) -> Self {
        MethodRule {
            ignore: ignore.into_iter().collect(),
        }
    }
}

impl Default for MethodRule {
    fn default() -> Self {
        MethodRule::new([Method::OPTIONS])
    }
}

impl Rule for MethodRule {
    fn should_authenticate(&self, request: &Parts) -> bool {
        !self.ignore.contains(&request.method)
    }
}

/// Rule restricting authentication to a set of path prefixes.
///
/// A request requires authentication when its path matches one of the
/// configured `path` entries and none of the `ignore` entries. An entry
/// matches the path exactly or as a prefix followed by `/`, so `/api`
/// covers `/api` and `/api/users` but not `/apically`. The default entry
/// `/` matches everything.
#[derive(Clone, Debug)]
pub struct PathRule {
    paths: Vec<String>,
    ignore: Vec<String>,
}

impl PathRule {
    /// Creates a rule requiring authentication under the given paths.
    pub fn new(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        PathRule {
            paths: paths.into_iter().map(Into::into).collect(),
            ignore: Vec::new(),
        }
    }

    /// Adds paths excluded from authentication.
    ///
    /// Ignore entries win over `path` entries regardless of order.
    pub fn ignore(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ignore.extend(paths.into_iter().map(Into::into));
        self
    }
}

impl Default for PathRule {
    fn default() -> Self {
        PathRule::new(["/"])
    }
}

impl Rule for PathRule {
    fn should_authenticate(&self, request: &Parts) -> bool {
        let path = normalize(request.uri.path());
        if self.ignore.iter().any(|entry| matches(entry, &path)) {
            return false;
        }
        self.paths.iter().any(|entry| matches(entry, &path))
    }
}

/// Collapses runs of `/` and guarantees a leading `/`.
fn normalize(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    if !path.starts_with('/') {
        normalized.push('/');
    }
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        normalized.push(c);
    }
    normalized
}

fn matches(entry: &str, path: &str) -> bool {
    let entry = entry.trim_end_matches('/');
    match path.strip_prefix(entry) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(method: Method, uri: &str) -> Parts {
        let (parts, _) = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn method_rule_ignores_options_by_default() {
        let rule = MethodRule::default();
        assert!(!rule.should_authenticate(&parts(Method::OPTIONS, "/api")));
        assert!(rule.should_authenticate(&parts(Method::GET, "/api")));
        assert!(rule.should_authenticate(&parts(Method::POST, "/api")));
    }

    #[test]
    fn method_rule_with_custom_ignore_set() {
        let rule = MethodRule::new([Method::OPTIONS, Method::HEAD]);
        assert!(!rule.should_authenticate(&parts(Method::HEAD, "/api")));
        assert!(rule.should_authenticate(&parts(Method::GET, "/api")));
    }

    #[test]
    fn path_rule_matches_prefix_segments() {
        let rule = PathRule::new(["/admin"]);
        assert!(rule.should_authenticate(&parts(Method::GET, "/admin")));
        assert!(rule.should_authenticate(&parts(Method::GET, "/admin/")));
        assert!(rule.should_authenticate(&parts(Method::GET, "/admin/users")));
        assert!(!rule.should_authenticate(&parts(Method::GET, "/administrators")));
        assert!(!rule.should_authenticate(&parts(Method::GET, "/public")));
    }

    #[test]
    fn path_rule_default_matches_everything() {
        let rule = PathRule::default();
        assert!(rule.should_authenticate(&parts(Method::GET, "/")));
        assert!(rule.should_authenticate(&parts(Method::GET, "/anything/at/all")));
    }

    #[test]
    fn path_rule_trailing_slash_on_entry() {
        let rule = PathRule::new(["/api/"]);
        assert!(rule.should_authenticate(&parts(Method::GET, "/api")));
        assert!(rule.should_authenticate(&parts(Method::GET, "/api/users")));
    }

    #[test]
    fn path_rule_ignore_wins() {
        let rule = PathRule::new(["/admin"]).ignore(["/admin/ping"]);
        assert!(!rule.should_authenticate(&parts(Method::GET, "/admin/ping")));
        assert!(rule.should_authenticate(&parts(Method::GET, "/admin/other")));
    }

    #[test]
    fn path_rule_normalizes_slash_runs() {
        let rule = PathRule::new(["/api"]);
        assert!(rule.should_authenticate(&parts(Method::GET, "//api///users")));
    }

    #[test]
    fn closure_rule() {
        let rule = |request: &Parts| request.uri.path() != "/health";
        assert!(!rule.should_authenticate(&parts(Method::GET, "/health")));
        assert!(rule.should_authenticate(&parts(Method::GET, "/api")));
    }

    #[test]
    fn rules_are_idempotent() {
        let rule = PathRule::new(["/admin"]).ignore(["/admin/ping"]);
        let request = parts(Method::GET, "/admin/item");
        assert_eq!(
            rule.should_authenticate(&request),
            rule.should_authenticate(&request)
        );
    }
}
