//! Credential extraction from `Authorization` style header values.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::header::HeaderValue;

/// A username and password pair extracted from a request.
///
/// Both fields are optional: a missing or malformed `Authorization` header
/// yields an empty pair, which then simply fails authentication instead of
/// erroring out of the request pipeline.
///
/// A `Credentials` value inserted into the request extensions by an upstream
/// component is used as-is, taking precedence over header parsing. This is
/// the escape hatch for front ends that receive credentials out of band and
/// have already split them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    user: Option<String>,
    password: Option<String>,
}

impl Credentials {
    /// Creates a pre-split credential pair.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            user: Some(user.into()),
            password: Some(password.into()),
        }
    }

    /// The username, if one was extracted.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The password, if one was extracted.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub(crate) fn from_header(value: Option<&HeaderValue>) -> Credentials {
        value
            .and_then(|value| value.to_str().ok())
            .map(Credentials::parse)
            .unwrap_or_default()
    }

    /// Parses a `Basic <token>` header value.
    ///
    /// The scheme is matched case-insensitively and must be followed by at
    /// least one whitespace character. The token is base64-decoded and split
    /// on the *first* colon only, so passwords containing colons survive
    /// intact. Any failure along the way produces an empty pair.
    fn parse(value: &str) -> Credentials {
        let value = value.trim_start();
        let bytes = value.as_bytes();
        if bytes.len() < 6
            || !bytes[..5].eq_ignore_ascii_case(b"basic")
            || !bytes[5].is_ascii_whitespace()
        {
            return Credentials::default();
        }

        let token = value[6..].trim();
        let decoded = match STANDARD.decode(token) {
            Ok(decoded) => decoded,
            Err(_) => return Credentials::default(),
        };
        let decoded = match String::from_utf8(decoded) {
            Ok(decoded) => decoded,
            Err(_) => return Credentials::default(),
        };

        match decoded.split_once(':') {
            Some((user, password)) => Credentials::new(user, password),
            None => Credentials::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(value: &str) -> HeaderValue {
        HeaderValue::from_str(value).unwrap()
    }

    fn basic(token: &str) -> HeaderValue {
        header(&format!("Basic {}", STANDARD.encode(token)))
    }

    #[test]
    fn splits_user_and_password() {
        let credentials = Credentials::from_header(Some(&basic("root:t00r")));
        assert_eq!(credentials.user(), Some("root"));
        assert_eq!(credentials.password(), Some("t00r"));
    }

    #[test]
    fn password_keeps_colons() {
        let credentials = Credentials::from_header(Some(&basic("foo:bar:pop")));
        assert_eq!(credentials.user(), Some("foo"));
        assert_eq!(credentials.password(), Some("bar:pop"));
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let token = STANDARD.encode("root:t00r");
        let credentials = Credentials::from_header(Some(&header(&format!("bASIC  {token}"))));
        assert_eq!(credentials.user(), Some("root"));
    }

    #[test]
    fn missing_colon_is_empty() {
        let credentials = Credentials::from_header(Some(&basic("foo")));
        assert_eq!(credentials, Credentials::default());
    }

    #[test]
    fn invalid_base64_is_empty() {
        let credentials = Credentials::from_header(Some(&header("Basic !!!not-base64!!!")));
        assert_eq!(credentials, Credentials::default());
    }

    #[test]
    fn wrong_scheme_is_empty() {
        let credentials = Credentials::from_header(Some(&header("Bearer sometoken")));
        assert_eq!(credentials, Credentials::default());
    }

    #[test]
    fn absent_header_is_empty() {
        let credentials = Credentials::from_header(None);
        assert_eq!(credentials.user(), None);
        assert_eq!(credentials.password(), None);
    }
}
