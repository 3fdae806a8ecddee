//! The `token` cookie carrying the refresh token.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use time::OffsetDateTime;

pub const REFRESH_COOKIE_NAME: &str = "token";

/// Cookie attributes. Development mode relaxes same-site and secure flags so a
/// frontend on another origin can talk to a plain-HTTP instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CookiePolicy {
    dev_mode: bool,
}

impl CookiePolicy {
    #[must_use]
    pub fn new(dev_mode: bool) -> Self {
        Self { dev_mode }
    }

    #[must_use]
    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    fn attributes(self) -> &'static str {
        if self.dev_mode {
            "Path=/; HttpOnly; SameSite=None"
        } else {
            "Path=/; HttpOnly; Secure; SameSite=Strict"
        }
    }
}

/// Cookie that expires together with the refresh token.
pub fn refresh_cookie(
    policy: CookiePolicy,
    token: &str,
    expiration: OffsetDateTime,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = (expiration - OffsetDateTime::now_utc())
        .whole_seconds()
        .max(0);
    HeaderValue::from_str(&format!(
        "{REFRESH_COOKIE_NAME}={token}; {}; Max-Age={max_age}",
        policy.attributes()
    ))
}

pub fn clear_refresh_cookie(policy: CookiePolicy) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "{REFRESH_COOKIE_NAME}=; {}; Max-Age=0",
        policy.attributes()
    ))
}

pub fn extract_refresh_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == REFRESH_COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
