//! Access and refresh token issuance and refresh token validation.

use crate::{
    error::{AuthFailure, Result},
    keys::SessionKeys,
    whitelist::{Entry, Whitelist},
};
use anyhow::Context;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, instrument};
use uuid::Uuid;

pub const ACCESS_ALGORITHM: Algorithm = Algorithm::ES384;
pub const REFRESH_ALGORITHM: Algorithm = Algorithm::HS512;

pub const DEFAULT_ISSUER: &str = "http://localhost:8080";
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Longest lifetime accepted for either token (ten years).
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Clock skew tolerated on `exp` and `nbf`, in seconds.
const LEEWAY: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ISSUER.to_string())
    }
}

impl TokenConfig {
    #[must_use]
    pub fn new(issuer: String) -> Self {
        Self {
            issuer,
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
        }
    }

    #[must_use]
    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }
}

#[derive(Debug, Clone)]
pub struct TokenService {
    keys: SessionKeys,
    config: TokenConfig,
    whitelist: Whitelist,
}

impl TokenService {
    #[must_use]
    pub fn new(keys: SessionKeys, config: TokenConfig, whitelist: Whitelist) -> Self {
        Self {
            keys,
            config,
            whitelist,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    #[must_use]
    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    /// Sign a short-lived access token. Nothing is stored.
    ///
    /// # Errors
    /// Returns `Internal` if signing fails.
    #[instrument(name = "token.issue", skip(self), fields(token.kind = "access"))]
    pub fn issue_access_token(&self, subject: &str) -> Result<String> {
        let (token, _) = self.sign(
            subject,
            self.config.access_ttl,
            ACCESS_ALGORITHM,
            self.keys.access(),
        )?;
        Ok(token)
    }

    /// Sign a refresh token and whitelist it. The token is only returned once
    /// the whitelist write succeeded.
    ///
    /// # Errors
    /// Returns `Internal` if signing or the whitelist write fails.
    #[instrument(name = "token.issue", skip(self), fields(token.kind = "refresh"))]
    pub async fn issue_refresh_token(&self, subject: &str) -> Result<(String, OffsetDateTime)> {
        let (token, expiration) = self.sign(
            subject,
            self.config.refresh_ttl,
            REFRESH_ALGORITHM,
            self.keys.refresh_encoding(),
        )?;

        let entry = Entry::new(token.clone(), subject.to_string(), expiration);
        self.whitelist
            .put(&entry)
            .await
            .context("failed to whitelist refresh token")?;

        Ok((token, expiration))
    }

    /// Validate a refresh token and return its subject.
    ///
    /// The whitelist is consulted first; a token that was never issued or was
    /// revoked is rejected without any cryptographic work.
    ///
    /// # Errors
    /// `Unauthorized` with the failing check, or `Internal` if the whitelist
    /// cannot be read.
    #[instrument(name = "token.validate", skip_all, fields(token.kind = "refresh"))]
    pub async fn validate_refresh_token(&self, token: &str) -> Result<String> {
        let Some(entry) = self.whitelist.get(token).await? else {
            return Err(AuthFailure::NotWhitelisted.into());
        };

        let claims = self.decode_refresh(token)?;

        if entry.user_id != claims.sub {
            return Err(AuthFailure::SubjectMismatch.into());
        }

        debug!("refresh token valid");

        Ok(claims.sub)
    }

    fn decode_refresh(&self, token: &str) -> Result<Claims, AuthFailure> {
        // the algorithm comes from here, never from the token header
        let mut validation = Validation::new(REFRESH_ALGORITHM);
        validation.leeway = LEEWAY;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "nbf", "sub", "iss"]);
        validation.set_issuer(&[self.config.issuer.as_str()]);

        decode::<Claims>(token, self.keys.refresh_decoding(), &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthFailure::Expired,
                ErrorKind::InvalidAlgorithm => AuthFailure::WrongAlgorithm,
                _ => AuthFailure::InvalidToken,
            })
    }

    fn sign(
        &self,
        subject: &str,
        ttl: Duration,
        algorithm: Algorithm,
        key: &EncodingKey,
    ) -> Result<(String, OffsetDateTime)> {
        let now = OffsetDateTime::now_utc();
        let expiration = time::Duration::try_from(ttl)
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| anyhow::anyhow!("token lifetime of {}s is out of range", ttl.as_secs()))?;

        let claims = Claims {
            sub: subject.to_string(),
            iss: self.config.issuer.clone(),
            iat: now.unix_timestamp(),
            nbf: now.unix_timestamp(),
            exp: expiration.unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(algorithm), &claims, key).context("failed to sign token")?;
        let expiration = OffsetDateTime::from_unix_timestamp(claims.exp)
            .context("token expiration out of range")?;

        Ok((token, expiration))
    }
}
