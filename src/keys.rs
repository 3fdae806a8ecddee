//! Signing key material.
//!
//! Keys are read once at startup into immutable values and handed to the
//! services that use them. Rotating a key means building new services.

use crate::store::{field, SecretStore, KEYS_COLLECTION};
use anyhow::{anyhow, bail, Context, Result};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::{pkcs1::DecodeRsaPrivateKey, pkcs8::DecodePrivateKey, RsaPrivateKey};
use std::path::Path;
use tracing::{debug, instrument};

/// ECDSA P-384 private key (PKCS#8 PEM) for access tokens.
pub const ACCESS_KEY_NAME: &str = "ecdsa";
/// HMAC secret for refresh tokens.
pub const REFRESH_KEY_NAME: &str = "hmac";
/// RSA private key (PEM) for identity cards.
pub const IDENTITY_KEY_NAME: &str = "rsa";

const KEY_FIELD: &str = "key";

/// Keys for the two session tokens.
#[derive(Clone)]
pub struct SessionKeys {
    access: EncodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("access", &"***")
            .field("refresh", &"***")
            .finish()
    }
}

impl SessionKeys {
    /// Build from a PKCS#8 PEM P-384 private key and a raw HMAC secret.
    ///
    /// # Errors
    /// Returns an error if the PEM is not an EC private key or the secret is empty.
    pub fn new(access_pem: &[u8], refresh_secret: &[u8]) -> Result<Self> {
        let access =
            EncodingKey::from_ec_pem(access_pem).context("invalid access token signing key")?;

        if refresh_secret.is_empty() {
            bail!("refresh token signing key is empty");
        }

        Ok(Self {
            access,
            refresh_encoding: EncodingKey::from_secret(refresh_secret),
            refresh_decoding: DecodingKey::from_secret(refresh_secret),
        })
    }

    /// Read both session keys from the `keys` collection.
    ///
    /// # Errors
    /// Returns an error if a key is missing from the store or cannot be parsed.
    #[instrument(skip(store))]
    pub async fn load(store: &dyn SecretStore) -> Result<Self> {
        let access = read_key(store, ACCESS_KEY_NAME).await?;
        let refresh = read_key(store, REFRESH_KEY_NAME).await?;

        debug!("loaded session signing keys");

        Self::new(access.as_bytes(), refresh.as_bytes())
    }

    pub(crate) fn access(&self) -> &EncodingKey {
        &self.access
    }

    pub(crate) fn refresh_encoding(&self) -> &EncodingKey {
        &self.refresh_encoding
    }

    pub(crate) fn refresh_decoding(&self) -> &DecodingKey {
        &self.refresh_decoding
    }
}

/// Read the `key` field of `keys/<name>`.
///
/// # Errors
/// Returns an error if the store fails or the secret or its field is missing.
pub async fn read_key(store: &dyn SecretStore, name: &str) -> Result<String> {
    let secret = store
        .read_secret(KEYS_COLLECTION, name)
        .await
        .with_context(|| format!("failed to read {KEYS_COLLECTION}/{name}"))?
        .ok_or_else(|| anyhow!("{KEYS_COLLECTION}/{name} not found"))?;

    field(&secret, KEY_FIELD)
        .map(ToString::to_string)
        .ok_or_else(|| anyhow!("{KEYS_COLLECTION}/{name} has no {KEY_FIELD} field"))
}

/// Parse an RSA private key in PKCS#8 or PKCS#1, PEM or DER.
///
/// # Errors
/// Returns an error if none of the encodings match.
pub fn decode_identity_key(pem_or_der: &[u8]) -> Result<RsaPrivateKey> {
    if pem_or_der.starts_with(b"-----BEGIN") {
        let s = std::str::from_utf8(pem_or_der).context("identity key is not UTF-8")?;
        if let Ok(k) = RsaPrivateKey::from_pkcs8_pem(s) {
            return Ok(k);
        }
        if let Ok(k) = RsaPrivateKey::from_pkcs1_pem(s) {
            return Ok(k);
        }
        bail!("identity key is not an RSA private key");
    }

    if let Ok(k) = RsaPrivateKey::from_pkcs8_der(pem_or_der) {
        return Ok(k);
    }
    RsaPrivateKey::from_pkcs1_der(pem_or_der).context("identity key is not an RSA private key")
}

/// Load the identity signing key from `path` when given, otherwise from `keys/rsa`.
///
/// # Errors
/// Returns an error if the file or secret cannot be read or parsed.
#[instrument(skip(store))]
pub async fn load_identity_key(store: &dyn SecretStore, path: Option<&Path>) -> Result<RsaPrivateKey> {
    let material = match path {
        Some(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read identity key file: {}", path.display()))?,
        None => read_key(store, IDENTITY_KEY_NAME).await?.into_bytes(),
    };

    decode_identity_key(&material)
}
