//! Password verification against bcrypt hashes kept in the `users` collection.

use crate::{
    error::{AuthFailure, Error, Result},
    store::{field, SecretStore, USERS_COLLECTION},
};
use anyhow::{anyhow, Context};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, instrument};

const PASSWORD_FIELD: &str = "password";

/// Compare a presented password with a stored bcrypt hash.
///
/// A malformed hash is a mismatch, the same as a wrong password.
pub fn verify(stored_hash: &str, presented: &str) -> Result<(), AuthFailure> {
    match bcrypt::verify(presented, stored_hash) {
        Ok(true) => Ok(()),
        Ok(false) | Err(_) => Err(AuthFailure::BadCredentials),
    }
}

#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone)]
pub struct CredentialVerifier {
    store: Arc<dyn SecretStore>,
    // compared against when the user does not exist, so both paths cost the same
    dummy_hash: Arc<str>,
}

impl CredentialVerifier {
    /// # Errors
    /// Returns an error if the dummy hash cannot be generated.
    pub fn new(store: Arc<dyn SecretStore>, cost: u32) -> anyhow::Result<Self> {
        let dummy_hash = bcrypt::hash(ulid::Ulid::new().to_string(), cost)
            .context("failed to generate dummy password hash")?;

        Ok(Self {
            store,
            dummy_hash: dummy_hash.into(),
        })
    }

    /// Check an email/password pair and return the normalized identity.
    ///
    /// # Errors
    /// `Validation` for empty input, `Unauthorized` for unknown users or wrong
    /// passwords, `Internal` when the store fails.
    #[instrument(name = "credentials.authenticate", skip(self, password))]
    pub async fn authenticate(&self, email: &str, password: &SecretString) -> Result<String> {
        let identity = normalize_email(email);
        if identity.is_empty() {
            return Err(Error::validation("empty user id"));
        }
        if password.expose_secret().is_empty() {
            return Err(Error::validation("empty password"));
        }

        let record = self
            .store
            .read_secret(USERS_COLLECTION, &identity)
            .await
            .context("failed to read user record")?;

        let (hash, known) = match &record {
            Some(record) => (
                field(record, PASSWORD_FIELD)
                    .ok_or_else(|| anyhow!("user record has no {PASSWORD_FIELD} field"))?
                    .to_string(),
                true,
            ),
            None => (self.dummy_hash.to_string(), false),
        };

        let presented = password.clone();
        let outcome =
            tokio::task::spawn_blocking(move || verify(&hash, presented.expose_secret()))
                .await
                .context("password verification task failed")?;

        if !known {
            debug!("unknown user");
            return Err(AuthFailure::BadCredentials.into());
        }

        outcome?;

        Ok(identity)
    }
}
