//! Revocation whitelist for refresh tokens.
//!
//! A refresh token is honored only while an entry keyed by its exact string
//! exists. Entries carry the token's expiration so stale ones can be swept, but
//! the sweep is housekeeping: expiry is always enforced on the token itself.

use crate::store::{field, Secret, SecretStore, WHITELIST_COLLECTION};
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, instrument};

const FIELD_TOKEN: &str = "token";
const FIELD_USER_ID: &str = "userID";
const FIELD_EXPIRATION: &str = "expiration";

#[derive(Clone, PartialEq, Eq)]
pub struct Entry {
    pub token: String,
    pub user_id: String,
    pub expiration: OffsetDateTime,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("token", &"***")
            .field("user_id", &self.user_id)
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl Entry {
    #[must_use]
    pub fn new(token: String, user_id: String, expiration: OffsetDateTime) -> Self {
        Self {
            token,
            user_id,
            expiration,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expiration < now
    }

    fn to_secret(&self) -> Result<Secret> {
        let mut secret = Secret::new();
        secret.insert(FIELD_TOKEN.to_string(), Value::from(self.token.clone()));
        secret.insert(FIELD_USER_ID.to_string(), Value::from(self.user_id.clone()));
        secret.insert(
            FIELD_EXPIRATION.to_string(),
            Value::from(format_expiration(self.expiration)?),
        );
        Ok(secret)
    }

    fn from_secret(key: &str, secret: &Secret) -> Result<Self> {
        let token = field(secret, FIELD_TOKEN).unwrap_or(key).to_string();
        let user_id = field(secret, FIELD_USER_ID)
            .ok_or_else(|| anyhow!("whitelist entry has no {FIELD_USER_ID}"))?
            .to_string();
        let expiration = field(secret, FIELD_EXPIRATION)
            .ok_or_else(|| anyhow!("whitelist entry has no {FIELD_EXPIRATION}"))?;
        let expiration = OffsetDateTime::parse(expiration, &Rfc3339)
            .with_context(|| format!("invalid whitelist expiration: {expiration}"))?;

        Ok(Self {
            token,
            user_id,
            expiration,
        })
    }
}

/// RFC 3339, UTC, whole seconds; sorts lexicographically.
fn format_expiration(expiration: OffsetDateTime) -> Result<String> {
    let utc = expiration
        .to_offset(time::UtcOffset::UTC)
        .replace_nanosecond(0)
        .context("failed to truncate expiration")?;
    utc.format(&Rfc3339).context("failed to format expiration")
}

#[derive(Debug, Clone)]
pub struct Whitelist {
    store: Arc<dyn SecretStore>,
}

impl Whitelist {
    #[must_use]
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    #[instrument(name = "whitelist.put", skip(self, entry), fields(user_id = %entry.user_id))]
    pub async fn put(&self, entry: &Entry) -> Result<()> {
        self.store
            .write_secret(WHITELIST_COLLECTION, &entry.token, entry.to_secret()?)
            .await
    }

    #[instrument(name = "whitelist.get", skip_all)]
    pub async fn get(&self, token: &str) -> Result<Option<Entry>> {
        self.store
            .read_secret(WHITELIST_COLLECTION, token)
            .await?
            .map(|secret| Entry::from_secret(token, &secret))
            .transpose()
    }

    #[instrument(name = "whitelist.delete", skip_all)]
    pub async fn delete(&self, token: &str) -> Result<()> {
        self.store.delete_secret(WHITELIST_COLLECTION, token).await
    }

    /// Delete every entry owned by `user_id`. Stops at the first failure; entries
    /// already deleted stay deleted.
    #[instrument(name = "whitelist.delete_all", skip(self))]
    pub async fn delete_all(&self, user_id: &str) -> Result<usize> {
        self.delete_where(|entry| entry.user_id == user_id).await
    }

    /// Delete every entry whose expiration has passed.
    #[instrument(name = "whitelist.delete_expired", skip(self))]
    pub async fn delete_expired(&self) -> Result<usize> {
        let now = OffsetDateTime::now_utc();
        self.delete_where(|entry| entry.is_expired(now)).await
    }

    async fn delete_where<F>(&self, predicate: F) -> Result<usize>
    where
        F: Fn(&Entry) -> bool + Send + Sync,
    {
        let mut deleted = 0;

        for key in self.store.list_keys(WHITELIST_COLLECTION).await? {
            // Gone between list and read: someone else already deleted it.
            let Some(entry) = self.get(&key).await? else {
                continue;
            };

            if predicate(&entry) {
                self.delete(&key).await?;
                deleted += 1;
            }
        }

        debug!("deleted {} whitelist entries", deleted);

        Ok(deleted)
    }
}

/// Delete expired entries, logging the outcome instead of returning it.
#[instrument(name = "whitelist.sweep", skip_all)]
pub async fn sweep(whitelist: &Whitelist) {
    match whitelist.delete_expired().await {
        Ok(deleted) => debug!(whitelist.deleted = deleted, "expired whitelist entries removed"),
        Err(e) => error!("Failed to delete expired whitelist entries: {e:#}"),
    }
}

/// Run [`sweep`] in the background.
pub fn spawn_sweep(whitelist: Whitelist) -> JoinHandle<()> {
    tokio::spawn(async move { sweep(&whitelist).await })
}

/// Sweep expired entries every `every`, for the lifetime of the process. A
/// sweep outlasting the interval delays the next one rather than stacking up.
pub fn spawn_periodic_sweep(whitelist: Whitelist, every: Duration) -> JoinHandle<()> {
    info!("Sweeping expired whitelist entries every {} seconds", every.as_secs());

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweep(&whitelist).await;
        }
    })
}
