//! [`SecretStore`] over Vault KV version 1 engines, one engine per collection,
//! addressed as `/v1/<collection>/<key>`.

use crate::{
    cli::globals::GlobalArgs,
    store::{Secret, SecretStore},
    vault,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{info_span, Instrument};
use url::Url;

#[derive(Clone)]
pub struct VaultStore {
    client: Client,
    base_url: Url,
    token: SecretString,
}

impl std::fmt::Debug for VaultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultStore")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"***")
            .finish()
    }
}

impl VaultStore {
    /// # Errors
    /// Returns an error if the Vault URL is invalid or the HTTP client cannot be built.
    pub fn new(globals: &GlobalArgs) -> Result<Self> {
        let base_url = Url::parse(&vault::endpoint_url(&globals.vault_url, "/v1")?)?;

        Ok(Self {
            client: vault::client()?,
            base_url,
            token: globals.vault_token.clone(),
        })
    }

    /// `/v1/<collection>[/<key>]`, each part percent-encoded as one segment.
    fn secret_url(&self, collection: &str, key: Option<&str>) -> Result<Url> {
        if key.is_some_and(|key| !addressable(key)) {
            return Err(anyhow!("invalid key for {collection}"));
        }

        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| anyhow!("Vault URL cannot be a base"))?;
            segments.pop_if_empty().push(collection);
            if let Some(key) = key {
                segments.push(key);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("X-Vault-Token", self.token.expose_secret())
    }
}

/// Keys that would be dropped or resolved as dot segments cannot name a secret.
fn addressable(key: &str) -> bool {
    !matches!(key, "" | "." | "..")
}

#[async_trait]
impl SecretStore for VaultStore {
    async fn read_secret(&self, collection: &str, key: &str) -> Result<Option<Secret>> {
        if !addressable(key) {
            return Ok(None);
        }
        let url = self.secret_url(collection, Some(key))?;
        // keys may be tokens, keep them out of spans
        let span = info_span!("vault.kv.read", http.method = "GET", collection);

        let response = self
            .request(Method::GET, url)
            .send()
            .instrument(span)
            .await
            .map_err(reqwest::Error::without_url)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(vault::response_error(&format!("read {collection}"), response).await);
        }

        let json: Value = response
            .json()
            .await
            .map_err(reqwest::Error::without_url)?;
        match json.get("data") {
            Some(Value::Object(data)) => Ok(Some(data.clone())),
            _ => Err(anyhow!("vault kv read of {collection}: response has no data")),
        }
    }

    async fn write_secret(&self, collection: &str, key: &str, data: Secret) -> Result<()> {
        let url = self.secret_url(collection, Some(key))?;
        let span = info_span!("vault.kv.write", http.method = "POST", collection);

        let response = self
            .request(Method::POST, url)
            .json(&data)
            .send()
            .instrument(span)
            .await
            .map_err(reqwest::Error::without_url)?;

        if !response.status().is_success() {
            return Err(vault::response_error(&format!("write {collection}"), response).await);
        }

        Ok(())
    }

    async fn delete_secret(&self, collection: &str, key: &str) -> Result<()> {
        // nothing can be stored under such a key
        if !addressable(key) {
            return Ok(());
        }
        let url = self.secret_url(collection, Some(key))?;
        let span = info_span!("vault.kv.delete", http.method = "DELETE", collection);

        let response = self
            .request(Method::DELETE, url)
            .send()
            .instrument(span)
            .await
            .map_err(reqwest::Error::without_url)?;

        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(vault::response_error(&format!("delete {collection}"), response).await);
        }

        Ok(())
    }

    async fn list_keys(&self, collection: &str) -> Result<Vec<String>> {
        let url = self.secret_url(collection, None)?;
        let span = info_span!("vault.kv.list", http.method = "LIST", collection);
        let list = Method::from_bytes(b"LIST").context("invalid LIST method")?;

        let response = self.request(list, url).send().instrument(span).await?;

        // Vault answers 404 for a collection without keys
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(vault::response_error(&format!("list {collection}"), response).await);
        }

        let json: Value = response.json().await?;
        let keys = json["data"]["keys"]
            .as_array()
            .map(|keys| {
                keys.iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(keys)
    }
}
