pub mod kv;
pub mod renew;

pub use kv::VaultStore;

use crate::APP_USER_AGENT;
use anyhow::{anyhow, Result};
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing::{debug, instrument};
use url::Url;

/// Build `scheme://host:port<endpoint>` from the configured Vault address,
/// dropping any path it carries.
#[instrument]
pub fn endpoint_url(vault_url: &str, endpoint: &str) -> Result<String> {
    let url = Url::parse(vault_url)?;

    let scheme = url.scheme();

    let host = url
        .host()
        .ok_or_else(|| anyhow!("Error parsing URL: no host specified"))?
        .to_owned();

    let port = match url.port() {
        Some(p) => p,
        None => match scheme {
            "http" => 80,
            "https" => 443,
            _ => return Err(anyhow!("Error parsing URL: unsupported scheme {}", scheme)),
        },
    };

    let endpoint_url = format!("{scheme}://{host}:{port}{endpoint}");

    debug!("endpoint URL: {}", endpoint_url);

    Ok(endpoint_url)
}

pub(crate) fn client() -> Result<Client> {
    Ok(Client::builder().user_agent(APP_USER_AGENT).build()?)
}

/// Turn an unsuccessful Vault response into an error carrying Vault's first
/// error message.
pub(crate) async fn response_error(context: &str, response: Response) -> anyhow::Error {
    let status = response.status();
    let message = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|json| json["errors"][0].as_str().map(ToString::to_string))
        .unwrap_or_default();

    anyhow!("{} - {}, {}", context, status, message)
}

/// Unwrap a wrapped AppRole secret id
/// Create wrapped token with:
/// vault write -wrap-ttl=300s -f auth/approle/role/tessera/secret-id
#[instrument(skip(token))]
pub async fn unwrap(vault_url: &str, token: &str) -> Result<String> {
    let unwrap_url = endpoint_url(vault_url, "/v1/sys/wrapping/unwrap")?;

    let response = client()?
        .post(&unwrap_url)
        .header("X-Vault-Token", token)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(response_error(&unwrap_url, response).await);
    }

    let json_response: Value = response.json().await?;
    let sid = json_response["data"]["secret_id"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no secret_id found"))?;

    Ok(sid.to_string())
}

/// Login to Vault using AppRole, returns the client token and its lease duration
/// Create a secret ID with:
/// vault write -f auth/approle/role/tessera/secret-id
#[instrument(skip(sid))]
pub async fn approle_login(vault_url: &str, sid: &str, rid: &str) -> Result<(String, u64)> {
    let login_url = endpoint_url(vault_url, "/v1/auth/approle/login")?;

    let login_payload = json!({
        "role_id": rid,
        "secret_id": sid
    });

    debug!("login URL: {}, role ID: {}", login_url, rid);

    let response = client()?.post(&login_url).json(&login_payload).send().await?;

    if !response.status().is_success() {
        return Err(response_error(&login_url, response).await);
    }

    let json_response: Value = response.json().await?;
    let token = json_response["auth"]["client_token"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no client_token found"))?;
    let lease_duration = json_response["auth"]["lease_duration"]
        .as_u64()
        .unwrap_or(1800);

    Ok((token.to_string(), lease_duration))
}
