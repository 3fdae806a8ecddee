//! Identity card signing and the provider key it is checked against.

use super::{cookie::extract_refresh_token, json};
use crate::{
    api::AppState,
    delegation::{AdmissionProof, SignedAssertion, SIGNATURE_ALGORITHM},
    error::{Error, Result},
};
use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Extension},
    http::HeaderMap,
    response::Json,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Body when a valid refresh cookie already identifies the caller.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SessionSignRequest {
    #[serde(default)]
    public_key: String,
}

/// Body when the caller has no session and proves identity with credentials.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CredentialSignRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    public_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderKey {
    pub public_key: String,
    pub algorithm: String,
}

/// `POST /key/sign`: sign `{identity, publicKey}` for a session holder or for a
/// caller presenting valid credentials.
pub async fn sign(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<SignedAssertion>> {
    let (proof, public_key) = match session_subject(&state, &headers).await? {
        Some(subject) => {
            let request: SessionSignRequest = json::decode(body)?;
            (AdmissionProof::Session { subject }, request.public_key)
        }
        None => {
            let request: CredentialSignRequest = json::decode(body)?;
            if request.email.trim().is_empty()
                && request.password.is_empty()
                && !request.public_key.trim().is_empty()
            {
                return Err(Error::validation(
                    "no email or password, only a public key was given",
                ));
            }
            (
                AdmissionProof::Credentials {
                    email: request.email,
                    password: SecretString::from(request.password),
                },
                request.public_key,
            )
        }
    };

    if public_key.trim().is_empty() {
        return Err(Error::validation("empty public key"));
    }

    let identity = proof.resolve(state.credentials()).await?;

    let delegation = state.delegation().clone();
    let signer_identity = identity.clone();
    let assertion =
        tokio::task::spawn_blocking(move || delegation.sign(&signer_identity, &public_key))
            .await
            .context("identity card signing task failed")??;

    info!(user = %identity, "identity card signed");

    Ok(Json(assertion))
}

/// `GET /key/show`: the public half of the identity signing key.
pub async fn show(Extension(state): Extension<Arc<AppState>>) -> Json<ProviderKey> {
    Json(ProviderKey {
        public_key: state.delegation().public_key_pem().to_string(),
        algorithm: SIGNATURE_ALGORITHM.to_string(),
    })
}

/// The subject of the refresh cookie, if one is present and valid. An invalid
/// cookie is not an error here: the caller falls back to credentials.
async fn session_subject(state: &AppState, headers: &HeaderMap) -> Result<Option<String>> {
    let Some(token) = extract_refresh_token(headers) else {
        return Ok(None);
    };

    match state.tokens().validate_refresh_token(&token).await {
        Ok(subject) => Ok(Some(subject)),
        Err(Error::Unauthorized(reason)) => {
            debug!(%reason, "refresh cookie not usable, expecting credentials");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
