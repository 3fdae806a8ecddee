//! Login, refresh and logout.

use super::{
    cookie::{clear_refresh_cookie, extract_refresh_token, refresh_cookie},
    json,
};
use crate::{
    api::AppState,
    error::{AuthFailure, Error, Result},
    whitelist,
};
use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, QueryRejection},
        Extension, Query,
    },
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutParams {
    all: Option<String>,
}

impl LogoutParams {
    fn everywhere(&self) -> bool {
        self.all.as_deref() == Some("true")
    }
}

/// `POST /login`: check credentials, return an access token in the body and a
/// refresh token in the `token` cookie.
pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<impl IntoResponse> {
    let request: LoginRequest = json::decode(body)?;
    let password = SecretString::from(request.password);

    let identity = state
        .credentials()
        .authenticate(&request.email, &password)
        .await?;

    // access first: it stores nothing, so a failure leaves no whitelist entry behind
    let access_token = state.tokens().issue_access_token(&identity)?;
    let (refresh_token, expiration) = state.tokens().issue_refresh_token(&identity).await?;

    let cookie = refresh_cookie(state.cookies(), &refresh_token, expiration)
        .context("failed to build refresh cookie")?;

    whitelist::spawn_sweep(state.whitelist().clone());

    info!(user = %identity, "login");

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);

    Ok((
        StatusCode::OK,
        headers,
        Json(TokenResponse {
            token: access_token,
        }),
    ))
}

/// `GET /refresh`: exchange the refresh cookie for a new access token. The
/// refresh token itself is not rotated.
pub async fn refresh(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>> {
    let token = extract_refresh_token(&headers).ok_or(AuthFailure::MissingToken)?;

    let subject = state.tokens().validate_refresh_token(&token).await?;
    let access_token = state.tokens().issue_access_token(&subject)?;

    debug!(user = %subject, "access token refreshed");

    Ok(Json(TokenResponse {
        token: access_token,
    }))
}

/// `DELETE /login[?all=true]`: revoke the presented refresh token, or every
/// refresh token of its owner.
pub async fn logout(
    Extension(state): Extension<Arc<AppState>>,
    params: Result<Query<LogoutParams>, QueryRejection>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let Query(params) = params.map_err(|rejection| Error::malformed(rejection.body_text()))?;
    let token = extract_refresh_token(&headers).ok_or(AuthFailure::MissingToken)?;

    if params.everywhere() {
        let subject = state.tokens().validate_refresh_token(&token).await?;
        let deleted = state
            .whitelist()
            .delete_all(&subject)
            .await
            .context("failed to revoke refresh tokens")?;

        info!(user = %subject, deleted, "logout everywhere");
    } else {
        state
            .whitelist()
            .delete(&token)
            .await
            .context("failed to revoke refresh token")?;

        debug!("logout");
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        SET_COOKIE,
        clear_refresh_cookie(state.cookies()).context("failed to build cookie")?,
    );

    Ok((StatusCode::OK, response_headers))
}
