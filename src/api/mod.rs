use crate::{
    api::handlers::{delegation, health, json, session},
    cli::globals::GlobalArgs,
    vault, whitelist,
};
use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
    Extension, Router,
};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

pub mod handlers;
mod state;

pub use state::AppState;

const REQUEST_ID: &str = "x-request-id";

/// Build the router with every route and the request-id, tracing and body
/// limit layers.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health).options(health::health))
        .route("/login", post(session::login).delete(session::logout))
        .route("/refresh", get(session::refresh))
        .route("/key/sign", post(delegation::sign))
        .route("/key/show", get(delegation::show))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(json::body_limit())
                .layer(Extension(state)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    globals: &GlobalArgs,
    state: Arc<AppState>,
    sweep_interval: Option<Duration>,
) -> Result<()> {
    // Renew vault token, gracefully shutdown if failed
    let (tx, mut rx) = mpsc::unbounded_channel();

    if globals.vault_token_renewable {
        vault::renew::try_renew(globals, tx.clone()).await?;
    }

    if let Some(every) = sweep_interval {
        whitelist::spawn_periodic_sweep(state.whitelist().clone(), every);
    }

    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = rx.recv() => info!("Vault token could not be renewed"),
                _ = signal::ctrl_c() => info!("Interrupted"),
            }
            info!("Gracefully shutdown");
        })
        .await?;

    drop(tx);

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
