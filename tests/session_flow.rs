use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use rsa::{pkcs8::DecodePublicKey, RsaPublicKey};
use serde_json::{json, Value};
use std::sync::Arc;
use tessera::{
    api::{self, handlers::cookie::CookiePolicy, AppState},
    credentials::CredentialVerifier,
    delegation::{verify_assertion, DelegationService, SignedAssertion},
    keys::{decode_identity_key, SessionKeys},
    store::{MemoryStore, Secret, SecretStore, USERS_COLLECTION, WHITELIST_COLLECTION},
    token::{Claims, TokenConfig, TokenService, DEFAULT_ISSUER},
    whitelist::{Entry, Whitelist},
};
use time::OffsetDateTime;
use tower::ServiceExt;

const EC_PRIVATE_KEY: &str = include_str!("fixtures/ec_private.pem");
const EC_PUBLIC_KEY: &str = include_str!("fixtures/ec_public.pem");
const RSA_PRIVATE_KEY: &str = include_str!("fixtures/rsa_private.pem");
const RSA_PUBLIC_KEY: &str = include_str!("fixtures/rsa_public.pem");

const EMAIL: &str = "alice@example.com";
const PASSWORD: &str = "correct horse battery staple";

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
}

impl TestApp {
    async fn new() -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        seed_user(&store).await?;

        Ok(Self {
            router: router_over(store.clone())?,
            store,
        })
    }

    async fn send(&self, request: Request<Body>) -> Result<Response> {
        Ok(self.router.clone().oneshot(request).await?)
    }

    async fn login(&self) -> Result<(String, String)> {
        let response = self
            .send(json_request(
                Method::POST,
                "/login",
                None,
                &json!({ "email": EMAIL, "password": PASSWORD }),
            )?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = refresh_cookie(&response)?;
        let body = body_json(response).await?;
        let access = body["token"]
            .as_str()
            .ok_or_else(|| anyhow!("no access token in {body}"))?
            .to_string();

        Ok((access, cookie))
    }

    async fn whitelisted(&self) -> Result<usize> {
        Ok(self.store.list_keys(WHITELIST_COLLECTION).await?.len())
    }
}

async fn seed_user(store: &MemoryStore) -> Result<()> {
    let user = json!({ "password": bcrypt::hash(PASSWORD, 4)? });
    store
        .write_secret(
            USERS_COLLECTION,
            EMAIL,
            user.as_object().cloned().ok_or_else(|| anyhow!("not an object"))?,
        )
        .await
}

fn router_over(store: Arc<dyn SecretStore>) -> Result<Router> {
    let keys = SessionKeys::new(EC_PRIVATE_KEY.as_bytes(), b"integration-refresh-secret")?;
    let tokens = TokenService::new(keys, TokenConfig::default(), Whitelist::new(store.clone()));
    let credentials = CredentialVerifier::new(store.clone(), 4)?;
    let delegation = DelegationService::new(decode_identity_key(RSA_PRIVATE_KEY.as_bytes())?)?;

    let state = AppState::new(store, tokens, credentials, delegation)
        .with_cookie_policy(CookiePolicy::new(false));

    Ok(api::router(Arc::new(state)))
}

/// Reads from the wrapped store; every whitelist write fails.
#[derive(Debug)]
struct ReadOnlyWhitelist(Arc<MemoryStore>);

#[async_trait]
impl SecretStore for ReadOnlyWhitelist {
    async fn read_secret(&self, collection: &str, key: &str) -> Result<Option<Secret>> {
        self.0.read_secret(collection, key).await
    }

    async fn write_secret(&self, collection: &str, key: &str, data: Secret) -> Result<()> {
        if collection == WHITELIST_COLLECTION {
            return Err(anyhow!("permission denied"));
        }
        self.0.write_secret(collection, key, data).await
    }

    async fn delete_secret(&self, collection: &str, key: &str) -> Result<()> {
        self.0.delete_secret(collection, key).await
    }

    async fn list_keys(&self, collection: &str) -> Result<Vec<String>> {
        self.0.list_keys(collection).await
    }
}

fn json_request(method: Method, uri: &str, cookie: Option<&str>, body: &Value) -> Result<Request<Body>> {
    raw_request(method, uri, cookie, body.to_string())
}

fn raw_request(
    method: Method,
    uri: &str,
    cookie: Option<&str>,
    body: impl Into<Body>,
) -> Result<Request<Body>> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, format!("token={cookie}"));
    }
    Ok(builder.body(body.into())?)
}

fn set_cookie(response: &Response) -> Result<String> {
    Ok(response
        .headers()
        .get(header::SET_COOKIE)
        .ok_or_else(|| anyhow!("no Set-Cookie header"))?
        .to_str()?
        .to_string())
}

fn refresh_cookie(response: &Response) -> Result<String> {
    let header = set_cookie(response)?;
    header
        .split(';')
        .next()
        .and_then(|pair| pair.strip_prefix("token="))
        .map(ToString::to_string)
        .ok_or_else(|| anyhow!("unexpected cookie {header}"))
}

async fn body_json(response: Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn error_message(response: Response) -> Result<String> {
    let body = body_json(response).await?;
    body["error"]["message"]
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| anyhow!("no error message in {body}"))
}

fn access_claims(token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::ES384);
    validation.set_issuer(&[DEFAULT_ISSUER]);
    let key = DecodingKey::from_ec_pem(EC_PUBLIC_KEY.as_bytes())?;
    Ok(decode::<Claims>(token, &key, &validation)?.claims)
}

#[tokio::test]
async fn login_refresh_logout() -> Result<()> {
    let app = TestApp::new().await?;

    let response = app
        .send(json_request(
            Method::POST,
            "/login",
            None,
            &json!({ "email": "  Alice@Example.COM ", "password": PASSWORD }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let cookie_header = set_cookie(&response)?;
    assert!(cookie_header.contains("HttpOnly"));
    assert!(cookie_header.contains("Secure"));
    assert!(cookie_header.contains("SameSite=Strict"));

    let cookie = refresh_cookie(&response)?;
    let body = body_json(response).await?;
    let claims = access_claims(body["token"].as_str().unwrap_or_default())?;
    assert_eq!(claims.sub, EMAIL);
    assert_eq!(claims.iss, DEFAULT_ISSUER);
    assert_eq!(claims.exp - claims.iat, 600);
    assert_eq!(app.whitelisted().await?, 1);

    let response = app
        .send(raw_request(Method::GET, "/refresh", Some(&cookie), Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(access_claims(body["token"].as_str().unwrap_or_default())?.sub, EMAIL);

    let response = app
        .send(raw_request(Method::DELETE, "/login", Some(&cookie), Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response)?.contains("Max-Age=0"));
    assert_eq!(app.whitelisted().await?, 0);

    let response = app
        .send(raw_request(Method::GET, "/refresh", Some(&cookie), Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_message(response).await?, "invalid credentials");
    Ok(())
}

#[tokio::test]
async fn failed_whitelist_write_issues_nothing() -> Result<()> {
    let memory = Arc::new(MemoryStore::new());
    seed_user(&memory).await?;
    let router = router_over(Arc::new(ReadOnlyWhitelist(memory.clone())))?;

    let response = router
        .oneshot(json_request(
            Method::POST,
            "/login",
            None,
            &json!({ "email": EMAIL, "password": PASSWORD }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!response.headers().contains_key(header::SET_COOKIE));

    let body = body_json(response).await?;
    assert!(body.get("token").is_none());
    assert_eq!(body["error"]["message"], "internal server error");
    assert!(memory.list_keys(WHITELIST_COLLECTION).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn login_sweeps_expired_entries() -> Result<()> {
    let app = TestApp::new().await?;
    let shared: Arc<dyn SecretStore> = app.store.clone();
    Whitelist::new(shared)
        .put(&Entry::new(
            "stale".to_string(),
            EMAIL.to_string(),
            OffsetDateTime::now_utc() - time::Duration::hours(1),
        ))
        .await?;

    app.login().await?;

    // the sweep runs detached from the request
    for _ in 0..100 {
        if app.whitelisted().await? == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }

    assert_eq!(app.whitelisted().await?, 1);
    assert!(app.store.read_secret(WHITELIST_COLLECTION, "stale").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn logout_everywhere_revokes_every_session() -> Result<()> {
    let app = TestApp::new().await?;

    let (_, first) = app.login().await?;
    let (_, second) = app.login().await?;
    assert_ne!(first, second);
    assert_eq!(app.whitelisted().await?, 2);

    let response = app
        .send(raw_request(Method::DELETE, "/login?all=true", Some(&first), Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.whitelisted().await?, 0);

    let response = app
        .send(raw_request(Method::GET, "/refresh", Some(&second), Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn refresh_and_logout_need_a_cookie() -> Result<()> {
    let app = TestApp::new().await?;

    let response = app
        .send(raw_request(Method::GET, "/refresh", None, Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(raw_request(Method::DELETE, "/login", None, Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(raw_request(Method::GET, "/refresh", Some("not-a-jwt"), Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn bad_logout_query_uses_error_envelope() -> Result<()> {
    let app = TestApp::new().await?;
    let (_, cookie) = app.login().await?;

    let response = app
        .send(raw_request(Method::DELETE, "/login?all=a&all=b", Some(&cookie), Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!error_message(response).await?.is_empty());

    // nothing was revoked
    assert_eq!(app.whitelisted().await?, 1);
    Ok(())
}

#[tokio::test]
async fn bad_logins_look_alike() -> Result<()> {
    let app = TestApp::new().await?;

    for body in [
        json!({ "email": EMAIL, "password": "wrong" }),
        json!({ "email": "bob@example.com", "password": PASSWORD }),
    ] {
        let response = app.send(json_request(Method::POST, "/login", None, &body)?).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!response.headers().contains_key(header::SET_COOKIE));
        assert_eq!(error_message(response).await?, "invalid credentials");
    }

    let response = app
        .send(json_request(Method::POST, "/login", None, &json!({ "password": PASSWORD }))?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await?, "empty user id");

    let response = app
        .send(json_request(Method::POST, "/login", None, &json!({ "email": EMAIL }))?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await?, "empty password");

    assert_eq!(app.whitelisted().await?, 0);
    Ok(())
}

#[tokio::test]
async fn malformed_bodies_are_explained() -> Result<()> {
    let app = TestApp::new().await?;

    let cases = [
        (String::new(), "request body cannot be empty"),
        (
            json!({ "email": EMAIL, "password": PASSWORD, "admin": true }).to_string(),
            "request body contains unknown field \"admin\"",
        ),
        (
            format!(r#"{{"email":"{EMAIL}"}}{{"email":"{EMAIL}"}}"#),
            "only one JSON object is allowed in the request body",
        ),
        (r#"{"email":"a""#.to_string(), "request body contains invalid JSON"),
    ];

    for (body, expected) in cases {
        let response = app.send(raw_request(Method::POST, "/login", None, body)?).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_message(response).await?, expected);
    }

    let oversized = format!(r#"{{"email":"{}"}}"#, "a".repeat(1024 * 1024));
    let response = app.send(raw_request(Method::POST, "/login", None, oversized)?).await?;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(
        error_message(response).await?,
        "request body is larger than maximum size of 1MB"
    );
    Ok(())
}

#[tokio::test]
async fn sign_with_credentials() -> Result<()> {
    let app = TestApp::new().await?;
    let provider = RsaPublicKey::from_public_key_pem(RSA_PUBLIC_KEY)?;

    let response = app
        .send(json_request(
            Method::POST,
            "/key/sign",
            None,
            &json!({ "email": EMAIL, "password": PASSWORD, "publicKey": "ssh-ed25519 AAAAC3Nz" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let assertion: SignedAssertion = serde_json::from_value(body_json(response).await?)?;
    let card = verify_assertion(&provider, &assertion)?;
    assert_eq!(card.identity, EMAIL);
    assert_eq!(card.public_key, "ssh-ed25519 AAAAC3Nz");

    // signing issues no session
    assert_eq!(app.whitelisted().await?, 0);
    Ok(())
}

#[tokio::test]
async fn sign_with_session() -> Result<()> {
    let app = TestApp::new().await?;
    let provider = RsaPublicKey::from_public_key_pem(RSA_PUBLIC_KEY)?;
    let (_, cookie) = app.login().await?;

    let response = app
        .send(json_request(
            Method::POST,
            "/key/sign",
            Some(&cookie),
            &json!({ "publicKey": "device-key" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let assertion: SignedAssertion = serde_json::from_value(body_json(response).await?)?;
    let card = verify_assertion(&provider, &assertion)?;
    assert_eq!(card.identity, EMAIL);
    assert_eq!(card.public_key, "device-key");
    Ok(())
}

#[tokio::test]
async fn sign_rejects_incomplete_requests() -> Result<()> {
    let app = TestApp::new().await?;

    let response = app
        .send(json_request(Method::POST, "/key/sign", None, &json!({ "publicKey": "pk" }))?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(json_request(
            Method::POST,
            "/key/sign",
            None,
            &json!({ "email": EMAIL, "password": PASSWORD, "publicKey": "  " }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await?, "empty public key");

    let response = app
        .send(json_request(
            Method::POST,
            "/key/sign",
            None,
            &json!({ "email": EMAIL, "password": "wrong", "publicKey": "pk" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // a revoked cookie falls back to credentials, which are missing here
    let (_, cookie) = app.login().await?;
    let response = app
        .send(raw_request(Method::DELETE, "/login", Some(&cookie), Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .send(json_request(
            Method::POST,
            "/key/sign",
            Some(&cookie),
            &json!({ "email": EMAIL, "password": "wrong", "publicKey": "pk" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn show_provider_key() -> Result<()> {
    let app = TestApp::new().await?;

    let response = app
        .send(raw_request(Method::GET, "/key/show", None, Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await?;
    assert_eq!(body["algorithm"], "RS256");
    let published = RsaPublicKey::from_public_key_pem(body["publicKey"].as_str().unwrap_or_default())?;
    assert_eq!(published, RsaPublicKey::from_public_key_pem(RSA_PUBLIC_KEY)?);
    Ok(())
}

#[tokio::test]
async fn health_reports_store() -> Result<()> {
    let app = TestApp::new().await?;

    let response = app
        .send(raw_request(Method::GET, "/health", None, Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));
    let body = body_json(response).await?;
    assert_eq!(body["name"], "tessera");
    assert_eq!(body["store"], "ok");

    let response = app
        .send(raw_request(Method::OPTIONS, "/health", None, Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    assert!(bytes.is_empty());
    Ok(())
}
