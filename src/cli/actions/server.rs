use crate::{
    api::{self, handlers::cookie::CookiePolicy, AppState},
    cli::{
        commands::{session, vault::Auth, vault::Options as VaultOptions},
        globals::GlobalArgs,
    },
    credentials::CredentialVerifier,
    delegation::DelegationService,
    keys::{self, SessionKeys},
    store::SecretStore,
    token::{TokenConfig, TokenService},
    vault::{self as vault_api, VaultStore},
    whitelist::Whitelist,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub session: session::Options,
    pub vault: VaultOptions,
}

/// Log in to Vault, load keys and serve until interrupted.
///
/// # Errors
/// Returns an error if Vault login, key loading or the server fails.
pub async fn execute(args: Args) -> Result<()> {
    let globals = vault_login(&args.vault).await?;

    let store: Arc<dyn SecretStore> = Arc::new(VaultStore::new(&globals)?);

    let session_keys = SessionKeys::load(store.as_ref())
        .await
        .context("failed to load session keys")?;
    let identity_key =
        keys::load_identity_key(store.as_ref(), args.session.identity_key_path.as_deref())
            .await
            .context("failed to load identity key")?;

    let delegation = DelegationService::new(identity_key)?;
    let whitelist = Whitelist::new(store.clone());
    let tokens = TokenService::new(
        session_keys,
        TokenConfig::new(args.session.issuer.clone())
            .with_access_ttl(args.session.access_token_ttl)
            .with_refresh_ttl(args.session.refresh_token_ttl),
        whitelist,
    );
    let credentials = CredentialVerifier::new(store.clone(), bcrypt::DEFAULT_COST)?;

    let state = AppState::new(store, tokens, credentials, delegation)
        .with_cookie_policy(CookiePolicy::new(args.session.dev));

    info!(
        issuer = %args.session.issuer,
        dev = args.session.dev,
        "keys loaded"
    );

    api::new(
        args.port,
        &globals,
        Arc::new(state),
        args.session.sweep_interval,
    )
    .await
}

async fn vault_login(options: &VaultOptions) -> Result<GlobalArgs> {
    let mut globals = GlobalArgs::new(options.url.clone());

    match &options.auth {
        Auth::Token(token) => {
            globals.set_token(SecretString::from(token.clone()));
        }
        Auth::AppRole {
            role_id,
            secret_id,
            wrapped_token,
        } => {
            let secret_id = match (secret_id, wrapped_token) {
                (Some(sid), _) => sid.clone(),
                (None, Some(wrapped)) => vault_api::unwrap(&options.url, wrapped)
                    .await
                    .context("failed to unwrap secret id")?,
                (None, None) => anyhow::bail!("AppRole login needs a secret id"),
            };

            let (token, lease) = vault_api::approle_login(&options.url, &secret_id, role_id)
                .await
                .context("Vault AppRole login failed")?;

            debug!(lease, "Vault token obtained");

            globals.set_token(SecretString::from(token));
            globals.vault_token_renewable = true;
        }
    }

    Ok(globals)
}
