use crate::{
    api::handlers::cookie::CookiePolicy, credentials::CredentialVerifier,
    delegation::DelegationService, store::SecretStore, token::TokenService,
    whitelist::Whitelist,
};
use std::sync::Arc;

/// Services shared by every request. Built once at startup; nothing here is
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct AppState {
    store: Arc<dyn SecretStore>,
    tokens: TokenService,
    credentials: CredentialVerifier,
    delegation: Arc<DelegationService>,
    cookies: CookiePolicy,
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Arc<dyn SecretStore>,
        tokens: TokenService,
        credentials: CredentialVerifier,
        delegation: DelegationService,
    ) -> Self {
        Self {
            store,
            tokens,
            credentials,
            delegation: Arc::new(delegation),
            cookies: CookiePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_cookie_policy(mut self, cookies: CookiePolicy) -> Self {
        self.cookies = cookies;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SecretStore> {
        &self.store
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub fn whitelist(&self) -> &Whitelist {
        self.tokens.whitelist()
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialVerifier {
        &self.credentials
    }

    #[must_use]
    pub fn delegation(&self) -> &Arc<DelegationService> {
        &self.delegation
    }

    #[must_use]
    pub fn cookies(&self) -> CookiePolicy {
        self.cookies
    }
}
