//! # Tessera (session tokens and identity delegation)
//!
//! `tessera` issues, validates and revokes session credentials and vouches for
//! third-party public keys with signed identity cards.
//!
//! ## Tokens
//!
//! - **Access token:** short-lived `ES384` JWT, never stored and never revoked.
//! - **Refresh token:** long-lived `HS512` JWT, usable only while its exact string
//!   is present in the revocation whitelist. Logging out deletes the entry.
//!
//! Both tokens carry the same claim set (`sub`, `iss`, `iat`, `nbf`, `exp`, `jti`)
//! and are signed with independent keys held in the secret store.
//!
//! ## Identity delegation
//!
//! An authenticated caller submits a public key; the provider answers with the
//! `{identity, publicKey}` card and an RSA signature over it, which relying parties
//! verify offline with the provider's published key.
//!
//! ## Storage
//!
//! Keys, user password hashes and the whitelist live in a key-value secret store
//! (HashiCorp Vault KV in production, see [`store::SecretStore`]).

pub mod api;
pub mod cli;
pub mod credentials;
pub mod delegation;
pub mod error;
pub mod keys;
pub mod store;
pub mod token;
pub mod vault;
pub mod whitelist;

pub use error::{AuthFailure, Error};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
