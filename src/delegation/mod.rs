//! Identity delegation: the provider vouches that a public key belongs to an
//! authenticated identity by signing an [`IdentityCard`].

pub mod card;

pub use card::{verify_assertion, IdentityCard, SignedAssertion, VerifyError};

use crate::{
    credentials::CredentialVerifier,
    error::{Error, Result},
};
use anyhow::Context;
use rsa::{
    pkcs1v15::{Signature, SigningKey},
    pkcs8::{EncodePublicKey, LineEnding},
    signature::{SignatureEncoding, Signer},
    RsaPrivateKey, RsaPublicKey,
};
use secrecy::SecretString;
use sha2::Sha256;
use tracing::instrument;

/// Name of the signature scheme, as published next to the public key.
pub const SIGNATURE_ALGORITHM: &str = "RS256";

/// How the caller proved who they are.
#[derive(Debug)]
pub enum AdmissionProof {
    /// A refresh token that already validated to this subject.
    Session { subject: String },
    /// An email and password still to be checked.
    Credentials {
        email: String,
        password: SecretString,
    },
}

impl AdmissionProof {
    /// Resolve the proof into the identity to put on the card.
    ///
    /// # Errors
    /// Propagates credential verification failures.
    pub async fn resolve(self, credentials: &CredentialVerifier) -> Result<String> {
        match self {
            Self::Session { subject } => Ok(subject),
            Self::Credentials { email, password } => {
                credentials.authenticate(&email, &password).await
            }
        }
    }
}

#[derive(Clone)]
pub struct DelegationService {
    signing_key: SigningKey<Sha256>,
    public_key: RsaPublicKey,
    public_key_pem: String,
}

impl std::fmt::Debug for DelegationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationService")
            .field("signing_key", &"***")
            .field("public_key_pem", &self.public_key_pem)
            .finish()
    }
}

impl DelegationService {
    /// # Errors
    /// Returns an error if the public key cannot be encoded.
    pub fn new(private_key: RsaPrivateKey) -> anyhow::Result<Self> {
        let public_key = private_key.to_public_key();
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .context("failed to encode identity public key")?;

        Ok(Self {
            signing_key: SigningKey::<Sha256>::new(private_key),
            public_key,
            public_key_pem,
        })
    }

    #[must_use]
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// SubjectPublicKeyInfo PEM of the provider key.
    #[must_use]
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Sign the card binding `identity` to `public_key`.
    ///
    /// # Errors
    /// `Validation` if either part is empty, `Internal` if serialization or
    /// signing fails.
    #[instrument(name = "delegation.sign", skip(self, public_key))]
    pub fn sign(&self, identity: &str, public_key: &str) -> Result<SignedAssertion> {
        if identity.is_empty() {
            return Err(Error::validation("empty user id"));
        }
        if public_key.trim().is_empty() {
            return Err(Error::validation("empty public key"));
        }

        let card = IdentityCard {
            identity: identity.to_string(),
            public_key: public_key.to_string(),
        };
        let content = card.to_bytes().context("failed to serialize identity card")?;

        let signature: Signature = self
            .signing_key
            .try_sign(&content)
            .context("failed to sign identity card")?;

        Ok(SignedAssertion {
            content,
            signature: signature.to_vec(),
        })
    }
}
