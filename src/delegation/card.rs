//! Identity cards and their signatures, from the relying party's side too.

use base64::{engine::general_purpose::STANDARD, Engine};
use rsa::{
    pkcs1v15::{Signature, VerifyingKey},
    signature::Verifier,
    RsaPublicKey,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use thiserror::Error;

/// Binds an identity to a public key it controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IdentityCard {
    pub identity: String,
    pub public_key: String,
}

impl IdentityCard {
    /// Compact JSON with a fixed field order; these are the signed bytes.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// The serialized card and an RSASSA-PKCS1-v1_5/SHA-256 signature over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAssertion {
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid identity card")]
    Card(#[from] serde_json::Error),
}

/// Check an assertion against the provider's public key and return the card.
///
/// # Errors
/// `InvalidSignature` if any byte of content or signature was altered, `Card`
/// if the signed content is not an identity card.
pub fn verify_assertion(
    provider_key: &RsaPublicKey,
    assertion: &SignedAssertion,
) -> Result<IdentityCard, VerifyError> {
    let verifying_key = VerifyingKey::<Sha256>::new(provider_key.clone());
    let signature = Signature::try_from(assertion.signature.as_slice())
        .map_err(|_| VerifyError::InvalidSignature)?;
    verifying_key
        .verify(&assertion.content, &signature)
        .map_err(|_| VerifyError::InvalidSignature)?;

    Ok(serde_json::from_slice(&assertion.content)?)
}

mod base64_bytes {
    use super::{Deserialize, Deserializer, Engine, Serializer, STANDARD};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
