//! One-way, keyed tokens for user and node names.
//!
//! A token is the first [`TOKEN_BYTES`] bytes of `HMAC-SHA256(secret, value)`, hex encoded. Same
//! secret and value always give the same token, so tokens can be grouped on and compared across
//! runs. 64 bits are plenty for grouping a day of jobs, but they are *not* meant to withstand
//! somebody brute-forcing the mapping at scale.

use std::fmt::{self, Debug};

use derive_more::derive::{Deref, Display, Into};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;

/// Bytes of the MAC kept in a token, i.e. 16 hex characters.
pub const TOKEN_BYTES: usize = 8;

type HmacSha256 = Hmac<Sha256>;

/// Key material for the [`Anonymizer`]. Neither `Debug` nor anything else prints it.
#[derive(Clone)]
pub struct AnonSecret(Vec<u8>);

impl AnonSecret {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, AnonymizerError> {
        let secret = secret.into();
        if secret.iter().all(u8::is_ascii_whitespace) {
            return Err(AnonymizerError::EmptySecret);
        }
        Ok(AnonSecret(secret))
    }
}

impl Debug for AnonSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AnonSecret(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deref, Into, Display, Serialize)]
#[serde(transparent)]
pub struct AnonToken(String);

#[derive(Clone)]
pub struct Anonymizer {
    mac: HmacSha256,
}

impl Anonymizer {
    pub fn new(secret: AnonSecret) -> Result<Self, AnonymizerError> {
        let mac = HmacSha256::new_from_slice(&secret.0).map_err(|_| AnonymizerError::InvalidKey)?;
        Ok(Self { mac })
    }

    /// Shorthand for `Anonymizer::new(AnonSecret::new(secret)?)`.
    pub fn from_secret(secret: impl Into<Vec<u8>>) -> Result<Self, AnonymizerError> {
        Self::new(AnonSecret::new(secret)?)
    }

    pub fn anonymize(&self, value: &str) -> AnonToken {
        let mut mac = self.mac.clone();
        mac.update(value.as_bytes());
        let digest = mac.finalize().into_bytes();
        AnonToken(hex::encode(&digest[..TOKEN_BYTES]))
    }
}

impl Debug for Anonymizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Anonymizer").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnonymizerError {
    #[error("anonymization secret is empty")]
    EmptySecret,
    #[error("anonymization secret cannot be used as HMAC key")]
    InvalidKey,
}
