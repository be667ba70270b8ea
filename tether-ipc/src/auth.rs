//! Pre-shared key challenge/response
//!
//! This is an authorization formality between cooperating processes, not
//! transport security: frames are never encrypted.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

use crate::error::IpcError;

/// Environment variable used to hand the key to a launched worker
pub const AUTHKEY_ENV_VAR: &str = "TETHER_AUTHKEY";

const CHALLENGE_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Shared secret known to both the host and the worker
#[derive(Clone, PartialEq, Eq)]
pub struct AuthKey(Vec<u8>);

impl AuthKey {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self(key.into())
    }

    /// Read the key from [`AUTHKEY_ENV_VAR`], if set and non-empty
    pub fn from_env() -> Option<Self> {
        std::env::var(AUTHKEY_ENV_VAR)
            .ok()
            .filter(|value| !value.is_empty())
            .map(Self::new)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key as text, for handing to a child process environment
    pub fn to_env_value(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    /// Base64 HMAC-SHA256 of the decoded challenge
    pub fn answer(&self, challenge: &str) -> Result<String, IpcError> {
        let nonce = decode_challenge(challenge)?;
        let mut mac = self.mac()?;
        mac.update(&nonce);
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Check a client's answer in constant time
    pub fn verify(&self, challenge: &str, digest: &str) -> Result<(), IpcError> {
        let nonce = decode_challenge(challenge)?;
        let digest = STANDARD
            .decode(digest)
            .map_err(|e| IpcError::AuthenticationFailed(format!("malformed digest: {}", e)))?;

        let mut mac = self.mac()?;
        mac.update(&nonce);
        mac.verify_slice(&digest)
            .map_err(|_| IpcError::AuthenticationFailed("digest mismatch".to_string()))
    }

    fn mac(&self) -> Result<HmacSha256, IpcError> {
        HmacSha256::new_from_slice(&self.0)
            .map_err(|e| IpcError::AuthenticationFailed(format!("unusable key: {}", e)))
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthKey(<redacted>)")
    }
}

impl From<&str> for AuthKey {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl From<String> for AuthKey {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

/// Fresh random challenge, base64 encoded
pub fn new_challenge() -> String {
    let nonce: [u8; CHALLENGE_BYTES] = rand::random();
    STANDARD.encode(nonce)
}

fn decode_challenge(challenge: &str) -> Result<Vec<u8>, IpcError> {
    STANDARD
        .decode(challenge)
        .map_err(|e| IpcError::InvalidMessage(format!("malformed challenge: {}", e)))
}
