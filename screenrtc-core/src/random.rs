//! Injectable cryptographically secure randomness
//!
//! Both the endpoint path segment and the session peer identity are the only
//! access control around a session, so they must come from a secure source.
//! The source is passed in explicitly instead of being a process-wide global,
//! which lets tests substitute deterministic or failing generators.

use crate::error::ScreenRtcError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Length of generated path segments and peer identities, in characters
pub const TOKEN_LENGTH: usize = 40;

/// Source of cryptographically secure random bytes
pub trait SecureRandom: Send + Sync {
    /// Fill `dest` entirely or fail with [`ScreenRtcError::RandomSource`]
    fn fill(&self, dest: &mut [u8]) -> Result<(), ScreenRtcError>;
}

/// Operating system randomness (`getrandom` under the hood)
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSecureRandom;

impl SecureRandom for OsSecureRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<(), ScreenRtcError> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| ScreenRtcError::RandomSource {
                reason: e.to_string(),
            })
    }
}

/// Generate a base64url (unpadded) token of exactly `len` characters
pub fn random_token(rng: &dyn SecureRandom, len: usize) -> Result<String, ScreenRtcError> {
    // Every 3 bytes encode to 4 characters
    let byte_len = (len * 3).div_ceil(4);
    let mut bytes = vec![0u8; byte_len];
    rng.fill(&mut bytes)?;

    let mut token = URL_SAFE_NO_PAD.encode(&bytes);
    token.truncate(len);
    Ok(token)
}
