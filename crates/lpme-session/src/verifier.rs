//! Verification of the shared API key that gates session creation.
//!
//! The game process proves it is allowed to open a session by presenting a
//! key. The server never stores that key, only an Argon2id hash of it, and
//! checks candidates against the hash. Argon2id is memory-hard and
//! deliberately slow, so verification is CPU-bound: the
//! [`SessionManager`](crate::SessionManager) always runs it on Tokio's
//! blocking pool, never on a request-handling worker.
//!
//! # Why a trait?
//!
//! [`TokenVerifier`] lets tests (and unusual deployments) swap in a
//! different check without touching the manager. [`Argon2Verifier`] is the
//! production implementation.

use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;

use crate::SessionError;

/// Checks a candidate key against a stored secret.
///
/// # Contract
///
/// - `Ok(true)`: the key matches.
/// - `Ok(false)`: the key does not match, including malformed input of any
///   kind. A mismatch is an answer, not an error.
/// - `Err(SessionError::Verification)`: the verifier itself is broken
///   (corrupt hash, internal fault). Callers log this separately from a
///   rejected key.
///
/// The method is synchronous on purpose: implementations are expected to be
/// CPU-bound, and the caller decides where that work runs.
pub trait TokenVerifier: Send + Sync + 'static {
    /// Verifies `candidate` against the stored secret.
    fn verify(&self, candidate: &[u8]) -> Result<bool, SessionError>;
}

// ---------------------------------------------------------------------------
// VerifierConfig
// ---------------------------------------------------------------------------

/// Argon2id cost parameters used when hashing a key.
///
/// Verification always uses the parameters embedded in the stored hash, so
/// these only matter for [`Argon2Verifier::hash_key`]. The defaults follow
/// the OWASP baseline for Argon2id (19 MiB, 2 passes, 1 lane).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes over memory.
    pub iterations: u32,
    /// Degree of parallelism (lanes).
    pub parallelism: u32,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl VerifierConfig {
    fn params(&self) -> Result<Params, SessionError> {
        Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| SessionError::InvalidKeyHash(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Argon2Verifier
// ---------------------------------------------------------------------------

/// A [`TokenVerifier`] backed by an Argon2id PHC hash string
/// (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`).
#[derive(Clone)]
pub struct Argon2Verifier {
    encoded: String,
}

impl Argon2Verifier {
    /// Wraps a stored Argon2id hash.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidKeyHash`] if `encoded` is not a PHC
    /// string or uses an algorithm other than Argon2id.
    pub fn new(encoded: impl Into<String>) -> Result<Self, SessionError> {
        let encoded = encoded.into();
        let parsed = PasswordHash::new(&encoded)
            .map_err(|e| SessionError::InvalidKeyHash(e.to_string()))?;
        if parsed.algorithm != argon2::ARGON2ID_IDENT {
            return Err(SessionError::InvalidKeyHash(format!(
                "expected argon2id, got {}",
                parsed.algorithm
            )));
        }
        Ok(Self { encoded })
    }

    /// Hashes `key` with a fresh random salt and the given cost parameters,
    /// returning a PHC string suitable for [`Argon2Verifier::new`].
    pub fn hash_key(key: &str, config: &VerifierConfig) -> Result<String, SessionError> {
        let mut salt_bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| SessionError::Verification(e.to_string()))?;

        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, config.params()?);
        let hash = argon
            .hash_password(key.as_bytes(), &salt)
            .map_err(|e| SessionError::Verification(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// Builds a verifier directly from a plaintext key.
    ///
    /// Convenient for development servers and tests; production setups
    /// should hash the key once, offline, and ship only the hash.
    pub fn from_key(key: &str, config: &VerifierConfig) -> Result<Self, SessionError> {
        Self::new(Self::hash_key(key, config)?)
    }
}

impl std::fmt::Debug for Argon2Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Argon2Verifier").finish_non_exhaustive()
    }
}

impl TokenVerifier for Argon2Verifier {
    fn verify(&self, candidate: &[u8]) -> Result<bool, SessionError> {
        let hash = PasswordHash::new(&self.encoded)
            .map_err(|e| SessionError::Verification(e.to_string()))?;

        match Argon2::default().verify_password(candidate, &hash) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(SessionError::Verification(e.to_string())),
        }
    }
}
