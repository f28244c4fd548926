//! Password hashing and verification for RCON authentication.
//!
//! Credentials are stored as a salted SHA-256 record, never as plain text.
//! The stored form is `base64(salt):base64(digest)`; a blank or absent
//! record disables authentication entirely (insecure mode, development
//! only). SHA-256 with a per-credential salt is acceptable for an
//! internal operator tool; deployments with stronger requirements can
//! provision the record out of band.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Salt length in bytes for newly generated records.
const SALT_LEN: usize = 16;

/// SHA-256 digest length in bytes.
const DIGEST_LEN: usize = 32;

/// A stored credential: per-credential salt plus the expected digest of
/// `SHA-256(salt || secret)`.
///
/// Immutable once constructed; the server installs at most one record at
/// startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRecord {
    salt: Vec<u8>,
    digest: Vec<u8>,
}

impl PasswordRecord {
    /// Hash a secret with a fresh random salt.
    ///
    /// Used offline (`rcon-server --hash-password`) to provision the
    /// credential entry for the configuration file.
    pub fn generate(secret: &str) -> Self {
        let mut salt = vec![0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let digest = hash_with_salt(secret, &salt);
        Self { salt, digest }
    }

    /// Parse the stored form `base64(salt):base64(digest)`.
    ///
    /// Any malformation (missing separator, undecodable base64, empty
    /// salt, wrong digest length) yields `None` rather than an error; a
    /// record that cannot be parsed can never verify a candidate.
    pub fn parse(stored: &str) -> Option<Self> {
        let (salt_b64, digest_b64) = stored.split_once(':')?;
        let salt = BASE64.decode(salt_b64).ok()?;
        let digest = BASE64.decode(digest_b64).ok()?;
        if salt.is_empty() || digest.len() != DIGEST_LEN {
            return None;
        }
        Some(Self { salt, digest })
    }

    /// Encode to the stored form `base64(salt):base64(digest)`.
    pub fn encode(&self) -> String {
        format!("{}:{}", BASE64.encode(&self.salt), BASE64.encode(&self.digest))
    }

    /// Verify a candidate secret against this record.
    ///
    /// The comparison runs in time independent of the number of matching
    /// leading bytes. The candidate is not logged and not retained beyond
    /// this call.
    pub fn verify(&self, candidate: &str) -> bool {
        let computed = hash_with_salt(candidate, &self.salt);
        computed.ct_eq(&self.digest).into()
    }
}

fn hash_with_salt(secret: &str, salt: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}
