// Shared Cryptographic Primitives
// Basic cryptographic functions shared across the execution boundary

//! # Crypto Primitives
//!
//! Shared hashing, HMAC, and random-number primitives used by the execution
//! boundary for content hashing and keyed approval signatures.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use sha2::{Digest, Sha256, Sha512};
use blake3::Hasher as Blake3Hasher;
use ring::{hmac, rand as ring_rand};

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("Signature verification failed")]
    SignatureVerificationFailed,
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),
    #[error("Hash computation failed: {0}")]
    HashFailed(String),
}

/// Hash algorithms supported by the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
    Blake3,
}

/// Cryptographic hash result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hash {
    pub algorithm: HashAlgorithm,
    pub bytes: Vec<u8>,
}

impl Hash {
    /// Create a new hash
    pub fn new(algorithm: HashAlgorithm, bytes: Vec<u8>) -> Self {
        Hash { algorithm, bytes }
    }

    /// Get hash as hex string
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Create hash from hex string
    pub fn from_hex(algorithm: HashAlgorithm, hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| CryptoError::HashFailed(format!("Invalid hex: {}", e)))?;
        Ok(Hash::new(algorithm, bytes))
    }
}

/// Hash data using specified algorithm
pub fn hash_data(data: &[u8], algorithm: HashAlgorithm) -> Result<Hash, CryptoError> {
    let bytes = match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(data);
            hasher.finalize().to_vec()
        }
        HashAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            hasher.update(data);
            hasher.finalize().to_vec()
        }
        HashAlgorithm::Blake3 => {
            let mut hasher = Blake3Hasher::new();
            hasher.update(data);
            hasher.finalize().as_bytes().to_vec()
        }
    };

    Ok(Hash::new(algorithm, bytes))
}

/// HMAC key for message authentication
#[derive(Debug, Clone)]
pub struct HmacKey {
    key: hmac::Key,
}

impl HmacKey {
    /// Generate a new HMAC key
    pub fn generate() -> Result<Self, CryptoError> {
        let rng = ring_rand::SystemRandom::new();
        let key = hmac::Key::generate(hmac::HMAC_SHA256, &rng)
            .map_err(|e| CryptoError::KeyGenerationFailed(format!("HMAC key generation failed: {:?}", e)))?;
        Ok(HmacKey { key })
    }

    /// Create HMAC key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let key = hmac::Key::new(hmac::HMAC_SHA256, bytes);
        HmacKey { key }
    }

    /// Sign data with HMAC
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        hmac::sign(&self.key, data).as_ref().to_vec()
    }

    /// Verify HMAC signature
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        hmac::verify(&self.key, data, signature).is_ok()
    }
}

/// Secure random number generation
pub struct SecureRandom {
    rng: ring_rand::SystemRandom,
}

impl SecureRandom {
    /// Create new secure random generator
    pub fn new() -> Self {
        SecureRandom {
            rng: ring_rand::SystemRandom::new(),
        }
    }

    /// Fill buffer with random bytes
    pub fn fill(&self, dest: &mut [u8]) -> Result<(), CryptoError> {
        ring_rand::SecureRandom::fill(&self.rng, dest)
            .map_err(|e| CryptoError::KeyGenerationFailed(format!("Random generation failed: {:?}", e)))
    }

    /// Generate random bytes
    pub fn generate_bytes(&self, len: usize) -> Result<Vec<u8>, CryptoError> {
        let mut bytes = vec![0u8; len];
        self.fill(&mut bytes)?;
        Ok(bytes)
    }
}

impl Default for SecureRandom {
    fn default() -> Self {
        Self::new()
    }
}
