use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};

use crate::errors::CoreError;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Argon2id parameters for key derivation.
/// Stored next to every ciphertext so they can be raised later without
/// breaking existing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MB)
    pub memory_cost: u32,
    /// Number of iterations (default: 3)
    pub time_cost: u32,
    /// Degree of parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost: 65_536, // 64 MB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Reject parameters that would let a crafted file exhaust memory or CPU.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(8..=1_048_576).contains(&self.memory_cost) {
            return Err(CoreError::InvalidFileFormat(format!(
                "KDF memory_cost out of safe range: {} KiB (expected 8..1048576)",
                self.memory_cost
            )));
        }
        if !(1..=20).contains(&self.time_cost) {
            return Err(CoreError::InvalidFileFormat(format!(
                "KDF time_cost out of safe range: {} (expected 1..20)",
                self.time_cost
            )));
        }
        if !(1..=16).contains(&self.parallelism) {
            return Err(CoreError::InvalidFileFormat(format!(
                "KDF parallelism out of safe range: {} (expected 1..16)",
                self.parallelism
            )));
        }
        Ok(())
    }
}

/// Derive a 256-bit key from a passphrase using Argon2id.
/// The salt must be random and unique per sealed value.
pub fn derive_key(passphrase: &str, salt: &[u8; SALT_LEN], params: &KdfParams) -> Result<[u8; 32], CoreError> {
    let argon2_params = Params::new(params.memory_cost, params.time_cost, params.parallelism, Some(32))
        .map_err(|e| CoreError::Encryption(format!("Invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| CoreError::Encryption(format!("Argon2 key derivation failed: {e}")))?;

    Ok(key)
}

/// AES-256-GCM. The returned ciphertext carries the 16-byte tag.
pub fn encrypt(plaintext: &[u8], key: &[u8; 32], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>, CoreError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CoreError::Encryption(format!("Failed to create cipher: {e}")))?;

    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CoreError::Encryption(format!("Encryption failed: {e}")))
}

/// Returns `CoreError::Decryption` on a wrong key or tampered data.
pub fn decrypt(ciphertext: &[u8], key: &[u8; 32], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>, CoreError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CoreError::Encryption(format!("Failed to create cipher: {e}")))?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CoreError::Decryption)
}

pub fn generate_salt() -> Result<[u8; SALT_LEN], CoreError> {
    let mut salt = [0u8; SALT_LEN];
    getrandom::getrandom(&mut salt)
        .map_err(|e| CoreError::Encryption(format!("Failed to generate random salt: {e}")))?;
    Ok(salt)
}

pub fn generate_nonce() -> Result<[u8; NONCE_LEN], CoreError> {
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| CoreError::Encryption(format!("Failed to generate random nonce: {e}")))?;
    Ok(nonce)
}

// ── Credential sealing ──────────────────────────────────────────────

/// Seals individual secret strings (exchange API secrets) at rest.
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CoreError>;
    fn decrypt(&self, sealed: &str) -> Result<String, CoreError>;

    /// Whether values produced by `encrypt` differ from their input.
    fn is_encrypting(&self) -> bool;
}

/// Identity cipher for deployments without a credential passphrase.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCipher;

impl CredentialCipher for PlainCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CoreError> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, sealed: &str) -> Result<String, CoreError> {
        Ok(sealed.to_string())
    }

    fn is_encrypting(&self) -> bool {
        false
    }
}

/// Argon2id + AES-256-GCM.
///
/// Sealed form: `hex(salt[16] ‖ nonce[12] ‖ ciphertext+tag)`. A fresh salt
/// and nonce are drawn for every value.
pub struct PasswordCipher {
    passphrase: String,
    params: KdfParams,
}

impl std::fmt::Debug for PasswordCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordCipher")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl PasswordCipher {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self::with_params(passphrase, KdfParams::default())
    }

    pub fn with_params(passphrase: impl Into<String>, params: KdfParams) -> Self {
        Self {
            passphrase: passphrase.into(),
            params,
        }
    }
}

impl CredentialCipher for PasswordCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CoreError> {
        let salt = generate_salt()?;
        let nonce = generate_nonce()?;
        let key = derive_key(&self.passphrase, &salt, &self.params)?;
        let ciphertext = encrypt(plaintext.as_bytes(), &key, &nonce)?;

        let mut sealed = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&salt);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }

    fn decrypt(&self, sealed: &str) -> Result<String, CoreError> {
        let raw = hex::decode(sealed.trim()).map_err(|_| CoreError::Decryption)?;
        if raw.len() <= SALT_LEN + NONCE_LEN {
            return Err(CoreError::Decryption);
        }

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&raw[..SALT_LEN]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&raw[SALT_LEN..SALT_LEN + NONCE_LEN]);

        let key = derive_key(&self.passphrase, &salt, &self.params)?;
        let plaintext = decrypt(&raw[SALT_LEN + NONCE_LEN..], &key, &nonce)?;
        String::from_utf8(plaintext).map_err(|_| CoreError::Decryption)
    }

    fn is_encrypting(&self) -> bool {
        true
    }
}
