use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;

use crate::errors::CoreError;

use super::encryption::{self, KdfParams};
use super::format::{self, SealHeader};
use super::record_store::StoreState;

/// Where committed store images go.
///
/// `commit` must be all-or-nothing: after an error the previously committed
/// image is still the one `load` returns.
pub trait Persistence: Send + Sync {
    /// The last committed image, `None` for a fresh store.
    fn load(&self) -> Result<Option<StoreState>, CoreError>;

    fn commit(&self, state: &StoreState) -> Result<(), CoreError>;
}

/// Keeps the last committed image in memory. Reopening a store over the same
/// instance sees everything committed before.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    image: Mutex<Option<StoreState>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self) -> Result<Option<StoreState>, CoreError> {
        let image = self
            .image
            .lock()
            .map_err(|_| CoreError::Transaction("memory image lock poisoned".into()))?;
        Ok(image.clone())
    }

    fn commit(&self, state: &StoreState) -> Result<(), CoreError> {
        let mut image = self
            .image
            .lock()
            .map_err(|_| CoreError::Transaction("memory image lock poisoned".into()))?;
        *image = Some(state.clone());
        Ok(())
    }
}

/// Single-file durable store.
///
/// Flow: StoreState → bincode → [AES-256-GCM(Argon2id(passphrase))] → CPST
/// bytes → temp file → fsync → rename over the store file.
pub struct FilePersistence {
    path: PathBuf,
    passphrase: Option<String>,
    kdf_params: KdfParams,
}

impl std::fmt::Debug for FilePersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePersistence")
            .field("path", &self.path)
            .field("encrypted", &self.passphrase.is_some())
            .finish()
    }
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            passphrase: None,
            kdf_params: KdfParams::default(),
        }
    }

    /// Seal the whole store file with `passphrase`.
    pub fn encrypted(path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        Self::new(path).with_passphrase(passphrase)
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf_params = params;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "store".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    pub fn encode(&self, state: &StoreState) -> Result<Vec<u8>, CoreError> {
        let plaintext = bincode::serialize(state)
            .map_err(|e| CoreError::Serialization(format!("Failed to serialize store: {e}")))?;

        match &self.passphrase {
            None => Ok(format::write_file(format::CURRENT_VERSION, None, &plaintext)),
            Some(passphrase) => {
                let salt = encryption::generate_salt()?;
                let nonce = encryption::generate_nonce()?;
                let key = encryption::derive_key(passphrase, &salt, &self.kdf_params)?;
                let ciphertext = encryption::encrypt(&plaintext, &key, &nonce)?;
                let seal = SealHeader {
                    kdf_params: self.kdf_params,
                    salt,
                    nonce,
                };
                Ok(format::write_file(format::CURRENT_VERSION, Some(&seal), &ciphertext))
            }
        }
    }

    pub fn decode(&self, data: &[u8]) -> Result<StoreState, CoreError> {
        let (header, payload) = format::read_file(data)?;

        let plaintext = match (&header.seal, &self.passphrase) {
            (None, _) => payload.to_vec(),
            (Some(seal), Some(passphrase)) => {
                let key = encryption::derive_key(passphrase, &seal.salt, &seal.kdf_params)?;
                encryption::decrypt(payload, &key, &seal.nonce)?
            }
            (Some(_), None) => return Err(CoreError::Decryption),
        };

        bincode::deserialize(&plaintext)
            .map_err(|e| CoreError::Deserialization(format!("Failed to deserialize store: {e}")))
    }
}

impl Persistence for FilePersistence {
    fn load(&self) -> Result<Option<StoreState>, CoreError> {
        if !self.path.exists() {
            debug!("no store file at {}, starting empty", self.path.display());
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path)?;
        self.decode(&bytes).map(Some)
    }

    fn commit(&self, state: &StoreState) -> Result<(), CoreError> {
        let bytes = self.encode(state)?;
        let tmp = self.temp_path();
        {
            use std::io::Write;
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}
