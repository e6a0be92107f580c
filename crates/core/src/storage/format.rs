use crate::errors::CoreError;
use super::encryption::KdfParams;

/// Magic bytes identifying a portfolio store file.
pub const MAGIC: &[u8; 4] = b"CPST";

/// Current file format version.
pub const CURRENT_VERSION: u16 = 1;

const FLAG_ENCRYPTED: u8 = 0b0000_0001;

/// magic(4) + version(2) + flags(1) + payload_len(8)
pub const MIN_HEADER_SIZE: usize = 15;

/// kdf_params(12) + salt(16) + nonce(12)
const SEAL_HEADER_SIZE: usize = 40;

/// Key-derivation material present when the payload is encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealHeader {
    pub kdf_params: KdfParams,
    pub salt: [u8; 16],
    pub nonce: [u8; 12],
}

#[derive(Debug)]
pub struct FileHeader {
    pub version: u16,
    pub seal: Option<SealHeader>,
    pub payload_len: u64,
}

/// Serialize a store image.
///
/// Layout:
/// ```text
/// [CPST: 4B] [version: 2B LE] [flags: 1B]
/// if flags & ENCRYPTED:
///   [memory_cost: 4B LE] [time_cost: 4B LE] [parallelism: 4B LE]
///   [salt: 16B] [nonce: 12B]
/// [payload_len: 8B LE] [payload: variable]
/// ```
/// The payload is the bincode image, or its AES-GCM ciphertext when sealed.
pub fn write_file(version: u16, seal: Option<&SealHeader>, payload: &[u8]) -> Vec<u8> {
    let seal_size = if seal.is_some() { SEAL_HEADER_SIZE } else { 0 };
    let mut buf = Vec::with_capacity(MIN_HEADER_SIZE + seal_size + payload.len());

    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&version.to_le_bytes());
    buf.push(if seal.is_some() { FLAG_ENCRYPTED } else { 0 });

    if let Some(seal) = seal {
        buf.extend_from_slice(&seal.kdf_params.memory_cost.to_le_bytes());
        buf.extend_from_slice(&seal.kdf_params.time_cost.to_le_bytes());
        buf.extend_from_slice(&seal.kdf_params.parallelism.to_le_bytes());
        buf.extend_from_slice(&seal.salt);
        buf.extend_from_slice(&seal.nonce);
    }

    buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn read_u32(data: &[u8], offset: &mut usize, what: &str) -> Result<u32, CoreError> {
    let bytes = data
        .get(*offset..*offset + 4)
        .and_then(|s| <[u8; 4]>::try_from(s).ok())
        .ok_or_else(|| CoreError::InvalidFileFormat(format!("Failed to read {what}")))?;
    *offset += 4;
    Ok(u32::from_le_bytes(bytes))
}

/// Parse the header and return it with the payload slice.
pub fn read_file(data: &[u8]) -> Result<(FileHeader, &[u8]), CoreError> {
    if data.len() < MIN_HEADER_SIZE {
        return Err(CoreError::InvalidFileFormat(
            "File too small to be a store file".into(),
        ));
    }

    if &data[0..4] != MAGIC {
        return Err(CoreError::InvalidFileFormat(
            "Invalid magic bytes, not a store file".into(),
        ));
    }

    let mut offset = 4;
    let version = u16::from_le_bytes([data[offset], data[offset + 1]]);
    offset += 2;

    if version == 0 || version > CURRENT_VERSION {
        return Err(CoreError::UnsupportedVersion(version));
    }

    let flags = data[offset];
    offset += 1;

    let seal = if flags & FLAG_ENCRYPTED != 0 {
        if data.len() < MIN_HEADER_SIZE + SEAL_HEADER_SIZE {
            return Err(CoreError::InvalidFileFormat(
                "File too small for an encrypted store header".into(),
            ));
        }
        let memory_cost = read_u32(data, &mut offset, "KDF memory_cost")?;
        let time_cost = read_u32(data, &mut offset, "KDF time_cost")?;
        let parallelism = read_u32(data, &mut offset, "KDF parallelism")?;
        let kdf_params = KdfParams {
            memory_cost,
            time_cost,
            parallelism,
        };
        kdf_params.validate()?;

        let mut salt = [0u8; 16];
        salt.copy_from_slice(&data[offset..offset + 16]);
        offset += 16;
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&data[offset..offset + 12]);
        offset += 12;

        Some(SealHeader {
            kdf_params,
            salt,
            nonce,
        })
    } else {
        None
    };

    let payload_len = data
        .get(offset..offset + 8)
        .and_then(|s| <[u8; 8]>::try_from(s).ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| CoreError::InvalidFileFormat("Failed to read payload length".into()))?;
    offset += 8;

    let available = (data.len() - offset) as u64;
    if available < payload_len {
        return Err(CoreError::InvalidFileFormat(format!(
            "File truncated: expected {payload_len} bytes of payload, got {available}"
        )));
    }

    let payload = &data[offset..offset + payload_len as usize];
    Ok((
        FileHeader {
            version,
            seal,
            payload_len,
        },
        payload,
    ))
}
