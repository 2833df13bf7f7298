//! In-place AES-128 encryption of finalized segment files.
//!
//! Every segment is encrypted with the session key and an IV derived from
//! its sequence index alone, so a player holding the key can decrypt any
//! segment without extra per-segment state.

pub mod cipher;

pub use cipher::{AES_BLOCK_SIZE, Aes128Cbc, SegmentCipher};

use crate::error::{Result, SinkError};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, error, info};

/// IV for a segment: zero except the last four bytes, which carry the
/// sequence index big-endian.
pub fn derive_iv(sequence_index: u32) -> [u8; AES_BLOCK_SIZE] {
    let mut iv = [0u8; AES_BLOCK_SIZE];
    iv[AES_BLOCK_SIZE - 4..].copy_from_slice(&sequence_index.to_be_bytes());
    iv
}

/// Holds the session key and encrypts segment files with it.
#[derive(Debug, Default)]
pub struct SegmentEncryptor {
    key: [u8; AES_BLOCK_SIZE],
    loaded: bool,
}

impl SegmentEncryptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: [u8; AES_BLOCK_SIZE]) -> Self {
        Self { key, loaded: true }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Read the 16-byte key from `path`.
    ///
    /// A short key file is reported as [`SinkError::InvalidKeyLength`]; the
    /// bytes that were read still replace the head of the key buffer and the
    /// tail keeps its previous contents (zero for a fresh encryptor), and the
    /// key counts as loaded. A missing or unreadable file leaves the
    /// encryptor untouched.
    pub fn load_key(&mut self, path: &Path) -> Result<()> {
        let mut file = fs::File::open(path).map_err(|source| SinkError::KeyFile {
            path: path.to_path_buf(),
            source,
        })?;

        let mut buf = [0u8; AES_BLOCK_SIZE];
        let mut read = 0;
        while read < AES_BLOCK_SIZE {
            match file.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(SinkError::KeyFile {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }

        self.key[..read].copy_from_slice(&buf[..read]);
        self.loaded = true;

        if read != AES_BLOCK_SIZE {
            error!("Invalid encryption key {}: only {} bytes", path.display(), read);
            return Err(SinkError::InvalidKeyLength(read));
        }

        info!("Loaded encryption key from {}", path.display());
        Ok(())
    }

    /// Encrypt the segment at `path` in place with the IV for `sequence_index`.
    pub fn encrypt_segment(&self, path: &Path, sequence_index: u32) -> Result<()> {
        if !self.loaded {
            return Err(SinkError::KeyNotLoaded);
        }

        let mut cipher = Aes128Cbc::default();
        cipher.set_key(&self.key);
        cipher.set_iv(&derive_iv(sequence_index));
        encrypt_file(path, &cipher)
    }
}

/// Encrypt a whole file through `cipher` and atomically replace it.
///
/// The ciphertext is written to a temporary file next to the original and
/// renamed over it only once fully written; on any failure the original is
/// left as it was.
pub fn encrypt_file(path: &Path, cipher: &impl SegmentCipher) -> Result<()> {
    let io_err = |source| SinkError::SegmentIo {
        path: path.to_path_buf(),
        source,
    };

    let plaintext = fs::read(path).map_err(io_err)?;
    let ciphertext = cipher.encrypt_block_stream(&plaintext)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&ciphertext).map_err(io_err)?;
    tmp.as_file().sync_data().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    debug!(
        plaintext = plaintext.len(),
        ciphertext = ciphertext.len(),
        "Encrypted segment {}",
        path.display()
    );
    Ok(())
}

/// Decrypt a segment produced by [`SegmentEncryptor::encrypt_segment`].
pub fn decrypt_segment(
    ciphertext: &[u8],
    key: &[u8; AES_BLOCK_SIZE],
    sequence_index: u32,
) -> Result<Vec<u8>> {
    Aes128Cbc::new(key, &derive_iv(sequence_index)).decrypt_block_stream(ciphertext)
}
