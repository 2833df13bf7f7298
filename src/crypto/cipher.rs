#![forbid(unsafe_code)]

//! AES-128-CBC block stream cipher behind a small backend-neutral interface.

use aes::Aes128;
use cbc::{
    Decryptor, Encryptor,
    cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7},
};

use crate::error::{Result, SinkError};

/// AES block size in bytes. Keys and IVs are one block long.
pub const AES_BLOCK_SIZE: usize = 16;

/// Cipher operations the segment encryptor needs.
pub trait SegmentCipher {
    fn set_key(&mut self, key: &[u8; AES_BLOCK_SIZE]);

    fn set_iv(&mut self, iv: &[u8; AES_BLOCK_SIZE]);

    /// Encrypt a complete plaintext, PKCS#7-padding it to whole blocks.
    fn encrypt_block_stream(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
}

/// RustCrypto-backed AES-128-CBC.
#[derive(Clone, Default)]
pub struct Aes128Cbc {
    key: Option<[u8; AES_BLOCK_SIZE]>,
    iv: [u8; AES_BLOCK_SIZE],
}

impl Aes128Cbc {
    pub fn new(key: &[u8; AES_BLOCK_SIZE], iv: &[u8; AES_BLOCK_SIZE]) -> Self {
        Self {
            key: Some(*key),
            iv: *iv,
        }
    }

    /// Reverse of [`SegmentCipher::encrypt_block_stream`], stripping the padding.
    pub fn decrypt_block_stream(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let key = self.key.as_ref().ok_or(SinkError::KeyNotLoaded)?;
        let decryptor = Decryptor::<Aes128>::new(key.into(), (&self.iv).into());

        decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| SinkError::Cipher(format!("PKCS7 unpad failed: {e}")))
    }
}

impl SegmentCipher for Aes128Cbc {
    fn set_key(&mut self, key: &[u8; AES_BLOCK_SIZE]) {
        self.key = Some(*key);
    }

    fn set_iv(&mut self, iv: &[u8; AES_BLOCK_SIZE]) {
        self.iv = *iv;
    }

    fn encrypt_block_stream(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.key.as_ref().ok_or(SinkError::KeyNotLoaded)?;
        let encryptor = Encryptor::<Aes128>::new(key.into(), (&self.iv).into());

        Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
    }
}

impl std::fmt::Debug for Aes128Cbc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // key material stays out of logs
        f.debug_struct("Aes128Cbc")
            .field("key_set", &self.key.is_some())
            .field("iv", &self.iv)
            .finish()
    }
}
