//! Chunked symmetric encryption using AES-128-GCM
//!
//! Bulk payloads are sealed in fixed 1 MiB chunks. Every chunk is encrypted
//! on its own: the only thing tying chunk `n` to the stream is its nonce,
//! which encodes the chunk index and whether it is the final chunk.
//!
//! # Wire Format
//!
//! ```text
//! +---------------------------+---------------------------+-----+------------------------+
//! | chunk 0 (1 MiB + 16 tag)  | chunk 1 (1 MiB + 16 tag)  | ... | final chunk (<=1 MiB+16)|
//! +---------------------------+---------------------------+-----+------------------------+
//!
//! nonce(chunk) = [final_flag (1)] [0 (3)] [index (u64 BE, 8)]
//! ```
//!
//! An empty input still produces one (empty) final chunk so that a stream
//! truncated to nothing is rejected.

use std::io::{self, Read, Write};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Nonce,
};
use rand::RngCore;

use crate::error::{PackError, PackResult};

/// Symmetric key size in bytes (AES-128)
pub const KEY_SIZE: usize = 16;

/// Plaintext bytes per chunk (1 MiB)
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// GCM authentication tag appended to every chunk
pub const TAG_SIZE: usize = 16;

/// Nonce size for AES-GCM (12 bytes)
pub const NONCE_SIZE: usize = 12;

const SEALED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_SIZE;
const FINAL_FLAG: u8 = 0x01;

/// Chunk cipher holding an AES-128-GCM instance for one symmetric key.
///
/// # Example
///
/// ```
/// use apppack_core::crypto::ChunkCipher;
///
/// let key = ChunkCipher::generate_key();
/// let cipher = ChunkCipher::new(&key);
///
/// let mut sealed = Vec::new();
/// cipher.encrypt_stream(&b"payload"[..], &mut sealed).unwrap();
///
/// let mut opened = Vec::new();
/// cipher.decrypt_stream(sealed.as_slice(), &mut opened).unwrap();
/// assert_eq!(opened, b"payload");
/// ```
pub struct ChunkCipher {
    cipher: Aes128Gcm,
}

impl ChunkCipher {
    /// Create a cipher from a 16-byte key.
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes128Gcm::new(key.into()),
        }
    }

    /// Create a cipher from untrusted key bytes (e.g. an unwrapped key).
    pub fn from_slice(key: &[u8]) -> PackResult<Self> {
        if key.len() != KEY_SIZE {
            return Err(PackError::Crypto(format!(
                "symmetric key must be {} bytes, got {}",
                KEY_SIZE,
                key.len()
            )));
        }
        let cipher = Aes128Gcm::new_from_slice(key)
            .map_err(|e| PackError::Crypto(format!("Invalid key: {}", e)))?;
        Ok(Self { cipher })
    }

    /// Generate a fresh random 16-byte key.
    ///
    /// Draws from the thread-local CSPRNG, which is seeded from the OS.
    pub fn generate_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut key);
        key
    }

    /// Seal a single chunk.
    pub fn encrypt_chunk(&self, index: u64, last: bool, plaintext: &[u8]) -> PackResult<Vec<u8>> {
        let nonce = chunk_nonce(index, last);
        self.cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| PackError::Crypto(format!("Encryption failed: {}", e)))
    }

    /// Open a single chunk sealed with [`encrypt_chunk`](Self::encrypt_chunk).
    pub fn decrypt_chunk(&self, index: u64, last: bool, ciphertext: &[u8]) -> PackResult<Vec<u8>> {
        let nonce = chunk_nonce(index, last);
        self.cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| PackError::Crypto(format!("Decryption failed at chunk {}", index)))
    }

    /// Encrypt `src` into `dst` in 1 MiB chunks.
    ///
    /// Short reads are coalesced so chunk boundaries only depend on the
    /// payload length. Returns the number of ciphertext bytes written.
    pub fn encrypt_stream<R: Read, W: Write>(&self, mut src: R, mut dst: W) -> PackResult<u64> {
        let mut current = vec![0u8; CHUNK_SIZE];
        let mut next = vec![0u8; CHUNK_SIZE];
        let mut current_len = read_full(&mut src, &mut current)?;
        let mut index = 0u64;
        let mut written = 0u64;

        loop {
            // Look one chunk ahead to learn whether this one is final
            let next_len = if current_len == CHUNK_SIZE {
                read_full(&mut src, &mut next)?
            } else {
                0
            };
            let last = next_len == 0;

            let sealed = self.encrypt_chunk(index, last, &current[..current_len])?;
            dst.write_all(&sealed)?;
            written += sealed.len() as u64;

            if last {
                break;
            }
            std::mem::swap(&mut current, &mut next);
            current_len = next_len;
            index += 1;
        }

        dst.flush()?;
        Ok(written)
    }

    /// Decrypt a stream produced by [`encrypt_stream`](Self::encrypt_stream).
    ///
    /// Fails on a tampered, reordered or truncated stream. Returns the number
    /// of plaintext bytes written.
    pub fn decrypt_stream<R: Read, W: Write>(&self, mut src: R, mut dst: W) -> PackResult<u64> {
        let mut current = vec![0u8; SEALED_CHUNK_SIZE];
        let mut next = vec![0u8; SEALED_CHUNK_SIZE];
        let mut current_len = read_full(&mut src, &mut current)?;
        let mut index = 0u64;
        let mut written = 0u64;

        loop {
            if current_len < TAG_SIZE {
                return Err(PackError::Crypto(format!(
                    "Ciphertext truncated at chunk {}",
                    index
                )));
            }
            let next_len = if current_len == SEALED_CHUNK_SIZE {
                read_full(&mut src, &mut next)?
            } else {
                0
            };
            let last = next_len == 0;

            let plain = self.decrypt_chunk(index, last, &current[..current_len])?;
            dst.write_all(&plain)?;
            written += plain.len() as u64;

            if last {
                break;
            }
            std::mem::swap(&mut current, &mut next);
            current_len = next_len;
            index += 1;
        }

        dst.flush()?;
        Ok(written)
    }
}

/// Ciphertext length produced by [`ChunkCipher::encrypt_stream`] for a
/// plaintext of `plaintext_len` bytes.
pub fn sealed_len(plaintext_len: u64) -> u64 {
    let chunk = CHUNK_SIZE as u64;
    let chunks = if plaintext_len == 0 {
        1
    } else {
        plaintext_len.div_ceil(chunk)
    };
    plaintext_len + chunks * TAG_SIZE as u64
}

fn chunk_nonce(index: u64, last: bool) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    if last {
        nonce[0] = FINAL_FLAG;
    }
    nonce[4..].copy_from_slice(&index.to_be_bytes());
    nonce
}

/// Fill `buf` from `reader` until it is full or the reader is exhausted.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Convenience functions for one-off encryption with a given key.
pub mod stateless {
    use super::*;

    /// Encrypt a stream with `key`.
    pub fn encrypt_stream<R: Read, W: Write>(
        key: &[u8; KEY_SIZE],
        src: R,
        dst: W,
    ) -> PackResult<u64> {
        ChunkCipher::new(key).encrypt_stream(src, dst)
    }

    /// Decrypt a stream with `key`.
    pub fn decrypt_stream<R: Read, W: Write>(
        key: &[u8; KEY_SIZE],
        src: R,
        dst: W,
    ) -> PackResult<u64> {
        ChunkCipher::new(key).decrypt_stream(src, dst)
    }

    /// Encrypt an in-memory buffer.
    pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> PackResult<Vec<u8>> {
        let mut out = Vec::with_capacity(sealed_len(plaintext.len() as u64) as usize);
        encrypt_stream(key, plaintext, &mut out)?;
        Ok(out)
    }

    /// Decrypt an in-memory buffer.
    pub fn decrypt(key: &[u8; KEY_SIZE], ciphertext: &[u8]) -> PackResult<Vec<u8>> {
        let mut out = Vec::with_capacity(ciphertext.len());
        decrypt_stream(key, ciphertext, &mut out)?;
        Ok(out)
    }
}
