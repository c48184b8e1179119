//! Opening sealed containers

use tracing::debug;

use crate::crypto::{ChunkCipher, Digests, RecipientPrivateKey, MD5_LEN, SHA1_LEN};
use crate::error::{PackError, PackResult};

const PREFIX_LEN: usize = MD5_LEN + SHA1_LEN;

/// A container after unwrapping and decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedContainer {
    /// Digests from the container prefix, verified against `manifest`
    pub digests: Digests,
    /// Plaintext manifest bytes
    pub manifest: Vec<u8>,
}

/// Split, unwrap, decrypt and verify a container.
///
/// Any digest mismatch between the stored prefix and the recomputed
/// plaintext is a [`PackError::Crypto`].
pub fn open_container(bytes: &[u8], private_key: &RecipientPrivateKey) -> PackResult<OpenedContainer> {
    let wrapped_len = private_key.wrapped_key_len();
    if bytes.len() < PREFIX_LEN + wrapped_len {
        return Err(PackError::Format(format!(
            "Container is {} bytes, shorter than its {}-byte header",
            bytes.len(),
            PREFIX_LEN + wrapped_len
        )));
    }

    let digests = Digests::from_prefix(&bytes[..PREFIX_LEN])?;
    let wrapped = &bytes[PREFIX_LEN..PREFIX_LEN + wrapped_len];
    let ciphertext = &bytes[PREFIX_LEN + wrapped_len..];

    let key = private_key.decrypt(wrapped)?;
    let mut manifest = Vec::new();
    ChunkCipher::from_slice(&key)?.decrypt_stream(ciphertext, &mut manifest)?;

    let actual = Digests::of_bytes(&manifest);
    if actual.md5 != digests.md5 {
        return Err(PackError::Crypto(format!(
            "Manifest MD5 mismatch: stored {}, computed {}",
            digests.md5_hex(),
            actual.md5_hex()
        )));
    }
    if actual.sha1 != digests.sha1 {
        return Err(PackError::Crypto(format!(
            "Manifest SHA-1 mismatch: stored {}, computed {}",
            digests.sha1_hex(),
            actual.sha1_hex()
        )));
    }

    debug!(manifest_len = manifest.len(), "Opened container");
    Ok(OpenedContainer { digests, manifest })
}
