//! MD5 / SHA-1 digests over byte streams

use std::io::{self, Read};

use md5::{Digest, Md5};
use sha1::Sha1;

use crate::error::{PackError, PackResult};

/// MD5 digest length in bytes
pub const MD5_LEN: usize = 16;

/// SHA-1 digest length in bytes
pub const SHA1_LEN: usize = 20;

const READ_BUFFER: usize = 64 * 1024;

/// Digest algorithms used for package integrity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// 16-byte MD5
    Md5,
    /// 20-byte SHA-1
    Sha1,
}

impl DigestAlgorithm {
    /// Output length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            DigestAlgorithm::Md5 => MD5_LEN,
            DigestAlgorithm::Sha1 => SHA1_LEN,
        }
    }
}

/// Stream `reader` through the named digest.
pub fn digest_reader<R: Read>(reader: R, algorithm: DigestAlgorithm) -> PackResult<Vec<u8>> {
    let digests = Digests::of_reader(reader)?;
    Ok(match algorithm {
        DigestAlgorithm::Md5 => digests.md5.to_vec(),
        DigestAlgorithm::Sha1 => digests.sha1.to_vec(),
    })
}

/// The MD5/SHA-1 pair that prefixes a container and identifies a delivered payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Digests {
    pub md5: [u8; MD5_LEN],
    pub sha1: [u8; SHA1_LEN],
}

impl Digests {
    /// Compute both digests in one pass over `reader`.
    pub fn of_reader<R: Read>(mut reader: R) -> PackResult<Self> {
        let mut md5 = Md5::new();
        let mut sha1 = Sha1::new();
        let mut buf = vec![0u8; READ_BUFFER];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PackError::Io(e)),
            };
            md5.update(&buf[..n]);
            sha1.update(&buf[..n]);
        }
        Ok(Self {
            md5: md5.finalize().into(),
            sha1: sha1.finalize().into(),
        })
    }

    /// Compute both digests over an in-memory buffer.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self {
            md5: Md5::digest(data).into(),
            sha1: Sha1::digest(data).into(),
        }
    }

    /// Parse the 36-byte `MD5 ‖ SHA-1` prefix.
    pub fn from_prefix(prefix: &[u8]) -> PackResult<Self> {
        if prefix.len() < MD5_LEN + SHA1_LEN {
            return Err(PackError::Format(format!(
                "digest prefix needs {} bytes, got {}",
                MD5_LEN + SHA1_LEN,
                prefix.len()
            )));
        }
        let mut md5 = [0u8; MD5_LEN];
        let mut sha1 = [0u8; SHA1_LEN];
        md5.copy_from_slice(&prefix[..MD5_LEN]);
        sha1.copy_from_slice(&prefix[MD5_LEN..MD5_LEN + SHA1_LEN]);
        Ok(Self { md5, sha1 })
    }

    /// `MD5 ‖ SHA-1` as written at the head of a container.
    pub fn to_prefix(&self) -> [u8; MD5_LEN + SHA1_LEN] {
        let mut out = [0u8; MD5_LEN + SHA1_LEN];
        out[..MD5_LEN].copy_from_slice(&self.md5);
        out[MD5_LEN..].copy_from_slice(&self.sha1);
        out
    }

    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5)
    }

    pub fn sha1_hex(&self) -> String {
        hex::encode(self.sha1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        let digests = Digests::of_bytes(b"abc");
        assert_eq!(digests.md5_hex(), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(digests.sha1_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_reader_matches_bytes() {
        let data: Vec<u8> = (0..200_000).map(|i| (i % 256) as u8).collect();
        let streamed = Digests::of_reader(data.as_slice()).unwrap();
        assert_eq!(streamed, Digests::of_bytes(&data));
    }

    #[test]
    fn test_digest_reader_lengths() {
        let md5 = digest_reader(&b""[..], DigestAlgorithm::Md5).unwrap();
        let sha1 = digest_reader(&b""[..], DigestAlgorithm::Sha1).unwrap();
        assert_eq!(md5.len(), DigestAlgorithm::Md5.output_len());
        assert_eq!(sha1.len(), DigestAlgorithm::Sha1.output_len());
        assert_eq!(hex::encode(md5), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_prefix_roundtrip() {
        let digests = Digests::of_bytes(b"manifest");
        let prefix = digests.to_prefix();
        assert_eq!(Digests::from_prefix(&prefix).unwrap(), digests);
        assert!(Digests::from_prefix(&prefix[..30]).is_err());
    }
}
