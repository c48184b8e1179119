//! Digest and envelope primitives
//!
//! - [`symmetric`]: AES-128-GCM over independent 1 MiB chunks
//! - [`asymmetric`]: RSA-OAEP wrapping of 16-byte symmetric keys
//! - [`digest`]: MD5 / SHA-1 over byte streams
//!
//! Together they form the hybrid envelope used for every segment and for the
//! outer container: a fresh symmetric key seals the bulk data, and that key
//! is wrapped to the recipient's public key.

pub mod asymmetric;
pub mod digest;
pub mod symmetric;

pub use asymmetric::{RecipientKey, RecipientPrivateKey};
pub use digest::{digest_reader, DigestAlgorithm, Digests, MD5_LEN, SHA1_LEN};
pub use symmetric::{sealed_len, stateless, ChunkCipher, CHUNK_SIZE, KEY_SIZE, TAG_SIZE};
