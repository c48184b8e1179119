//! Asymmetric key wrapping (RSA-OAEP with SHA-256)
//!
//! Only short payloads go through here: the 16-byte symmetric keys that seal
//! segments and manifests. The wrapped output is always exactly
//! [`RecipientKey::wrapped_key_len`] bytes, which is what lets the manifest
//! decoder split a wrapped key from the length digits that follow it.

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::{PackError, PackResult};

/// Public key a package is encrypted to.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipientKey {
    inner: RsaPublicKey,
}

impl RecipientKey {
    /// Wrap an existing RSA public key.
    pub fn from_rsa(inner: RsaPublicKey) -> Self {
        Self { inner }
    }

    /// Parse a recipient key from PEM.
    ///
    /// Accepts an X.509 `CERTIFICATE` (the key is taken from its subject
    /// public key info), an SPKI `PUBLIC KEY` or a PKCS#1 `RSA PUBLIC KEY`.
    pub fn from_pem(pem: &str) -> PackResult<Self> {
        let pem = pem.trim();
        if pem.contains("BEGIN CERTIFICATE") {
            return Self::from_certificate_pem(pem);
        }

        let inner = if pem.contains("BEGIN RSA PUBLIC KEY") {
            RsaPublicKey::from_pkcs1_pem(pem)
                .map_err(|e| PackError::Certificate(format!("Invalid PKCS#1 public key: {}", e)))?
        } else {
            RsaPublicKey::from_public_key_pem(pem)
                .map_err(|e| PackError::Certificate(format!("Invalid public key: {}", e)))?
        };
        Ok(Self { inner })
    }

    /// Extract the RSA public key carried by a PEM certificate.
    pub fn from_certificate_pem(pem: &str) -> PackResult<Self> {
        let (_, block) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
            .map_err(|e| PackError::Certificate(format!("Failed to decode certificate PEM: {}", e)))?;
        let cert = block
            .parse_x509()
            .map_err(|e| PackError::Certificate(format!("Failed to parse certificate: {}", e)))?;

        let inner = RsaPublicKey::from_public_key_der(cert.public_key().raw).map_err(|e| {
            PackError::Certificate(format!("Certificate does not carry an RSA key: {}", e))
        })?;
        Ok(Self { inner })
    }

    /// Size in bytes of every wrapped key produced for this recipient.
    pub fn wrapped_key_len(&self) -> usize {
        self.inner.size()
    }

    /// Encrypt a short payload (a symmetric key) to this recipient.
    pub fn encrypt(&self, plaintext: &[u8]) -> PackResult<Vec<u8>> {
        self.inner
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| PackError::Crypto(format!("Key wrap failed: {}", e)))
    }

    /// Serialize as an SPKI PEM.
    pub fn to_pem(&self) -> PackResult<String> {
        self.inner
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| PackError::Crypto(format!("Failed to encode public key: {}", e)))
    }

    /// The underlying RSA key.
    pub fn as_rsa(&self) -> &RsaPublicKey {
        &self.inner
    }
}

/// Private half of a recipient key; opens wrapped keys.
pub struct RecipientPrivateKey {
    inner: RsaPrivateKey,
}

impl RecipientPrivateKey {
    /// Generate a new key of `bits` modulus size.
    pub fn generate(bits: usize) -> PackResult<Self> {
        let inner = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| PackError::Crypto(format!("Key generation failed: {}", e)))?;
        Ok(Self { inner })
    }

    /// Parse a PKCS#8 `PRIVATE KEY` or PKCS#1 `RSA PRIVATE KEY` PEM.
    pub fn from_pem(pem: &str) -> PackResult<Self> {
        let pem = pem.trim();
        let inner = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| PackError::Certificate(format!("Invalid private key: {}", e)))?;
        Ok(Self { inner })
    }

    /// Serialize as a PKCS#8 PEM.
    pub fn to_pem(&self) -> PackResult<String> {
        self.inner
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| PackError::Crypto(format!("Failed to encode private key: {}", e)))
    }

    /// The matching public key.
    pub fn public_key(&self) -> RecipientKey {
        RecipientKey::from_rsa(self.inner.to_public_key())
    }

    /// Size in bytes of wrapped keys this private key opens.
    pub fn wrapped_key_len(&self) -> usize {
        self.inner.size()
    }

    /// Decrypt a payload wrapped with the matching [`RecipientKey`].
    pub fn decrypt(&self, ciphertext: &[u8]) -> PackResult<Vec<u8>> {
        self.inner
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|e| PackError::Crypto(format!("Key unwrap failed: {}", e)))
    }
}
