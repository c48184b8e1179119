//! Certificate bundle embedded next to the container
//!
//! JSON object with the user certificate (`u`), its private key (`uk`) and
//! the root CA certificate (`r`), all PEM. Issuance happens elsewhere; this
//! module only reads and checks what it is handed.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use x509_parser::pem::parse_x509_pem;

use crate::error::{PackError, PackResult};

/// Credentials used for the mutual TLS connection to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertBundle {
    /// User (client) certificate PEM
    pub u: String,
    /// User private key PEM
    pub uk: String,
    /// Root CA certificate PEM
    pub r: String,
}

impl CertBundle {
    pub fn new(user_cert: impl Into<String>, user_key: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            u: user_cert.into(),
            uk: user_key.into(),
            r: root.into(),
        }
    }

    /// Read the three PEM files that make up a bundle.
    pub fn from_files(user_cert: &Path, user_key: &Path, root: &Path) -> PackResult<Self> {
        Ok(Self::new(
            fs::read_to_string(user_cert)?,
            fs::read_to_string(user_key)?,
            fs::read_to_string(root)?,
        ))
    }

    pub fn to_json(&self) -> PackResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(json: &[u8]) -> PackResult<Self> {
        serde_json::from_slice(json)
            .map_err(|e| PackError::Certificate(format!("Invalid certificate bundle: {}", e)))
    }

    /// Expiry of the user certificate.
    pub fn user_not_after(&self) -> PackResult<DateTime<Utc>> {
        not_after(&self.u)
    }

    /// Fail with [`PackError::ExpiredCredential`] if the user certificate has expired.
    pub fn ensure_valid_at(&self, now: DateTime<Utc>) -> PackResult<()> {
        ensure_not_expired(&self.u, now)
    }
}

/// `NotAfter` of the first certificate in `pem`.
pub fn not_after(pem: &str) -> PackResult<DateTime<Utc>> {
    let (_, block) = parse_x509_pem(pem.trim().as_bytes())
        .map_err(|e| PackError::Certificate(format!("Failed to decode certificate PEM: {}", e)))?;
    let cert = block
        .parse_x509()
        .map_err(|e| PackError::Certificate(format!("Failed to parse certificate: {}", e)))?;
    let secs = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| PackError::Certificate(format!("NotAfter out of range: {}", secs)))
}

/// Reject a certificate whose `NotAfter` is at or before `now`.
pub fn ensure_not_expired(pem: &str, now: DateTime<Utc>) -> PackResult<()> {
    let expires = not_after(pem)?;
    if expires <= now {
        return Err(PackError::ExpiredCredential(format!(
            "certificate expired at {}",
            expires.to_rfc3339()
        )));
    }
    Ok(())
}
