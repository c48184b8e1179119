//! Installer bundle: what gets embedded next to the installer stub
//!
//! A bundle is a directory with three files:
//!
//! - `app.content`: the container, tar+gzip compressed ([`crate::archive`])
//! - `cert.info`: the [`CertBundle`] JSON
//! - `app.info`: `<port>;<b64 app json>;<b64 version json>`
//!
//! The delivery payload is the `app.content` bytes exactly as stored.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::debug;

use crate::archive;
use crate::cert::CertBundle;
use crate::descriptor::{Descriptor, DescriptorKind};
use crate::error::{PackError, PackResult};

pub const CONTENT_FILE: &str = "app.content";
pub const CERT_FILE: &str = "cert.info";
pub const APP_INFO_FILE: &str = "app.info";

/// Plaintext app info block shown by the stub and used to find the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AppInfoBlock {
    pub port: u16,
    pub app: Descriptor,
    pub version: Descriptor,
}

impl AppInfoBlock {
    pub fn new(port: u16, app: Descriptor, version: Descriptor) -> Self {
        Self { port, app, version }
    }

    pub fn encode(&self) -> PackResult<String> {
        Ok(format!(
            "{};{};{}",
            self.port,
            STANDARD.encode(self.app.to_json()?),
            STANDARD.encode(self.version.to_json()?)
        ))
    }

    /// Human-readable rendering: both descriptors as pretty JSON, then the port.
    pub fn describe(&self) -> PackResult<String> {
        let app: serde_json::Value = serde_json::from_slice(&self.app.to_json()?)?;
        let version: serde_json::Value = serde_json::from_slice(&self.version.to_json()?)?;
        Ok(format!(
            "App:\n{}\n\nVersion:\n{}\n\nAgent port: {}",
            serde_json::to_string_pretty(&app)?,
            serde_json::to_string_pretty(&version)?,
            self.port
        ))
    }
}

impl FromStr for AppInfoBlock {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.trim().split(';');
        let port = fields
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| PackError::Format("App info has no agent port".into()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| PackError::Format(format!("Invalid agent port: {}", port)))?;

        let (app, version) = match (fields.next(), fields.next(), fields.next()) {
            (Some(app), Some(version), None) => (app, version),
            _ => {
                return Err(PackError::Format(
                    "App info must be <port>;<app>;<version>".into(),
                ))
            }
        };

        Ok(Self {
            port,
            app: decode_descriptor(DescriptorKind::App, app)?,
            version: decode_descriptor(DescriptorKind::Version, version)?,
        })
    }
}

impl fmt::Display for AppInfoBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encode() {
            Ok(encoded) => f.write_str(&encoded),
            Err(_) => Err(fmt::Error),
        }
    }
}

fn decode_descriptor(kind: DescriptorKind, field: &str) -> PackResult<Descriptor> {
    let json = STANDARD
        .decode(field)
        .map_err(|e| PackError::Format(format!("{:?} info is not base64: {}", kind, e)))?;
    Descriptor::from_json(kind, &json)
}

/// The three embedded artifacts of an installer.
#[derive(Debug, Clone)]
pub struct InstallerBundle {
    /// Compressed container; this is the delivery payload
    pub content: Vec<u8>,
    pub certs: CertBundle,
    pub app_info: AppInfoBlock,
}

impl InstallerBundle {
    /// Compress `container` and pair it with credentials and app info.
    pub fn assemble(container: &[u8], certs: CertBundle, app_info: AppInfoBlock) -> PackResult<Self> {
        Ok(Self {
            content: archive::compress(container)?,
            certs,
            app_info,
        })
    }

    /// Write `app.content`, `cert.info` and `app.info` into `dir`.
    pub fn write_to_dir(&self, dir: &Path) -> PackResult<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(CONTENT_FILE), &self.content)?;
        fs::write(dir.join(CERT_FILE), self.certs.to_json()?)?;
        fs::write(dir.join(APP_INFO_FILE), self.app_info.encode()?)?;
        debug!(dir = %dir.display(), content_len = self.content.len(), "Wrote installer bundle");
        Ok(())
    }

    /// Load a bundle written by [`write_to_dir`](Self::write_to_dir).
    pub fn load_from_dir(dir: &Path) -> PackResult<Self> {
        let app_info = Self::load_app_info(dir)?;
        let content = fs::read(dir.join(CONTENT_FILE))?;
        let certs = CertBundle::from_json(&fs::read(dir.join(CERT_FILE))?)?;
        Ok(Self {
            content,
            certs,
            app_info,
        })
    }

    /// Load only `app.info`; enough to describe the package.
    pub fn load_app_info(dir: &Path) -> PackResult<AppInfoBlock> {
        fs::read_to_string(dir.join(APP_INFO_FILE))?.parse()
    }

    /// The sealed container inside `content`.
    pub fn container(&self) -> PackResult<Vec<u8>> {
        archive::decompress(&self.content)
    }
}
