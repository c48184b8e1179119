//! Signed plugin descriptors
//!
//! Each helper executable shipped with an app is described by a
//! [`PluginDescriptor`]: its role, the MD5/SHA-1 of the executable and an
//! Ed25519 signature over `type ‖ md5 ‖ sha1`. A descriptor and its
//! executable travel together as one `plugin` segment:
//!
//! ```text
//! <len(descriptor json)>;<descriptor json><executable bytes>
//! ```

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::builder::PackageBuilder;
use crate::crypto::Digests;
use crate::descriptor::EnvVarDecl;
use crate::error::{PackError, PackResult};

/// Role a plugin plays around the installed app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    /// Runs alongside the app for its whole lifetime
    Listener,
    Normal,
    /// Must succeed before the app starts
    Before,
    /// Runs after the app has started
    After,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::Listener => "listener",
            PluginType::Normal => "normal",
            PluginType::Before => "before",
            PluginType::After => "after",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginType {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "listener" => Ok(PluginType::Listener),
            "normal" => Ok(PluginType::Normal),
            "before" => Ok(PluginType::Before),
            "after" => Ok(PluginType::After),
            other => Err(PackError::Validation(format!("Unknown plugin type: {}", other))),
        }
    }
}

/// Signed metadata for one helper executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    #[serde(with = "b64", default, skip_serializing_if = "Vec::is_empty")]
    pub md5: Vec<u8>,
    #[serde(with = "b64", default, skip_serializing_if = "Vec::is_empty")]
    pub sha1: Vec<u8>,
    #[serde(with = "b64", default, skip_serializing_if = "Vec::is_empty")]
    pub sign: Vec<u8>,
    #[serde(rename = "envConfig", default, skip_serializing_if = "Vec::is_empty")]
    pub env_config: Vec<EnvVarDecl>,
}

impl PluginDescriptor {
    /// Bytes covered by the signature: `type ‖ md5 ‖ sha1`.
    pub fn signing_input(&self) -> Vec<u8> {
        let mut input = Vec::with_capacity(16 + self.md5.len() + self.sha1.len());
        input.extend_from_slice(self.plugin_type.as_str().as_bytes());
        input.extend_from_slice(&self.md5);
        input.extend_from_slice(&self.sha1);
        input
    }

    /// Check the signature against `key`.
    pub fn verify(&self, key: &VerifyingKey) -> PackResult<()> {
        let signature = Signature::from_slice(&self.sign)
            .map_err(|e| PackError::Crypto(format!("Malformed plugin signature: {}", e)))?;
        key.verify(&self.signing_input(), &signature)
            .map_err(|_| PackError::Crypto("Plugin signature verification failed".into()))
    }

    /// Check that `executable` is the one this descriptor was made for.
    pub fn matches_executable<R: Read>(&self, executable: R) -> PackResult<bool> {
        let digests = Digests::of_reader(executable)?;
        Ok(digests.md5[..] == self.md5[..] && digests.sha1[..] == self.sha1[..])
    }

    pub fn to_json(&self) -> PackResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(json: &[u8]) -> PackResult<Self> {
        Ok(serde_json::from_slice(json)?)
    }
}

/// Signs helper executables into [`PluginDescriptor`]s.
pub struct PluginSigner {
    key: SigningKey,
}

impl PluginSigner {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Generate a fresh signing key from OS randomness.
    pub fn generate() -> PackResult<Self> {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed)
            .map_err(|e| PackError::Crypto(format!("Failed to gather randomness: {}", e)))?;
        Ok(Self::new(SigningKey::from_bytes(&seed)))
    }

    /// Restore a signer from its hex-encoded 32-byte seed.
    pub fn from_seed_hex(seed: &str) -> PackResult<Self> {
        let bytes = hex::decode(seed.trim())
            .map_err(|e| PackError::Certificate(format!("Signing seed is not hex: {}", e)))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PackError::Certificate("Signing seed must be 32 bytes".into()))?;
        Ok(Self::new(SigningKey::from_bytes(&seed)))
    }

    pub fn seed_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Digest and sign an executable read from `executable`.
    pub fn sign<R: Read>(
        &self,
        plugin_type: PluginType,
        executable: R,
        env_config: Vec<EnvVarDecl>,
    ) -> PackResult<PluginDescriptor> {
        let digests = Digests::of_reader(executable)?;
        let mut descriptor = PluginDescriptor {
            plugin_type,
            md5: digests.md5.to_vec(),
            sha1: digests.sha1.to_vec(),
            sign: Vec::new(),
            env_config,
        };
        descriptor.sign = self.key.sign(&descriptor.signing_input()).to_bytes().to_vec();
        debug!(plugin_type = %plugin_type, md5 = %digests.md5_hex(), "Signed plugin");
        Ok(descriptor)
    }

    /// Sign the executable at `path`.
    pub fn describe(
        &self,
        plugin_type: PluginType,
        path: &Path,
        env_config: Vec<EnvVarDecl>,
    ) -> PackResult<PluginDescriptor> {
        let file = File::open(path)?;
        self.sign(plugin_type, BufReader::new(file), env_config)
    }
}

/// One registered plugin: descriptor plus the executable it describes.
#[derive(Debug, Clone)]
pub struct PluginEntry {
    pub descriptor: PluginDescriptor,
    pub executable: PathBuf,
}

/// Plugins in registration order.
#[derive(Debug, Clone, Default)]
pub struct PluginSet {
    entries: Vec<PluginEntry>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, descriptor: PluginDescriptor, executable: impl Into<PathBuf>) {
        self.entries.push(PluginEntry {
            descriptor,
            executable: executable.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginEntry> {
        self.entries.iter()
    }

    /// Register every plugin with `builder`, preserving order.
    pub fn add_to(&self, builder: PackageBuilder) -> PackResult<PackageBuilder> {
        self.entries.iter().try_fold(builder, |builder, entry| {
            let json = entry.descriptor.to_json()?;
            let file = File::open(&entry.executable)?;
            builder.add_plugin(&json, BufReader::new(file))
        })
    }
}

/// Reader over one plugin payload unit: `<len>;<json><executable>`.
pub fn payload_reader<'a, R: Read + 'a>(descriptor_json: &'a [u8], executable: R) -> impl Read + 'a {
    let header = io::Cursor::new(format!("{};", descriptor_json.len()).into_bytes());
    header.chain(descriptor_json).chain(executable)
}

/// A decoded plugin payload unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginPayload {
    pub descriptor_json: Vec<u8>,
    pub executable: Vec<u8>,
}

impl PluginPayload {
    pub fn encode(descriptor_json: &[u8], executable: &[u8]) -> Vec<u8> {
        let mut out = format!("{};", descriptor_json.len()).into_bytes();
        out.extend_from_slice(descriptor_json);
        out.extend_from_slice(executable);
        out
    }

    /// Split a decrypted plugin segment back into descriptor and executable.
    pub fn parse(bytes: &[u8]) -> PackResult<Self> {
        let sep = bytes
            .iter()
            .position(|&b| b == b';')
            .ok_or_else(|| PackError::Format("Plugin payload has no length prefix".into()))?;
        let len: usize = std::str::from_utf8(&bytes[..sep])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| PackError::Format("Plugin payload length is not decimal".into()))?;
        let body = &bytes[sep + 1..];
        if body.len() < len {
            return Err(PackError::Format(format!(
                "Plugin descriptor declares {} bytes but only {} remain",
                len,
                body.len()
            )));
        }
        Ok(Self {
            descriptor_json: body[..len].to_vec(),
            executable: body[len..].to_vec(),
        })
    }

    pub fn descriptor(&self) -> PackResult<PluginDescriptor> {
        PluginDescriptor::from_json(&self.descriptor_json)
    }
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
