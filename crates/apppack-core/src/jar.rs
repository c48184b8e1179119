//! External jar encryption step
//!
//! The application jar is encrypted class-by-class by a separate Java tool
//! before it becomes a segment. The tool is driven through a JSON config
//! file and reports per-class cipher metadata in a file named `xjar.go`
//! beside its output.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::distr::{Alphanumeric, SampleString};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{PackError, PackResult};
use crate::manifest::JarPasswordMap;

/// Length of the generated per-build jar password.
pub const PASSWORD_LEN: usize = 64;

/// Name of the metadata file the tool writes next to its output.
pub const METADATA_FILE: &str = "xjar.go";

const CONFIG_FILE: &str = "i";
const OUTPUT_FILE: &str = "t";

/// Inputs for one jar encryption run.
#[derive(Debug, Clone)]
pub struct JarEncryptRequest<'a> {
    /// Plain jar to encrypt
    pub source: &'a Path,
    /// Where the encrypted jar must end up
    pub destination: &'a Path,
    pub password: &'a str,
    pub include: &'a [String],
    pub exclude: &'a [String],
}

/// Encrypts a jar and returns the per-class metadata map (values base64).
pub trait JarEncryptor {
    fn encrypt(&self, request: &JarEncryptRequest<'_>) -> PackResult<JarPasswordMap>;
}

/// Config file consumed by the tool. `form` is its key for the source path.
#[derive(Debug, Serialize)]
struct ToolConfig<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    password: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    to: String,
    #[serde(skip_serializing_if = "str::is_empty")]
    form: String,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    include: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    exclude: &'a [String],
}

/// Runs `<java> -jar <encryptor_jar> <config>` as a child process.
#[derive(Debug, Clone)]
pub struct ExternalJarEncryptor {
    pub java: PathBuf,
    pub encryptor_jar: PathBuf,
}

impl ExternalJarEncryptor {
    pub fn new(java: impl Into<PathBuf>, encryptor_jar: impl Into<PathBuf>) -> Self {
        Self {
            java: java.into(),
            encryptor_jar: encryptor_jar.into(),
        }
    }
}

impl JarEncryptor for ExternalJarEncryptor {
    fn encrypt(&self, request: &JarEncryptRequest<'_>) -> PackResult<JarPasswordMap> {
        if self.java.as_os_str().is_empty() {
            return Err(PackError::Validation("No java executable configured".into()));
        }

        let workdir = tempfile::Builder::new().prefix("jarenc").tempdir()?;
        let config_path = workdir.path().join(CONFIG_FILE);
        let output_path = workdir.path().join(OUTPUT_FILE);

        let config = ToolConfig {
            password: request.password,
            to: output_path.to_string_lossy().into_owned(),
            form: request.source.to_string_lossy().into_owned(),
            include: request.include,
            exclude: request.exclude,
        };
        fs::write(&config_path, serde_json::to_vec(&config)?)?;

        debug!(
            java = %self.java.display(),
            tool = %self.encryptor_jar.display(),
            source = %request.source.display(),
            "Running jar encryption tool"
        );
        let output = Command::new(&self.java)
            .arg("-jar")
            .arg(&self.encryptor_jar)
            .arg(&config_path)
            .output()
            .map_err(|e| {
                PackError::JarEncryption(format!("Failed to start {}: {}", self.java.display(), e))
            })?;

        if !output.status.success() {
            let mut combined = output.stdout;
            combined.extend_from_slice(&output.stderr);
            return Err(PackError::JarEncryption(
                String::from_utf8_lossy(&combined).into_owned(),
            ));
        }

        let metadata = fs::read(workdir.path().join(METADATA_FILE)).map_err(|e| {
            PackError::JarEncryption(format!("Tool produced no {}: {}", METADATA_FILE, e))
        })?;
        let raw: JarPasswordMap = serde_json::from_slice(&metadata)?;

        fs::copy(&output_path, request.destination)?;

        info!(entries = raw.len(), "Jar encrypted");
        Ok(encode_metadata(raw))
    }
}

/// Base64-encode every metadata value, as the manifest carries them.
pub fn encode_metadata(raw: JarPasswordMap) -> JarPasswordMap {
    raw.into_iter()
        .map(|(k, v)| (k, STANDARD.encode(v.as_bytes())))
        .collect()
}

/// Fresh per-build jar password.
pub fn random_password() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), PASSWORD_LEN)
}
