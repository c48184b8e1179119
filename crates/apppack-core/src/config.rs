//! JSON build configuration
//!
//! ```json
//! {
//!   "command": "install-app",
//!   "payload": "target/shop.jar",
//!   "plugins": [{ "descriptor": "plugins/db.json", "executable": "plugins/db" }],
//!   "userCert": "certs/user.pem",
//!   "userKey": "certs/user.key",
//!   "rootCert": "certs/root.pem",
//!   "agentPort": 7443,
//!   "app": { "name": "shop", "desc": "Web shop" },
//!   "version": { "name": "3.1", "desc": "hotfix" },
//!   "os": "linux",
//!   "arch": "amd64",
//!   "encryptorJar": "tools/xjar.jar",
//!   "outputDir": "dist"
//! }
//! ```
//!
//! Relative paths resolve against the directory holding the config file.
//! `recipient` defaults to `rootCert`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::builder::JarFilters;
use crate::cert::CertBundle;
use crate::crypto::RecipientKey;
use crate::descriptor::{Descriptor, DescriptorKind};
use crate::error::{PackError, PackResult};
use crate::jar::ExternalJarEncryptor;
use crate::manifest::Command;
use crate::plugin::{PluginDescriptor, PluginSet};
use crate::request::BuildRequest;

const DEFAULT_JAVA: &str = "java";
const DEFAULT_OUTPUT_DIR: &str = "dist";

/// A plugin listed in the build file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Signed descriptor JSON (as written by `apppack plugin sign`)
    pub descriptor: PathBuf,
    pub executable: PathBuf,
}

/// Build file contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    pub command: Command,
    #[serde(default)]
    pub payload: Option<PathBuf>,
    #[serde(default)]
    pub jar_password: Option<String>,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
    #[serde(default)]
    pub recipient: Option<PathBuf>,
    pub user_cert: PathBuf,
    pub user_key: PathBuf,
    pub root_cert: PathBuf,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    pub agent_port: u16,
    pub app: Descriptor,
    pub version: Descriptor,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub java: Option<PathBuf>,
    #[serde(default)]
    pub encryptor_jar: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl BuildConfig {
    /// Read a build file and resolve its paths against its directory.
    pub fn load(path: &Path) -> PackResult<Self> {
        let bytes = fs::read(path)?;
        let config: BuildConfig = serde_json::from_slice(&bytes)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        debug!(path = %path.display(), "Loaded build config");
        Ok(config.resolved_against(base))
    }

    /// Make every relative path absolute with respect to `base`.
    pub fn resolved_against(mut self, base: &Path) -> Self {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(p) = self.payload.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.recipient.as_mut() {
            resolve(p);
        }
        for plugin in &mut self.plugins {
            resolve(&mut plugin.descriptor);
            resolve(&mut plugin.executable);
        }
        resolve(&mut self.user_cert);
        resolve(&mut self.user_key);
        resolve(&mut self.root_cert);
        if let Some(p) = self.encryptor_jar.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.output_dir.as_mut() {
            resolve(p);
        }
        // A bare `java` is looked up on PATH, so only resolve explicit paths
        if let Some(p) = self.java.as_mut() {
            if p.components().count() > 1 {
                resolve(p);
            }
        }
        self
    }

    pub fn cert_bundle(&self) -> PackResult<CertBundle> {
        CertBundle::from_files(&self.user_cert, &self.user_key, &self.root_cert)
    }

    pub fn recipient_key(&self) -> PackResult<RecipientKey> {
        let path = self.recipient.as_ref().unwrap_or(&self.root_cert);
        RecipientKey::from_pem(&fs::read_to_string(path)?)
    }

    pub fn jar_encryptor(&self) -> PackResult<ExternalJarEncryptor> {
        let tool = self.encryptor_jar.clone().ok_or_else(|| {
            PackError::Validation("encryptorJar is required for install-app".into())
        })?;
        let java = self
            .java
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_JAVA));
        Ok(ExternalJarEncryptor::new(java, tool))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }

    /// Version descriptor with the target platform applied.
    pub fn version_descriptor(&self) -> Descriptor {
        let version = self.version.clone().into_kind(DescriptorKind::Version);
        match (&self.os, &self.arch) {
            (None, None) => version,
            (os, arch) => {
                let os = os.clone().unwrap_or_else(|| version.target_os().to_string());
                let arch = arch.clone().unwrap_or_else(|| version.target_arch().to_string());
                version.with_target(os, arch)
            }
        }
    }

    /// Turn the file into a [`BuildRequest`], loading keys and plugin descriptors.
    pub fn into_request(&self) -> PackResult<BuildRequest> {
        let mut request = BuildRequest::new(self.command, self.recipient_key()?);
        request.payload = self.payload.clone();
        request.jar_password = self.jar_password.clone();
        request.filters = JarFilters {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
        };
        request.agent_port = Some(self.agent_port);
        request.app = Some(self.app.clone().into_kind(DescriptorKind::App));
        request.version = Some(self.version_descriptor());

        let mut plugins = PluginSet::new();
        for plugin in &self.plugins {
            let json = fs::read(&plugin.descriptor)?;
            let descriptor = PluginDescriptor::from_json(&json).map_err(|e| {
                PackError::Validation(format!(
                    "Plugin descriptor {} is not valid: {}",
                    plugin.descriptor.display(),
                    e
                ))
            })?;
            plugins.push(descriptor, plugin.executable.clone());
        }
        request.plugins = plugins;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "command": "install-jdk",
        "payload": "jdk.tar.gz",
        "userCert": "certs/user.pem",
        "userKey": "/abs/user.key",
        "rootCert": "certs/root.pem",
        "agentPort": 7443,
        "app": {"name": "jdk", "desc": "runtime"},
        "version": {"name": "17", "desc": "lts", "jdkStartArgs": ["-Xmx1g"]},
        "os": "linux",
        "arch": "arm64"
    }"#;

    #[test]
    fn test_parse_and_resolve() {
        let config: BuildConfig = serde_json::from_str(SAMPLE).unwrap();
        let config = config.resolved_against(Path::new("/work"));

        assert_eq!(config.command, Command::InstallJdk);
        assert_eq!(config.payload, Some(PathBuf::from("/work/jdk.tar.gz")));
        assert_eq!(config.user_cert, PathBuf::from("/work/certs/user.pem"));
        assert_eq!(config.user_key, PathBuf::from("/abs/user.key"));
        assert_eq!(config.output_dir(), PathBuf::from(DEFAULT_OUTPUT_DIR));
    }

    #[test]
    fn test_version_descriptor_gets_target() {
        let config: BuildConfig = serde_json::from_str(SAMPLE).unwrap();
        let version = config.version_descriptor();
        assert_eq!(version.kind(), DescriptorKind::Version);
        assert_eq!(version.target_os(), "linux");
        assert_eq!(version.target_arch(), "arm64");
        assert_eq!(version.start_args().to_vec(), vec!["-Xmx1g".to_string()]);
    }

    #[test]
    fn test_bare_java_stays_on_path() {
        let mut config: BuildConfig = serde_json::from_str(SAMPLE).unwrap();
        config.java = Some("java".into());
        config.encryptor_jar = Some("xjar.jar".into());
        let config = config.resolved_against(Path::new("/work"));
        let encryptor = config.jar_encryptor().unwrap();
        assert_eq!(encryptor.java, PathBuf::from("java"));
        assert_eq!(encryptor.encryptor_jar, PathBuf::from("/work/xjar.jar"));
    }

    #[test]
    fn test_missing_encryptor_jar() {
        let config: BuildConfig = serde_json::from_str(SAMPLE).unwrap();
        assert!(matches!(config.jar_encryptor(), Err(PackError::Validation(_))));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            BuildConfig::load(Path::new("/definitely/not/here.json")),
            Err(PackError::Io(_))
        ));
    }

    #[test]
    fn test_unknown_command_rejected() {
        let bad = SAMPLE.replace("install-jdk", "install-everything");
        assert!(serde_json::from_str::<BuildConfig>(&bad).is_err());
    }
}
