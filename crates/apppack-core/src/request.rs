//! Build requests and the one-call build routine

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use tracing::info;

use crate::builder::{JarFilters, PackageBuilder};
use crate::bundle::{AppInfoBlock, InstallerBundle};
use crate::cert::CertBundle;
use crate::crypto::RecipientKey;
use crate::descriptor::Descriptor;
use crate::error::{PackError, PackResult};
use crate::jar::JarEncryptor;
use crate::manifest::Command;
use crate::plugin::PluginSet;

/// Everything needed to build one container.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub command: Command,
    /// The jar (`install-app`) or jdk archive (`install-jdk`)
    pub payload: Option<PathBuf>,
    /// Jar password; a random one is generated when absent
    pub jar_password: Option<String>,
    pub plugins: PluginSet,
    pub recipient: RecipientKey,
    pub filters: JarFilters,
    pub agent_port: Option<u16>,
    pub app: Option<Descriptor>,
    pub version: Option<Descriptor>,
}

impl BuildRequest {
    pub fn new(command: Command, recipient: RecipientKey) -> Self {
        Self {
            command,
            payload: None,
            jar_password: None,
            plugins: PluginSet::new(),
            recipient,
            filters: JarFilters::default(),
            agent_port: None,
            app: None,
            version: None,
        }
    }

    /// Check that the request names everything its command needs.
    pub fn validate(&self) -> PackResult<()> {
        let app = self
            .app
            .as_ref()
            .ok_or_else(|| PackError::Validation("App descriptor is required".into()))?;
        let version = self
            .version
            .as_ref()
            .ok_or_else(|| PackError::Validation("Version descriptor is required".into()))?;
        app.validate()?;
        version.validate()?;

        match self.agent_port {
            Some(port) if port != 0 => {}
            _ => return Err(PackError::Validation("Agent port is required".into())),
        }

        match self.command {
            Command::InstallApp | Command::InstallJdk => {
                let payload = self.payload.as_ref().ok_or_else(|| {
                    PackError::Validation(format!("{} needs a payload path", self.command))
                })?;
                if !payload.is_file() {
                    return Err(PackError::Validation(format!(
                        "Payload {} does not exist",
                        payload.display()
                    )));
                }
                if self.command == Command::InstallJdk && !self.plugins.is_empty() {
                    return Err(PackError::Validation(
                        "install-jdk cannot carry plugins".into(),
                    ));
                }
            }
            Command::InstallPlugin => {
                if self.payload.is_some() {
                    return Err(PackError::Validation(
                        "install-plugin takes no jar or jdk payload".into(),
                    ));
                }
                if self.plugins.is_empty() {
                    return Err(PackError::Validation(
                        "install-plugin needs at least one plugin".into(),
                    ));
                }
            }
        }

        for entry in self.plugins.iter() {
            if !entry.executable.is_file() {
                return Err(PackError::Validation(format!(
                    "Plugin executable {} does not exist",
                    entry.executable.display()
                )));
            }
        }
        Ok(())
    }
}

/// A finished container and the app info block that accompanies it.
#[derive(Debug, Clone)]
pub struct PackageOutput {
    pub container: Vec<u8>,
    pub app_info: AppInfoBlock,
}

impl PackageOutput {
    /// Compress the container and pair it with `certs`.
    pub fn into_bundle(self, certs: CertBundle) -> PackResult<InstallerBundle> {
        InstallerBundle::assemble(&self.container, certs, self.app_info)
    }
}

/// Validate `request` and drive a [`PackageBuilder`] through it.
pub fn build_package(request: &BuildRequest, encryptor: &dyn JarEncryptor) -> PackResult<PackageOutput> {
    request.validate()?;
    let builder = PackageBuilder::new(request.recipient.clone())?;

    let builder = match request.command {
        Command::InstallApp => {
            let jar = open_payload(request)?;
            let builder = builder.add_application_payload(
                jar,
                request.jar_password.clone(),
                encryptor,
                &request.filters,
            )?;
            request.plugins.add_to(builder)?
        }
        Command::InstallPlugin => request.plugins.add_to(builder)?,
        Command::InstallJdk => builder.add_jdk_archive(open_payload(request)?)?,
    };

    let container = builder.finalize(
        request.command,
        request.app.as_ref(),
        request.version.as_ref(),
        request.agent_port,
    )?;

    // validate() guarantees these are present
    let (port, app, version) = match (request.agent_port, &request.app, &request.version) {
        (Some(port), Some(app), Some(version)) => (port, app.clone(), version.clone()),
        _ => return Err(PackError::Validation("Incomplete build request".into())),
    };

    info!(
        command = %request.command,
        plugins = request.plugins.len(),
        container_len = container.len(),
        "Package built"
    );
    Ok(PackageOutput {
        container,
        app_info: AppInfoBlock::new(port, app, version),
    })
}

fn open_payload(request: &BuildRequest) -> PackResult<BufReader<File>> {
    let path = request
        .payload
        .as_ref()
        .ok_or_else(|| PackError::Validation("Payload path is required".into()))?;
    Ok(BufReader::new(File::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::open_container;
    use crate::jar::JarEncryptRequest;
    use crate::manifest::{JarPasswordMap, Manifest};
    use crate::plugin::{PluginSigner, PluginType};
    use crate::segment::SegmentKind;
    use crate::test_support::test_private_key;

    struct CopyEncryptor;

    impl JarEncryptor for CopyEncryptor {
        fn encrypt(&self, request: &JarEncryptRequest<'_>) -> PackResult<JarPasswordMap> {
            std::fs::copy(request.source, request.destination)?;
            Ok(JarPasswordMap::new())
        }
    }

    fn request(command: Command) -> BuildRequest {
        let mut request = BuildRequest::new(command, test_private_key().public_key());
        request.agent_port = Some(7443);
        request.app = Some(Descriptor::app("app", "desc"));
        request.version = Some(Descriptor::version("1", "first"));
        request
    }

    #[test]
    fn test_validate_missing_payload() {
        let err = request(Command::InstallJdk).validate().unwrap_err();
        assert!(matches!(err, PackError::Validation(_)));
    }

    #[test]
    fn test_validate_plugin_rules() {
        let err = request(Command::InstallPlugin).validate().unwrap_err();
        assert!(err.to_string().contains("at least one plugin"));

        let mut req = request(Command::InstallPlugin);
        req.payload = Some("app.jar".into());
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validate_missing_descriptor_and_port() {
        let mut req = request(Command::InstallPlugin);
        req.app = None;
        assert!(req.validate().unwrap_err().to_string().contains("App descriptor"));

        let mut req = request(Command::InstallPlugin);
        req.agent_port = None;
        assert!(req.validate().unwrap_err().to_string().contains("Agent port"));
    }

    #[test]
    fn test_build_app_with_plugins() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("app.jar");
        std::fs::write(&jar, b"PK\x03\x04 app").unwrap();

        let signer = PluginSigner::generate().unwrap();
        let mut req = request(Command::InstallApp);
        req.payload = Some(jar);
        for (i, ty) in [PluginType::Before, PluginType::After].into_iter().enumerate() {
            let exe = dir.path().join(format!("helper{}", i));
            std::fs::write(&exe, format!("helper {}", i)).unwrap();
            let descriptor = signer.describe(ty, &exe, Vec::new()).unwrap();
            req.plugins.push(descriptor, exe);
        }

        let output = build_package(&req, &CopyEncryptor).unwrap();
        assert_eq!(output.app_info.port, 7443);

        let opened = open_container(&output.container, test_private_key()).unwrap();
        let manifest = Manifest::parse(&opened.manifest, test_private_key().wrapped_key_len()).unwrap();
        assert_eq!(
            manifest.kinds(),
            vec![SegmentKind::Jar, SegmentKind::Plugin, SegmentKind::Plugin]
        );
    }

    #[test]
    fn test_into_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let jdk = dir.path().join("jdk.tar.gz");
        std::fs::write(&jdk, b"jdk").unwrap();
        let mut req = request(Command::InstallJdk);
        req.payload = Some(jdk);

        let output = build_package(&req, &CopyEncryptor).unwrap();
        let container = output.container.clone();
        let bundle = output.into_bundle(CertBundle::new("u", "k", "r")).unwrap();
        assert_eq!(bundle.container().unwrap(), container);
    }
}
