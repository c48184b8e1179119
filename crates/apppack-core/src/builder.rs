//! Package builder
//!
//! Accumulates segments for one build and seals them into a container:
//!
//! ```text
//! MD5(manifest) ‖ SHA1(manifest) ‖ wrapped content key ‖ AES-GCM(manifest)
//! ```
//!
//! Every `add_*` method consumes the builder and hands it back on success, so
//! the first failure ends the chain and no partial container can escape.
//! Segments are encoded as soon as they are added and staged in a scoped
//! temp directory that is removed when the builder is dropped.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use tempfile::TempDir;
use tracing::{debug, info};

use crate::crypto::{ChunkCipher, Digests, RecipientKey};
use crate::descriptor::Descriptor;
use crate::error::{PackError, PackResult};
use crate::jar::{random_password, JarEncryptRequest, JarEncryptor};
use crate::manifest::{Command, JarPasswordMap, ManifestWriter};
use crate::plugin::{payload_reader, PluginDescriptor};
use crate::segment::{encode_segment, SegmentKind};

/// Filters handed to the jar encryption step.
#[derive(Debug, Clone, Default)]
pub struct JarFilters {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug)]
struct StagedSegment {
    kind: SegmentKind,
    path: PathBuf,
}

/// Builds one container. See the module docs.
pub struct PackageBuilder {
    recipient: RecipientKey,
    workdir: TempDir,
    segments: Vec<StagedSegment>,
    passwords: Option<JarPasswordMap>,
}

impl PackageBuilder {
    /// Start a build encrypted to `recipient`.
    pub fn new(recipient: RecipientKey) -> PackResult<Self> {
        let workdir = tempfile::Builder::new().prefix("apppack").tempdir()?;
        debug!(workdir = %workdir.path().display(), "Started package build");
        Ok(Self {
            recipient,
            workdir,
            segments: Vec::new(),
            passwords: None,
        })
    }

    /// Kinds of the segments added so far, in manifest order.
    pub fn segment_kinds(&self) -> Vec<SegmentKind> {
        self.segments.iter().map(|s| s.kind).collect()
    }

    fn count(&self, kind: SegmentKind) -> usize {
        self.segments.iter().filter(|s| s.kind == kind).count()
    }

    /// Encrypt the application jar through `encryptor` and add it as the `jar` segment.
    ///
    /// A random 64-character password is used when `password` is `None`.
    pub fn add_application_payload<R: Read>(
        mut self,
        mut jar: R,
        password: Option<String>,
        encryptor: &dyn JarEncryptor,
        filters: &JarFilters,
    ) -> PackResult<Self> {
        if self.count(SegmentKind::Jdk) > 0 {
            return Err(PackError::Validation(
                "A jdk package cannot also carry an application jar".into(),
            ));
        }
        if self.count(SegmentKind::Jar) > 0 {
            return Err(PackError::Validation("Application jar already added".into()));
        }

        let source = self.workdir.path().join("source.jar");
        let encrypted = self.workdir.path().join("encrypted.jar");
        {
            let mut out = BufWriter::new(File::create(&source)?);
            std::io::copy(&mut jar, &mut out)?;
            out.flush()?;
        }

        let password = password.unwrap_or_else(random_password);
        let passwords = encryptor.encrypt(&JarEncryptRequest {
            source: &source,
            destination: &encrypted,
            password: &password,
            include: &filters.include,
            exclude: &filters.exclude,
        })?;

        let input = BufReader::new(File::open(&encrypted)?);
        let staged = self.stage(SegmentKind::Jar, input)?;
        // The jar leads the manifest even when plugins were added first
        self.segments.insert(0, staged);
        fs::remove_file(&source)?;
        fs::remove_file(&encrypted)?;
        self.passwords = Some(passwords);
        Ok(self)
    }

    /// Add one plugin segment: `<len(json)>;<json><executable>`.
    pub fn add_plugin<R: Read>(mut self, descriptor_json: &[u8], executable: R) -> PackResult<Self> {
        if self.count(SegmentKind::Jdk) > 0 {
            return Err(PackError::Validation(
                "A jdk package cannot also carry plugins".into(),
            ));
        }
        PluginDescriptor::from_json(descriptor_json).map_err(|e| {
            PackError::Validation(format!("Plugin descriptor is not valid: {}", e))
        })?;

        let staged = self.stage(SegmentKind::Plugin, payload_reader(descriptor_json, executable))?;
        self.segments.push(staged);
        Ok(self)
    }

    /// Add the jdk archive. It must be the only segment of the build.
    pub fn add_jdk_archive<R: Read>(mut self, archive: R) -> PackResult<Self> {
        if !self.segments.is_empty() {
            let what = if self.count(SegmentKind::Jdk) > 0 {
                "A jdk archive was already added"
            } else {
                "A jdk archive cannot be combined with jar or plugin segments"
            };
            return Err(PackError::Validation(what.into()));
        }
        let staged = self.stage(SegmentKind::Jdk, archive)?;
        self.segments.push(staged);
        Ok(self)
    }

    fn stage<R: Read>(&self, kind: SegmentKind, input: R) -> PackResult<StagedSegment> {
        let path = self
            .workdir
            .path()
            .join(format!("segment-{}-{}", self.segments.len(), kind));
        let mut out = BufWriter::new(File::create(&path)?);
        encode_segment(kind, &self.recipient, input, &mut out)?;
        out.flush()?;
        Ok(StagedSegment { kind, path })
    }

    fn check_command(&self, command: Command) -> PackResult<()> {
        let jars = self.count(SegmentKind::Jar);
        let plugins = self.count(SegmentKind::Plugin);
        let jdks = self.count(SegmentKind::Jdk);

        let problem = match command {
            Command::InstallJdk if jdks != 1 || jars + plugins > 0 => {
                Some("install-jdk needs exactly one jdk segment and nothing else")
            }
            Command::InstallApp if jars != 1 || jdks > 0 => {
                Some("install-app needs exactly one jar segment")
            }
            Command::InstallPlugin if plugins == 0 || jars + jdks > 0 => {
                Some("install-plugin needs at least one plugin and no jar or jdk")
            }
            _ => None,
        };
        match problem {
            Some(msg) => Err(PackError::Validation(msg.into())),
            None => Ok(()),
        }
    }

    /// Seal the manifest and copy the container into `out`.
    ///
    /// The container is sealed in the build directory first, so a failure
    /// leaves `out` untouched. Returns the digests stored in the container prefix.
    pub fn finalize_to<W: Write>(
        self,
        command: Command,
        app: Option<&Descriptor>,
        version: Option<&Descriptor>,
        agent_port: Option<u16>,
        mut out: W,
    ) -> PackResult<Digests> {
        let app = app.ok_or_else(|| PackError::Validation("App descriptor is required".into()))?;
        let version = version
            .ok_or_else(|| PackError::Validation("Version descriptor is required".into()))?;
        match agent_port {
            Some(port) if port != 0 => {}
            _ => return Err(PackError::Validation("Agent port is required".into())),
        }
        app.validate()?;
        version.validate()?;
        self.check_command(command)?;

        let manifest_path = self.workdir.path().join("manifest");
        {
            let mut writer = ManifestWriter::new(BufWriter::new(File::create(&manifest_path)?));
            let passwords = match command {
                Command::InstallApp => self.passwords.as_ref(),
                _ => None,
            };
            writer.write_header(command, app, version, passwords)?;
            for segment in &self.segments {
                let mut staged = File::open(&segment.path)?;
                std::io::copy(&mut staged, writer.segments())?;
            }
            writer.into_inner().flush()?;
        }

        let digests = Digests::of_reader(BufReader::new(File::open(&manifest_path)?))?;

        let key = ChunkCipher::generate_key();
        let wrapped = self.recipient.encrypt(&key)?;
        let sealed_path = self.workdir.path().join("container");
        {
            let mut sealed = BufWriter::new(File::create(&sealed_path)?);
            sealed.write_all(&digests.to_prefix())?;
            sealed.write_all(&wrapped)?;
            ChunkCipher::new(&key)
                .encrypt_stream(BufReader::new(File::open(&manifest_path)?), &mut sealed)?;
            sealed.flush()?;
        }

        // Nothing reaches `out` until the whole container is sealed
        let container_len = std::io::copy(&mut File::open(&sealed_path)?, &mut out)?;
        out.flush()?;

        info!(
            command = %command,
            segments = self.segments.len(),
            manifest_md5 = %digests.md5_hex(),
            container_len,
            "Finalized container"
        );
        Ok(digests)
    }

    /// Seal the manifest and return the container bytes.
    pub fn finalize(
        self,
        command: Command,
        app: Option<&Descriptor>,
        version: Option<&Descriptor>,
        agent_port: Option<u16>,
    ) -> PackResult<Vec<u8>> {
        let mut container = Vec::new();
        self.finalize_to(command, app, version, agent_port, &mut container)?;
        Ok(container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::open_container;
    use crate::manifest::Manifest;
    use crate::test_support::test_private_key;

    struct CopyEncryptor;

    impl JarEncryptor for CopyEncryptor {
        fn encrypt(&self, request: &JarEncryptRequest<'_>) -> PackResult<JarPasswordMap> {
            fs::copy(request.source, request.destination)?;
            let mut map = JarPasswordMap::new();
            map.insert("Password".into(), request.password.to_string());
            Ok(map)
        }
    }

    struct FailingEncryptor;

    impl JarEncryptor for FailingEncryptor {
        fn encrypt(&self, _: &JarEncryptRequest<'_>) -> PackResult<JarPasswordMap> {
            Err(PackError::JarEncryption("Exception in thread main".into()))
        }
    }

    fn builder() -> PackageBuilder {
        PackageBuilder::new(test_private_key().public_key()).unwrap()
    }

    fn plugin_json() -> Vec<u8> {
        br#"{"type":"normal"}"#.to_vec()
    }

    fn descriptors() -> (Descriptor, Descriptor) {
        (Descriptor::app("svc", "a service"), Descriptor::version("1.0", "first"))
    }

    #[test]
    fn test_jdk_build_roundtrip() {
        let (app, version) = descriptors();
        let container = builder()
            .add_jdk_archive(&b"jdk bytes"[..])
            .unwrap()
            .finalize(Command::InstallJdk, Some(&app), Some(&version), Some(7443))
            .unwrap();

        let opened = open_container(&container, test_private_key()).unwrap();
        let manifest = Manifest::parse(&opened.manifest, test_private_key().wrapped_key_len()).unwrap();
        assert_eq!(manifest.command, Command::InstallJdk);
        assert_eq!(manifest.kinds(), vec![SegmentKind::Jdk]);
        assert!(manifest.passwords.is_none());
        assert_eq!(manifest.segments[0].open(test_private_key()).unwrap(), b"jdk bytes");
    }

    #[test]
    fn test_app_build_carries_passwords() {
        let (app, version) = descriptors();
        let container = builder()
            .add_application_payload(
                &b"PK jar"[..],
                Some("fixed".into()),
                &CopyEncryptor,
                &JarFilters::default(),
            )
            .unwrap()
            .add_plugin(&plugin_json(), &b"exe"[..])
            .unwrap()
            .finalize(Command::InstallApp, Some(&app), Some(&version), Some(1))
            .unwrap();

        let opened = open_container(&container, test_private_key()).unwrap();
        let manifest = Manifest::parse(&opened.manifest, test_private_key().wrapped_key_len()).unwrap();
        assert_eq!(manifest.kinds(), vec![SegmentKind::Jar, SegmentKind::Plugin]);
        assert_eq!(manifest.passwords.unwrap()["Password"], "fixed");
        assert_eq!(manifest.segments[0].open(test_private_key()).unwrap(), b"PK jar");
    }

    #[test]
    fn test_generated_password_when_none() {
        let (app, version) = descriptors();
        let container = builder()
            .add_application_payload(&b"jar"[..], None, &CopyEncryptor, &JarFilters::default())
            .unwrap()
            .finalize(Command::InstallApp, Some(&app), Some(&version), Some(1))
            .unwrap();
        let opened = open_container(&container, test_private_key()).unwrap();
        let manifest = Manifest::parse(&opened.manifest, test_private_key().wrapped_key_len()).unwrap();
        assert_eq!(manifest.passwords.unwrap()["Password"].len(), 64);
    }

    #[test]
    fn test_jar_encryption_failure_propagates() {
        let result = builder().add_application_payload(
            &b"jar"[..],
            None,
            &FailingEncryptor,
            &JarFilters::default(),
        );
        match result {
            Err(PackError::JarEncryption(text)) => assert_eq!(text, "Exception in thread main"),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn test_exclusivity_on_insertion() {
        let err = builder()
            .add_jdk_archive(&b"jdk"[..])
            .unwrap()
            .add_plugin(&plugin_json(), &b"exe"[..])
            .err()
            .unwrap();
        assert!(matches!(err, PackError::Validation(_)));

        let err = builder()
            .add_plugin(&plugin_json(), &b"exe"[..])
            .unwrap()
            .add_jdk_archive(&b"jdk"[..])
            .err()
            .unwrap();
        assert!(matches!(err, PackError::Validation(_)));

        let err = builder()
            .add_jdk_archive(&b"a"[..])
            .unwrap()
            .add_jdk_archive(&b"b"[..])
            .err()
            .unwrap();
        assert!(matches!(err, PackError::Validation(_)));
    }

    #[test]
    fn test_command_must_match_segments() {
        let (app, version) = descriptors();
        let result = builder()
            .add_plugin(&plugin_json(), &b"exe"[..])
            .unwrap()
            .finalize(Command::InstallJdk, Some(&app), Some(&version), Some(1));
        assert!(matches!(result, Err(PackError::Validation(_))));

        let result = builder()
            .add_plugin(&plugin_json(), &b"exe"[..])
            .unwrap()
            .finalize(Command::InstallApp, Some(&app), Some(&version), Some(1));
        assert!(matches!(result, Err(PackError::Validation(_))));

        let result = builder().finalize(Command::InstallPlugin, Some(&app), Some(&version), Some(1));
        assert!(matches!(result, Err(PackError::Validation(_))));
    }

    #[test]
    fn test_missing_inputs_are_validation_errors() {
        let (app, version) = descriptors();
        let make = || builder().add_jdk_archive(&b"jdk"[..]).unwrap();

        for result in [
            make().finalize(Command::InstallJdk, None, Some(&version), Some(1)),
            make().finalize(Command::InstallJdk, Some(&app), None, Some(1)),
            make().finalize(Command::InstallJdk, Some(&app), Some(&version), None),
            make().finalize(Command::InstallJdk, Some(&app), Some(&version), Some(0)),
        ] {
            assert!(matches!(result, Err(PackError::Validation(_))));
        }
    }

    #[test]
    fn test_invalid_plugin_descriptor() {
        let result = builder().add_plugin(b"not json", &b"exe"[..]);
        assert!(matches!(result, Err(PackError::Validation(_))));
    }

    #[test]
    fn test_failed_finalize_leaves_output_empty() {
        let (app, version) = descriptors();
        let builder = builder().add_jdk_archive(&b"jdk"[..]).unwrap();
        fs::remove_file(&builder.segments[0].path).unwrap();

        let mut out = Vec::new();
        let result =
            builder.finalize_to(Command::InstallJdk, Some(&app), Some(&version), Some(1), &mut out);
        assert!(matches!(result, Err(PackError::Io(_))));
        assert!(out.is_empty());
    }

    #[test]
    fn test_finalize_to_matches_reported_digests() {
        let (app, version) = descriptors();
        let mut out = Vec::new();
        let digests = builder()
            .add_jdk_archive(&b"jdk"[..])
            .unwrap()
            .finalize_to(Command::InstallJdk, Some(&app), Some(&version), Some(1), &mut out)
            .unwrap();
        assert!(out.starts_with(&digests.to_prefix()));
        open_container(&out, test_private_key()).unwrap();
    }

    #[test]
    fn test_workdir_removed_on_drop() {
        let builder = builder().add_jdk_archive(&b"jdk"[..]).unwrap();
        let dir = builder.workdir.path().to_path_buf();
        assert!(dir.exists());
        drop(builder);
        assert!(!dir.exists());
    }
}
