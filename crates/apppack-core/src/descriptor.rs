//! App and version descriptors
//!
//! Every build carries two descriptors: one describing the application and
//! one describing this particular version/build. They share one type with a
//! [`DescriptorKind`] discriminant. The version variant additionally carries
//! environment-variable declarations, runtime start arguments and the target
//! platform; the app variant only ever serialises its name and description.

use serde::{Deserialize, Serialize};

use crate::error::{PackError, PackResult};

/// An environment variable the installed app (or a plugin) understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EnvVarDecl {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
    #[serde(rename = "defaultVal", default, skip_serializing_if = "String::is_empty")]
    pub default_val: String,
}

impl EnvVarDecl {
    pub fn new(name: impl Into<String>, desc: impl Into<String>, default_val: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: desc.into(),
            default_val: default_val.into(),
        }
    }
}

/// Which of the two descriptor shapes this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorKind {
    #[default]
    App,
    Version,
}

/// Name/description metadata for an app or one of its versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Descriptor {
    #[serde(skip)]
    kind: DescriptorKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    desc: String,
    #[serde(rename = "envConfigInfos", default, skip_serializing_if = "Vec::is_empty")]
    env_config: Vec<EnvVarDecl>,
    #[serde(rename = "jdkStartArgs", default, skip_serializing_if = "Vec::is_empty")]
    start_args: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    os: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    arch: String,
}

impl Descriptor {
    /// Descriptor for the application itself.
    pub fn app(name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            kind: DescriptorKind::App,
            name: name.into(),
            desc: desc.into(),
            ..Default::default()
        }
    }

    /// Descriptor for one version/build of the application.
    pub fn version(name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            kind: DescriptorKind::Version,
            name: name.into(),
            desc: desc.into(),
            ..Default::default()
        }
    }

    /// Add an environment-variable declaration (version descriptors only).
    pub fn with_env(mut self, decl: EnvVarDecl) -> Self {
        self.env_config.push(decl);
        self
    }

    /// Set the runtime start arguments (version descriptors only).
    pub fn with_start_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the target platform (version descriptors only).
    pub fn with_target(mut self, os: impl Into<String>, arch: impl Into<String>) -> Self {
        self.os = os.into();
        self.arch = arch.into();
        self
    }

    /// Reinterpret as `kind`; JSON input does not carry the discriminant.
    pub fn into_kind(mut self, kind: DescriptorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.desc
    }

    /// Environment declarations; always empty for the app variant.
    pub fn env_config(&self) -> &[EnvVarDecl] {
        match self.kind {
            DescriptorKind::App => &[],
            DescriptorKind::Version => &self.env_config,
        }
    }

    /// Start arguments; always empty for the app variant.
    pub fn start_args(&self) -> &[String] {
        match self.kind {
            DescriptorKind::App => &[],
            DescriptorKind::Version => &self.start_args,
        }
    }

    pub fn target_os(&self) -> &str {
        &self.os
    }

    pub fn target_arch(&self) -> &str {
        &self.arch
    }

    /// Canonical JSON bytes embedded (base64) in the manifest and app info block.
    pub fn to_json(&self) -> PackResult<Vec<u8>> {
        let json = match self.kind {
            DescriptorKind::App => serde_json::to_vec(&Descriptor::app(&self.name, &self.desc))?,
            DescriptorKind::Version => serde_json::to_vec(self)?,
        };
        Ok(json)
    }

    /// Parse descriptor JSON as the given kind.
    pub fn from_json(kind: DescriptorKind, json: &[u8]) -> PackResult<Self> {
        let mut descriptor: Descriptor = serde_json::from_slice(json)?;
        descriptor.kind = kind;
        Ok(descriptor)
    }

    /// Reject descriptors that cannot identify anything.
    pub fn validate(&self) -> PackResult<()> {
        if self.name.trim().is_empty() {
            return Err(PackError::Validation(format!(
                "{:?} descriptor needs a name",
                self.kind
            )));
        }
        Ok(())
    }
}
