//! App Package Core Library
//!
//! Encrypted single-file app packages and the protocol an installer stub uses
//! to hand their payload to a locally running agent.
//!
//! ## Overview
//!
//! A build turns an application jar (plus optional signed plugins) or a JDK
//! archive into a *container*: a manifest of independently encrypted
//! segments, itself sealed under a fresh content key and prefixed with the
//! MD5/SHA-1 of its plaintext. The container is compressed and embedded in an
//! installer bundle next to a certificate bundle and a plaintext app info
//! block. At install time the stub connects to the agent over mutual TLS and
//! pushes the payload by reference through a temp file.
//!
//! ## Layers
//!
//! - **Envelope primitives** ([`crypto`]): chunked AES-GCM, RSA-OAEP key wrapping, digests
//! - **Segments** ([`segment`]): one self-describing encrypted payload unit
//! - **Builder** ([`builder`], [`manifest`], [`container`]): manifest assembly and outer envelope
//! - **Delivery** ([`delivery`]): `&&`-framed hex exchange with the agent
//!
//! ## Quick Start
//!
//! ```ignore
//! use apppack_core::{Command, Descriptor, PackageBuilder, RecipientKey};
//!
//! let recipient = RecipientKey::from_pem(&std::fs::read_to_string("root.pem")?)?;
//! let container = PackageBuilder::new(recipient)?
//!     .add_jdk_archive(std::fs::File::open("jdk.tar.gz")?)?
//!     .finalize(
//!         Command::InstallJdk,
//!         Some(&Descriptor::app("jdk", "Runtime")),
//!         Some(&Descriptor::version("17", "LTS")),
//!         Some(7443),
//!     )?;
//! ```

pub mod archive;
pub mod builder;
pub mod bundle;
pub mod cert;
pub mod config;
pub mod container;
pub mod crypto;
pub mod delivery;
pub mod descriptor;
pub mod error;
pub mod helper;
pub mod jar;
pub mod manifest;
pub mod plugin;
pub mod request;
pub mod segment;

// Re-exports
pub use builder::PackageBuilder;
pub use bundle::{AppInfoBlock, InstallerBundle};
pub use cert::CertBundle;
pub use config::BuildConfig;
pub use container::{open_container, OpenedContainer};
pub use crypto::{ChunkCipher, Digests, RecipientKey, RecipientPrivateKey};
pub use delivery::{AgentEndpoint, DeliveryReceipt, InstallSession};
pub use descriptor::{Descriptor, DescriptorKind, EnvVarDecl};
pub use error::{PackError, PackResult};
pub use helper::{Gate, HelperInfo};
pub use jar::{ExternalJarEncryptor, JarEncryptor};
pub use manifest::{Command, Manifest, ManifestReader, ManifestWriter};
pub use plugin::{PluginDescriptor, PluginSet, PluginSigner, PluginType};
pub use request::{build_package, BuildRequest, PackageOutput};
pub use segment::{Segment, SegmentKind};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::OnceLock;

    use crate::crypto::RecipientPrivateKey;

    static PRIMARY: OnceLock<RecipientPrivateKey> = OnceLock::new();
    static OTHER: OnceLock<RecipientPrivateKey> = OnceLock::new();

    /// RSA-2048 key shared by every unit test; generated once per process.
    pub fn test_private_key() -> &'static RecipientPrivateKey {
        PRIMARY.get_or_init(|| RecipientPrivateKey::generate(2048).expect("keygen"))
    }

    /// A second, unrelated key for mismatch tests.
    pub fn other_private_key() -> &'static RecipientPrivateKey {
        OTHER.get_or_init(|| RecipientPrivateKey::generate(2048).expect("keygen"))
    }
}
