//! apppack CLI
//!
//! Thin wrapper around apppack-core for building and inspecting packages.
//!
//! ## Usage
//!
//! ```bash
//! # Generate the recipient key pair a package is encrypted to
//! apppack keygen --out-dir keys
//!
//! # Build an installer bundle from a JSON build file
//! apppack build --config build.json
//!
//! # Open a bundle with the recipient's private key
//! apppack inspect --bundle dist --key keys/recipient.key
//!
//! # Sign a helper executable into a plugin descriptor
//! apppack plugin keygen --out plugin.seed
//! apppack plugin sign --key plugin.seed --type before --exe ./wait-db --out wait-db.json
//!
//! # Act as a helper executable (honours __cmd__)
//! apppack gate telnet --host db.internal:5432 --timeout 120 --interval 5
//! apppack gate time --until 2027-01-01T00:00:00Z
//!
//! # Ask a helper executable what it is
//! apppack probe ./wait-db
//! ```

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use apppack_core::helper::{self, ControlMode};
use apppack_core::jar::JarEncryptRequest;
use apppack_core::manifest::JarPasswordMap;
use apppack_core::plugin::PluginPayload;
use apppack_core::{
    build_package, open_container, BuildConfig, Command, Digests, EnvVarDecl, Gate,
    InstallerBundle, JarEncryptor, Manifest, PackError, PackResult, PluginDescriptor,
    PluginSigner, PluginType, RecipientPrivateKey, SegmentKind,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use ed25519_dalek::VerifyingKey;
use tracing::info;

const RECIPIENT_KEY_FILE: &str = "recipient.key";
const RECIPIENT_PUB_FILE: &str = "recipient.pub";

/// apppack - encrypted single-file app packages
#[derive(Parser)]
#[command(name = "apppack")]
#[command(version = "0.1.0")]
#[command(about = "Build and inspect encrypted app packages")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an installer bundle from a JSON build file
    Build {
        /// Build file
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory (overrides outputDir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decrypt and describe a bundle or raw container
    Inspect {
        /// Bundle directory written by `build`
        #[arg(long, conflicts_with = "container", required_unless_present = "container")]
        bundle: Option<PathBuf>,

        /// Raw sealed container file
        #[arg(long)]
        container: Option<PathBuf>,

        /// Recipient private key (PEM)
        #[arg(short, long)]
        key: PathBuf,

        /// Verify plugin signatures against this hex Ed25519 public key
        #[arg(long)]
        plugin_key: Option<String>,
    },

    /// Generate an RSA recipient key pair
    Keygen {
        /// Directory to write recipient.key and recipient.pub into
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// Modulus size in bits
        #[arg(long, default_value_t = 2048)]
        bits: usize,
    },

    /// Plugin descriptor management
    Plugin {
        #[command(subcommand)]
        action: PluginAction,
    },

    /// Run as a helper gate
    Gate {
        #[command(subcommand)]
        gate: GateKind,
    },

    /// Ask a helper executable to describe itself
    Probe {
        /// Helper executable
        path: PathBuf,

        /// Also run its gate to completion
        #[arg(long)]
        start: bool,
    },
}

#[derive(Subcommand)]
enum PluginAction {
    /// Generate a signing key; writes the seed and prints the public key
    Keygen {
        /// Where to write the hex seed
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Sign a helper executable
    Sign {
        /// Hex seed file from `plugin keygen`
        #[arg(short, long)]
        key: PathBuf,

        /// Plugin type: listener, normal, before or after
        #[arg(short = 't', long = "type")]
        plugin_type: PluginType,

        /// Helper executable
        #[arg(short, long)]
        exe: PathBuf,

        /// Environment variable declaration, NAME=description=default
        #[arg(long = "env")]
        env: Vec<String>,

        /// Descriptor output file (stdout when omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Check a descriptor against its executable and a public key
    Verify {
        /// Hex Ed25519 public key
        #[arg(long)]
        public: String,

        /// Descriptor JSON
        #[arg(short, long)]
        descriptor: PathBuf,

        /// Helper executable
        #[arg(short, long)]
        exe: PathBuf,
    },
}

#[derive(Subcommand)]
enum GateKind {
    /// Licence listener that reports expiry at a deadline
    Time {
        /// RFC 3339 timestamp, or "YYYY-MM-DD HH:MM:SS" in UTC
        #[arg(long)]
        until: String,
    },

    /// Wait until a TCP address accepts connections
    Telnet {
        /// host:port to probe (overridden by telnet_host)
        #[arg(long)]
        host: String,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,

        /// Seconds between attempts
        #[arg(long, default_value_t = 5)]
        interval: u64,

        /// Run before or after the application starts
        #[arg(long, default_value = "before")]
        stage: PluginType,
    },
}

/// Used for builds that carry no jar; reaching it means the request was inconsistent.
struct NoJarTool;

impl JarEncryptor for NoJarTool {
    fn encrypt(&self, _request: &JarEncryptRequest<'_>) -> PackResult<JarPasswordMap> {
        Err(PackError::Validation(
            "no jar encryption tool configured for this build".into(),
        ))
    }
}

/// Setup logging based on verbosity level
///
/// Logs go to stderr so helper output on stdout stays machine-readable.
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Parse `NAME=description=default`; description and default may be omitted.
fn parse_env_decl(s: &str) -> Result<EnvVarDecl> {
    let mut parts = s.splitn(3, '=');
    let name = parts.next().unwrap_or_default().trim();
    if name.is_empty() {
        bail!("environment declaration {:?} has no name", s);
    }
    let desc = parts.next().unwrap_or_default();
    let default_val = parts.next().unwrap_or_default();
    Ok(EnvVarDecl::new(name, desc, default_val))
}

fn parse_deadline(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("invalid deadline: {}", s))?;
    Ok(naive.and_utc())
}

fn parse_verifying_key(hex_key: &str) -> Result<VerifyingKey> {
    let bytes = hex::decode(hex_key.trim()).context("public key is not hex")?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow!("public key must be 32 bytes"))?;
    VerifyingKey::from_bytes(&bytes).context("invalid Ed25519 public key")
}

fn build(config_path: &Path, output: Option<PathBuf>) -> Result<()> {
    let config = BuildConfig::load(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let request = config.into_request()?;

    let output_dir = output.unwrap_or_else(|| config.output_dir());
    let package = match config.command {
        Command::InstallApp => build_package(&request, &config.jar_encryptor()?)?,
        _ => build_package(&request, &NoJarTool)?,
    };
    let info = package.app_info.clone();
    let bundle = package.into_bundle(config.cert_bundle()?)?;
    bundle.write_to_dir(&output_dir)?;
    info!(output = %output_dir.display(), "Bundle written");

    let payload = Digests::of_bytes(&bundle.content);
    println!("Built {} package", config.command);
    println!("  App: {} {}", info.app.name(), info.version.name());
    println!("  Agent port: {}", info.port);
    println!("  Plugins: {}", request.plugins.len());
    println!("  Payload: {} bytes", bundle.content.len());
    println!("  Payload MD5: {}", payload.md5_hex());
    println!("  Output: {}", output_dir.display());
    Ok(())
}

fn inspect(
    bundle: Option<PathBuf>,
    container: Option<PathBuf>,
    key: &Path,
    plugin_key: Option<String>,
) -> Result<()> {
    let private_key = RecipientPrivateKey::from_pem(&fs::read_to_string(key)?)?;
    let plugin_key = plugin_key.as_deref().map(parse_verifying_key).transpose()?;

    let sealed = match (bundle, container) {
        (Some(dir), _) => {
            let bundle = InstallerBundle::load_from_dir(&dir)?;
            println!("Bundle: {}", dir.display());
            println!("  Agent port: {}", bundle.app_info.port);
            match bundle.certs.user_not_after() {
                Ok(expires) => println!("  User certificate expires: {}", expires.to_rfc3339()),
                Err(e) => println!("  User certificate: unreadable ({})", e),
            }
            bundle.container()?
        }
        (None, Some(path)) => fs::read(&path)?,
        (None, None) => bail!("either --bundle or --container is required"),
    };

    let opened = open_container(&sealed, &private_key)?;
    let manifest = Manifest::parse(&opened.manifest, private_key.wrapped_key_len())?;

    println!("Container: {} bytes", sealed.len());
    println!("  Manifest MD5: {}", opened.digests.md5_hex());
    println!("  Manifest SHA-1: {}", opened.digests.sha1_hex());
    println!("Command: {}", manifest.command);
    println!("App: {} ({})", manifest.app.name(), manifest.app.description());
    println!(
        "Version: {} ({})",
        manifest.version.name(),
        manifest.version.description()
    );
    if !manifest.version.target_os().is_empty() {
        println!(
            "  Target: {}/{}",
            manifest.version.target_os(),
            manifest.version.target_arch()
        );
    }
    for env in manifest.version.env_config() {
        println!("  Env: {}={} ({})", env.name, env.default_val, env.desc);
    }
    if let Some(passwords) = &manifest.passwords {
        println!("Jar password entries: {}", passwords.len());
    }

    println!("Segments ({}):", manifest.segments.len());
    for (i, segment) in manifest.segments.iter().enumerate() {
        println!(
            "  [{}] {} ({} bytes sealed)",
            i,
            segment.kind,
            segment.ciphertext_len()
        );
        if segment.kind != SegmentKind::Plugin {
            continue;
        }
        let payload = PluginPayload::parse(&segment.open(&private_key)?)?;
        let descriptor = payload.descriptor()?;
        let digests = Digests::of_bytes(&payload.executable);
        println!(
            "      type {} md5 {} executable {} bytes",
            descriptor.plugin_type,
            digests.md5_hex(),
            payload.executable.len()
        );
        if let Some(key) = &plugin_key {
            let verdict = match descriptor.verify(key) {
                Ok(()) if descriptor.matches_executable(Cursor::new(&payload.executable))? => {
                    "valid".to_string()
                }
                Ok(()) => "signature valid, executable differs".to_string(),
                Err(e) => e.to_string(),
            };
            println!("      signature: {}", verdict);
        }
    }
    Ok(())
}

fn keygen(out_dir: &Path, bits: usize) -> Result<()> {
    let key = RecipientPrivateKey::generate(bits)?;
    fs::create_dir_all(out_dir)?;
    let private_path = out_dir.join(RECIPIENT_KEY_FILE);
    let public_path = out_dir.join(RECIPIENT_PUB_FILE);
    fs::write(&private_path, key.to_pem()?)?;
    fs::write(&public_path, key.public_key().to_pem()?)?;
    println!("Generated {}-bit recipient key", bits);
    println!("  Private: {}", private_path.display());
    println!("  Public: {}", public_path.display());
    Ok(())
}

fn plugin(action: PluginAction) -> Result<()> {
    match action {
        PluginAction::Keygen { out } => {
            let signer = PluginSigner::generate()?;
            fs::write(&out, signer.seed_hex())?;
            println!("Signing seed written to {}", out.display());
            println!("  Public key: {}", hex::encode(signer.verifying_key().to_bytes()));
        }
        PluginAction::Sign {
            key,
            plugin_type,
            exe,
            env,
            out,
        } => {
            let signer = PluginSigner::from_seed_hex(&fs::read_to_string(&key)?)?;
            let env = env
                .iter()
                .map(|s| parse_env_decl(s))
                .collect::<Result<Vec<_>>>()?;
            let descriptor = signer.describe(plugin_type, &exe, env)?;
            let json = serde_json::to_string_pretty(&descriptor)?;
            match out {
                Some(path) => {
                    fs::write(&path, &json)?;
                    println!("Descriptor written to {}", path.display());
                }
                None => println!("{}", json),
            }
        }
        PluginAction::Verify {
            public,
            descriptor,
            exe,
        } => {
            let key = parse_verifying_key(&public)?;
            let descriptor = PluginDescriptor::from_json(&fs::read(&descriptor)?)?;
            descriptor.verify(&key)?;
            if !descriptor.matches_executable(fs::File::open(&exe)?)? {
                bail!("{} does not match the descriptor digests", exe.display());
            }
            println!("Descriptor is valid for {}", exe.display());
        }
    }
    Ok(())
}

async fn gate(kind: GateKind) -> Result<()> {
    let gate = match kind {
        GateKind::Time { until } => Gate::Expiry {
            deadline: parse_deadline(&until)?,
        },
        GateKind::Telnet {
            host,
            timeout,
            interval,
            stage,
        } => {
            if !matches!(stage, PluginType::Before | PluginType::After) {
                bail!("telnet gate stage must be before or after");
            }
            Gate::Reachable {
                host,
                timeout: Duration::from_secs(timeout),
                interval: Duration::from_secs(interval),
                stage,
            }
        }
    };
    gate.serve(ControlMode::current(), std::io::stdout()).await?;
    Ok(())
}

async fn probe(path: &Path, start: bool) -> Result<()> {
    let info = helper::probe(path).await?;
    println!("Type: {}", info.plugin_type);
    println!("Description: {}", info.desc);
    if start {
        helper::start(path).await?;
        println!("Gate passed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Build { config, output } => build(&config, output),
        Commands::Inspect {
            bundle,
            container,
            key,
            plugin_key,
        } => inspect(bundle, container, &key, plugin_key),
        Commands::Keygen { out_dir, bits } => keygen(&out_dir, bits),
        Commands::Plugin { action } => plugin(action),
        Commands::Gate { gate: kind } => gate(kind).await,
        Commands::Probe { path, start } => probe(&path, start).await,
    }
}
