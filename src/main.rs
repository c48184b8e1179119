//! app-runner: the installer stub
//!
//! Ships next to an installer bundle (`app.content`, `cert.info`,
//! `app.info`) and hands the package to the locally running agent.
//!
//! ## Usage
//!
//! ```bash
//! # Describe the packaged app
//! app-runner
//!
//! # Push the package to the agent over mutual TLS
//! app-runner install
//!
//! # Use a bundle somewhere else
//! app-runner --bundle /opt/shop.bundle install
//! ```
//!
//! Without `--bundle` the `APP_RUNNER_BUNDLE` variable is consulted, then
//! `<exe dir>/<exe stem>.bundle`.
//!
//! Failures are printed on stdout and mapped to distinct exit codes:
//! 2 usage, 5 malformed bundle, 6 unreadable credentials, 7 expired
//! credential, 8 agent or protocol failure, 9 local I/O, 12 connection.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use apppack_core::{AgentEndpoint, InstallerBundle, PackError};
use clap::{Parser, Subcommand};
use tracing::info;

/// Environment variable naming the bundle directory.
const BUNDLE_ENV: &str = "APP_RUNNER_BUNDLE";

const BUNDLE_SUFFIX: &str = ".bundle";

/// Installer stub for an encrypted app package
#[derive(Parser, Debug)]
#[command(name = "app-runner")]
#[command(about = "Install an encrypted app package through the local agent")]
struct Args {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Installer bundle directory
    #[arg(short, long, global = true)]
    bundle: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Action>,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Deliver the package to the agent
    Install,
}

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

/// Resolve the bundle directory from flag, environment, then executable name.
fn bundle_dir(flag: Option<PathBuf>, env: Option<OsString>) -> PathBuf {
    flag.or_else(|| env.filter(|v| !v.is_empty()).map(PathBuf::from))
        .unwrap_or_else(default_bundle_dir)
}

fn default_bundle_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| {
            let mut name = exe.file_stem()?.to_os_string();
            name.push(BUNDLE_SUFFIX);
            Some(exe.with_file_name(name))
        })
        .unwrap_or_else(|| PathBuf::from(format!("app-runner{}", BUNDLE_SUFFIX)))
}

async fn run(args: Args) -> Result<()> {
    let dir = bundle_dir(args.bundle, std::env::var_os(BUNDLE_ENV));

    match args.command {
        None => {
            let app_info = InstallerBundle::load_app_info(&dir)
                .with_context(|| format!("failed to read app info from {}", dir.display()))?;
            println!("{}", app_info.describe()?);
        }
        Some(Action::Install) => {
            let bundle = InstallerBundle::load_from_dir(&dir)
                .with_context(|| format!("failed to load bundle {}", dir.display()))?;
            let endpoint = AgentEndpoint::local(bundle.app_info.port, bundle.certs);
            info!(addr = %endpoint.addr(), app = bundle.app_info.app.name(), "Installing package");

            let receipt = endpoint.install(&bundle.content).await?;
            println!(
                "Installed {} {}",
                bundle.app_info.app.name(),
                bundle.app_info.version.name()
            );
            println!("  MD5: {}", receipt.md5_hex);
            println!("  SHA-1: {}", receipt.sha1_hex);
            if !receipt.payload_ack.is_empty() {
                println!("  Agent: {}", receipt.payload_ack);
            }
        }
    }
    Ok(())
}

/// Exit code for a failure; anything not raised by the library is 1.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<PackError>()
        .map(|e| e.exit_code())
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    setup_logging(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}
