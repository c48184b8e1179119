//! Helper executables and the gates they run
//!
//! A helper is any executable honouring the `__cmd__` control variable:
//!
//! - `info`: print `hex(JSON {type, desc});` on one line and exit
//! - `start`: run the gate, exit 0 once satisfied, non-zero on failure
//! - unset: print a human-readable description
//!
//! [`probe`] and [`start`] drive such executables; [`Gate`] implements the
//! two stock gates so a binary can serve as a helper itself.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::descriptor::EnvVarDecl;
use crate::error::{PackError, PackResult};
use crate::plugin::PluginType;

/// Control variable read by every helper.
pub const CONTROL_ENV: &str = "__cmd__";

/// Overrides the host a reachability gate probes.
pub const HOST_OVERRIDE_ENV: &str = "telnet_host";

/// Per-attempt connect timeout of the reachability gate.
pub const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(3);

/// What a helper says about itself under `__cmd__=info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperInfo {
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    pub desc: String,
}

impl HelperInfo {
    /// `hex(json);`
    pub fn encode_line(&self) -> PackResult<String> {
        Ok(format!("{};", hex::encode(serde_json::to_vec(self)?)))
    }

    /// Parse the first line of a helper's `info` output.
    pub fn parse_line(line: &str) -> PackResult<Self> {
        let line = line.trim();
        let encoded = line
            .strip_suffix(';')
            .ok_or_else(|| PackError::Helper(format!("info line is not ';'-terminated: {:?}", line)))?;
        let json = hex::decode(encoded)
            .map_err(|e| PackError::Helper(format!("info line is not hex: {}", e)))?;
        serde_json::from_slice(&json)
            .map_err(|e| PackError::Helper(format!("info line is not a helper descriptor: {}", e)))
    }
}

/// Mode selected by the control variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Info,
    Start,
    Describe,
}

impl ControlMode {
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some("info") => ControlMode::Info,
            Some("start") => ControlMode::Start,
            _ => ControlMode::Describe,
        }
    }

    /// Mode for the current process.
    pub fn current() -> Self {
        Self::from_env_value(std::env::var(CONTROL_ENV).ok().as_deref())
    }
}

/// Run `path` with `__cmd__=info` and parse what it reports.
pub async fn probe(path: &Path) -> PackResult<HelperInfo> {
    let output = Command::new(path)
        .env(CONTROL_ENV, "info")
        .output()
        .await
        .map_err(|e| PackError::Helper(format!("failed to run {}: {}", path.display(), e)))?;
    if !output.status.success() {
        return Err(PackError::Helper(format!(
            "{} exited with {} under info",
            path.display(),
            output.status
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .next()
        .ok_or_else(|| PackError::Helper(format!("{} printed nothing", path.display())))?;
    HelperInfo::parse_line(line)
}

/// Run `path` with `__cmd__=start` and wait for its gate to finish.
pub async fn start(path: &Path) -> PackResult<()> {
    let status = Command::new(path)
        .env(CONTROL_ENV, "start")
        .status()
        .await
        .map_err(|e| PackError::Helper(format!("failed to run {}: {}", path.display(), e)))?;
    if !status.success() {
        return Err(PackError::Helper(format!(
            "{} gate failed with {}",
            path.display(),
            status
        )));
    }
    Ok(())
}

/// The two stock gates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    /// Licence listener: blocks until `deadline`, then reports expiry.
    Expiry { deadline: DateTime<Utc> },
    /// Blocks until a TCP connect to `host` succeeds, failing after `timeout`.
    Reachable {
        host: String,
        timeout: Duration,
        interval: Duration,
        stage: PluginType,
    },
}

impl Gate {
    pub fn plugin_type(&self) -> PluginType {
        match self {
            Gate::Expiry { .. } => PluginType::Listener,
            Gate::Reachable { stage, .. } => *stage,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Gate::Expiry { deadline } => {
                format!("Time licence plugin, expires {}", deadline.format("%Y-%m-%d %H:%M:%S"))
            }
            Gate::Reachable {
                host,
                timeout,
                interval,
                ..
            } => format!(
                "Reachability plugin, target {}, timeout {}s, interval {}s",
                host,
                timeout.as_secs(),
                interval.as_secs()
            ),
        }
    }

    pub fn info(&self) -> HelperInfo {
        HelperInfo {
            plugin_type: self.plugin_type(),
            desc: self.description(),
        }
    }

    /// Environment variables the gate honours, for its plugin descriptor.
    pub fn env_config(&self) -> Vec<EnvVarDecl> {
        match self {
            Gate::Expiry { .. } => Vec::new(),
            Gate::Reachable { .. } => vec![EnvVarDecl::new(HOST_OVERRIDE_ENV, "host:port to probe", "")],
        }
    }

    /// Run the gate to completion; the message is what a helper prints on success.
    pub async fn run(&self) -> PackResult<String> {
        match self {
            Gate::Expiry { deadline } => {
                let remaining = (*deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                debug!(?remaining, "Waiting for licence deadline");
                tokio::time::sleep(remaining).await;
                Ok("Licence has expired".to_string())
            }
            Gate::Reachable {
                host,
                timeout,
                interval,
                ..
            } => {
                let host = effective_host(host, std::env::var(HOST_OVERRIDE_ENV).ok());
                wait_reachable(&host, *timeout, *interval).await?;
                Ok(format!("{} is reachable", host))
            }
        }
    }

    /// Behave as a helper executable for the given control `mode`.
    pub async fn serve<W: Write>(&self, mode: ControlMode, mut out: W) -> PackResult<()> {
        match mode {
            ControlMode::Info => writeln!(out, "{}", self.info().encode_line()?)?,
            ControlMode::Describe => writeln!(out, "{}", self.description())?,
            ControlMode::Start => {
                let message = self.run().await?;
                writeln!(out, "{}", message)?;
            }
        }
        Ok(())
    }
}

/// `override_host` wins when set and non-empty.
pub fn effective_host(default: &str, override_host: Option<String>) -> String {
    match override_host {
        Some(host) if !host.trim().is_empty() => host,
        _ => default.to_string(),
    }
}

async fn wait_reachable(host: &str, timeout: Duration, interval: Duration) -> PackResult<()> {
    let attempts = async {
        loop {
            info!(host, "Checking reachability");
            match tokio::time::timeout(CONNECT_ATTEMPT_TIMEOUT, TcpStream::connect(host)).await {
                Ok(Ok(_)) => return,
                Ok(Err(e)) => debug!(host, error = %e, "Connect failed"),
                Err(_) => debug!(host, "Connect attempt timed out"),
            }
            tokio::time::sleep(interval).await;
        }
    };
    tokio::time::timeout(timeout, attempts).await.map_err(|_| {
        warn!(host, ?timeout, "Host never became reachable");
        PackError::Helper(format!("{} not reachable within {}s", host, timeout.as_secs()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_line_roundtrip() {
        let info = HelperInfo {
            plugin_type: PluginType::Before,
            desc: "probe db".into(),
        };
        let line = info.encode_line().unwrap();
        assert!(line.ends_with(';'));
        assert_eq!(
            hex::decode(line.trim_end_matches(';')).unwrap(),
            br#"{"type":"before","desc":"probe db"}"#
        );
        assert_eq!(HelperInfo::parse_line(&format!("{}\n", line)).unwrap(), info);
    }

    #[test]
    fn test_info_line_errors() {
        assert!(HelperInfo::parse_line("7b7d").is_err());
        assert!(HelperInfo::parse_line("zz;").is_err());
        assert!(HelperInfo::parse_line("7b7d;").is_err());
    }

    #[test]
    fn test_control_mode() {
        assert_eq!(ControlMode::from_env_value(Some("info")), ControlMode::Info);
        assert_eq!(ControlMode::from_env_value(Some("start")), ControlMode::Start);
        assert_eq!(ControlMode::from_env_value(Some("other")), ControlMode::Describe);
        assert_eq!(ControlMode::from_env_value(None), ControlMode::Describe);
    }

    #[test]
    fn test_effective_host() {
        assert_eq!(effective_host("a:1", None), "a:1");
        assert_eq!(effective_host("a:1", Some("".into())), "a:1");
        assert_eq!(effective_host("a:1", Some("b:2".into())), "b:2");
    }

    #[test]
    fn test_gate_metadata() {
        let gate = Gate::Reachable {
            host: "127.0.0.1:5000".into(),
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(3),
            stage: PluginType::After,
        };
        assert_eq!(gate.plugin_type(), PluginType::After);
        assert_eq!(gate.env_config()[0].name, HOST_OVERRIDE_ENV);
        assert!(gate.description().contains("127.0.0.1:5000"));

        let expiry = Gate::Expiry { deadline: Utc::now() };
        assert_eq!(expiry.plugin_type(), PluginType::Listener);
        assert!(expiry.env_config().is_empty());
    }

    #[tokio::test]
    async fn test_expiry_in_past_returns_immediately() {
        let gate = Gate::Expiry {
            deadline: Utc::now() - chrono::Duration::hours(1),
        };
        assert_eq!(gate.run().await.unwrap(), "Licence has expired");
    }

    #[tokio::test]
    async fn test_reachable_succeeds() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = listener.local_addr().unwrap().to_string();
        wait_reachable(&host, Duration::from_secs(5), Duration::from_millis(50))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reachable_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = wait_reachable(&host, Duration::from_millis(300), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, PackError::Helper(_)));
    }

    #[tokio::test]
    async fn test_serve_info_and_describe() {
        let gate = Gate::Expiry {
            deadline: Utc::now(),
        };
        let mut out = Vec::new();
        gate.serve(ControlMode::Info, &mut out).await.unwrap();
        let line = String::from_utf8(out).unwrap();
        assert_eq!(HelperInfo::parse_line(&line).unwrap(), gate.info());

        let mut out = Vec::new();
        gate.serve(ControlMode::Describe, &mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("Time licence plugin"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_and_start_script_helper() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let line = HelperInfo {
            plugin_type: PluginType::Normal,
            desc: "scripted".into(),
        }
        .encode_line()
        .unwrap();
        let script = dir.path().join("helper");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\ncase \"$__cmd__\" in\n  info) echo '{}' ;;\n  start) exit 4 ;;\n  *) echo scripted ;;\nesac\n",
                line
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let info = probe(&script).await.unwrap();
        assert_eq!(info.desc, "scripted");
        assert!(matches!(start(&script).await, Err(PackError::Helper(_))));
    }
}
