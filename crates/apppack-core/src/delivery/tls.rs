//! Mutual TLS connection to the local agent

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use chrono::Utc;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use super::client::{DeliveryReceipt, InstallSession};
use crate::cert::CertBundle;
use crate::error::{PackError, PackResult};

/// Name the agent's certificate is issued for.
pub const AGENT_SERVER_NAME: &str = "localhost";

/// Where the agent listens and how to authenticate to it.
#[derive(Debug, Clone)]
pub struct AgentEndpoint {
    pub host: IpAddr,
    pub port: u16,
    pub certs: CertBundle,
}

impl AgentEndpoint {
    /// Agent on `127.0.0.1:<port>`.
    pub fn local(port: u16, certs: CertBundle) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            certs,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Check the client certificate, then connect and complete the handshake.
    ///
    /// An expired certificate fails before any socket is opened.
    pub async fn connect(&self) -> PackResult<TlsStream<TcpStream>> {
        self.certs.ensure_valid_at(Utc::now())?;
        let config = client_config(&self.certs)?;

        let addr = self.addr();
        debug!(%addr, "Connecting to agent");
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| PackError::Transport(format!("connect to {} failed: {}", addr, e)))?;

        let server_name = ServerName::try_from(AGENT_SERVER_NAME)
            .map_err(|e| PackError::Transport(format!("invalid server name: {}", e)))?;
        let stream = TlsConnector::from(config)
            .connect(server_name, tcp)
            .await
            .map_err(|e| PackError::Transport(format!("TLS handshake failed: {}", e)))?;

        info!(%addr, "Connected to agent");
        Ok(stream)
    }

    /// Connect and push `payload` through a full install exchange.
    pub async fn install(&self, payload: &[u8]) -> PackResult<DeliveryReceipt> {
        let stream = self.connect().await?;
        InstallSession::new(stream).run(payload).await
    }
}

/// Client config trusting only the bundle's root and presenting its user cert.
pub fn client_config(certs: &CertBundle) -> PackResult<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certificates(&certs.r)? {
        roots
            .add(cert)
            .map_err(|e| PackError::Certificate(format!("failed to add root certificate: {}", e)))?;
    }

    let chain = parse_certificates(&certs.u)?;
    let key = PrivateKeyDer::from_pem_slice(certs.uk.as_bytes())
        .map_err(|e| PackError::Certificate(format!("failed to parse user key: {}", e)))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| PackError::Transport(format!("TLS config error: {}", e)))?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(|e| PackError::Certificate(format!("client certificate rejected: {}", e)))?;
    Ok(Arc::new(config))
}

fn parse_certificates(pem: &str) -> PackResult<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_slice_iter(pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PackError::Certificate(format!("failed to parse certificates: {}", e)))?;
    if certs.is_empty() {
        return Err(PackError::Certificate("no certificates found".into()));
    }
    Ok(certs)
}
