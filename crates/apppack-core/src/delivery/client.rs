//! Client side of the install exchange
//!
//! One task reads the transport and feeds complete frames into an unbounded
//! channel; [`InstallSession::run`] drives the request/ack sequence and
//! consumes them:
//!
//! ```text
//! client                                   agent
//!   | hex("import")&&                        |
//!   |                     <-- status&& body&& |
//!   | hex(hex(md5))&& hex(hex(sha1))&&       |
//!   | hex(temp file path)&&                  |
//!   |                     <-- status&& body&& |
//!   | end!!&&                                |
//! ```
//!
//! A status that decodes to `error` means the following frame is the
//! agent's failure description.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::frame::{decode_frame, encode_frame, end_frame, FrameDecoder, ERROR_STATUS};
use crate::crypto::Digests;
use crate::error::{PackError, PackResult};

const READ_BUFFER: usize = 64 * 1024;

/// Prefix of the scoped directory holding the pushed payload.
pub const PAYLOAD_DIR_PREFIX: &str = "appRunnerPlatform";

/// File name of the pushed payload inside that directory.
pub const PAYLOAD_FILE_NAME: &str = "appRunner";

/// Outcome of a successful install exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub md5_hex: String,
    pub sha1_hex: String,
    pub payload_len: u64,
    /// Body the agent sent with its `import` acknowledgement
    pub import_ack: String,
    /// Body the agent sent once it took the payload
    pub payload_ack: String,
}

/// One install exchange over an established stream.
pub struct InstallSession<S> {
    writer: WriteHalf<S>,
    messages: mpsc::UnboundedReceiver<Vec<u8>>,
    reader: JoinHandle<()>,
}

impl<S> InstallSession<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Split `stream` and start the frame reader task.
    pub fn new(stream: S) -> Self {
        let (read_half, writer) = tokio::io::split(stream);
        let (tx, messages) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_frames(read_half, tx));
        Self {
            writer,
            messages,
            reader,
        }
    }

    /// Push `payload` to the agent by reference.
    ///
    /// The payload is written to a temp file whose path is sent to the agent;
    /// that file and its directory are removed when this returns, on every
    /// path.
    pub async fn run(mut self, payload: &[u8]) -> PackResult<DeliveryReceipt> {
        self.send(&encode_frame(b"import")).await?;
        let import_ack = self.await_ack("import").await?;

        let digests = Digests::of_bytes(payload);
        let md5_hex = digests.md5_hex();
        let sha1_hex = digests.sha1_hex();
        self.send(&encode_frame(md5_hex.as_bytes())).await?;
        self.send(&encode_frame(sha1_hex.as_bytes())).await?;

        let staging = tempfile::Builder::new()
            .prefix(PAYLOAD_DIR_PREFIX)
            .tempdir()?;
        let payload_path = staging.path().join(PAYLOAD_FILE_NAME);
        tokio::fs::write(&payload_path, payload).await?;
        debug!(path = %payload_path.display(), len = payload.len(), "Staged payload");

        self.send(&encode_frame(payload_path.to_string_lossy().as_bytes()))
            .await?;
        let payload_ack = self.await_ack("payload").await?;

        self.send(&end_frame()).await?;
        if let Err(e) = self.writer.shutdown().await {
            debug!(error = %e, "Closing write half failed");
        }

        info!(md5 = %md5_hex, len = payload.len(), "Payload delivered");
        Ok(DeliveryReceipt {
            md5_hex,
            sha1_hex,
            payload_len: payload.len() as u64,
            import_ack,
            payload_ack,
        })
    }

    async fn send(&mut self, frame: &[u8]) -> PackResult<()> {
        self.writer
            .write_all(frame)
            .await
            .map_err(|e| PackError::Transport(format!("write failed: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| PackError::Transport(format!("flush failed: {}", e)))
    }

    async fn next_frame(&mut self) -> PackResult<Vec<u8>> {
        let frame = self
            .messages
            .recv()
            .await
            .ok_or_else(|| PackError::Protocol("unexpected end of exchange".into()))?;
        if frame.is_empty() {
            return Err(PackError::Protocol("empty frame".into()));
        }
        Ok(frame)
    }

    /// Read a status frame and its body frame.
    async fn await_ack(&mut self, step: &str) -> PackResult<String> {
        let status = decode_frame(&self.next_frame().await?)?;
        let body = self.next_frame().await?;

        if status == ERROR_STATUS {
            let reason = String::from_utf8_lossy(&decode_frame(&body)?).into_owned();
            warn!(step, reason = %reason, "Agent rejected request");
            return Err(PackError::AgentRejected(reason));
        }

        let text = match hex::decode(&body) {
            Ok(decoded) => String::from_utf8_lossy(&decoded).into_owned(),
            Err(_) => String::from_utf8_lossy(&body).into_owned(),
        };
        debug!(step, status = %String::from_utf8_lossy(&status), body = %text, "Agent acknowledged");
        Ok(text)
    }
}

impl<S> Drop for InstallSession<S> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Read until EOF or error, forwarding each complete frame.
async fn read_frames<R: AsyncRead>(mut reader: ReadHalf<R>, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("Agent closed the stream");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "Read from agent failed");
                break;
            }
        };
        for frame in decoder.push(&buf[..n]) {
            if tx.send(frame).is_err() {
                return;
            }
        }
    }
    if !decoder.pending().is_empty() {
        debug!(pending = decoder.pending().len(), "Discarding unterminated frame");
    }
}
