//! Delivery protocol engine
//!
//! - [`frame`]: `&&`-delimited hex framing and chunk reassembly
//! - [`client`]: the install request/ack sequence over any async stream
//! - [`tls`]: expiry check and mutual TLS connection to the local agent

pub mod client;
pub mod frame;
pub mod tls;

pub use client::{DeliveryReceipt, InstallSession, PAYLOAD_DIR_PREFIX, PAYLOAD_FILE_NAME};
pub use frame::{decode_frame, encode_frame, end_frame, FrameDecoder, DELIMITER, END_MARKER};
pub use tls::{client_config, AgentEndpoint, AGENT_SERVER_NAME};
