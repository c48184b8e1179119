//! `&&`-delimited hex framing
//!
//! Every message on the wire is the lowercase hex encoding of its bytes
//! followed by `&&`. The closing `end!!&&` marker is the one frame that is
//! sent as-is.

use crate::error::{PackError, PackResult};

/// Frame terminator.
pub const DELIMITER: &[u8] = b"&&";

/// Literal that closes a session; sent without hex encoding.
pub const END_MARKER: &[u8] = b"end!!";

/// Status text the agent sends before a failure description.
pub const ERROR_STATUS: &[u8] = b"error";

/// Hex-encode `data` and append the delimiter.
pub fn encode_frame(data: &[u8]) -> Vec<u8> {
    let mut frame = hex::encode(data).into_bytes();
    frame.extend_from_slice(DELIMITER);
    frame
}

/// The raw closing frame, `end!!&&`.
pub fn end_frame() -> Vec<u8> {
    let mut frame = END_MARKER.to_vec();
    frame.extend_from_slice(DELIMITER);
    frame
}

/// Decode one received frame (without its delimiter).
pub fn decode_frame(frame: &[u8]) -> PackResult<Vec<u8>> {
    if frame.is_empty() {
        return Err(PackError::Protocol("empty frame".into()));
    }
    hex::decode(frame).map_err(|e| {
        PackError::Protocol(format!(
            "frame is not hex ({}): {:?}",
            e,
            String::from_utf8_lossy(&frame[..frame.len().min(64)])
        ))
    })
}

/// Reassembles frames from arbitrarily chunked reads.
///
/// Bytes after the last delimiter stay buffered until a later chunk
/// completes them.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every frame it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        // A delimiter may straddle the previous chunk's last byte
        let mut scan_from = self.pending.len().saturating_sub(DELIMITER.len() - 1);
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(pos) = find(&self.pending[scan_from..], DELIMITER) {
            let end = scan_from + pos;
            frames.push(self.pending[start..end].to_vec());
            start = end + DELIMITER.len();
            scan_from = start;
        }
        if start > 0 {
            self.pending.drain(..start);
        }
        frames
    }

    /// Bytes received since the last delimiter.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame() {
        assert_eq!(encode_frame(b"import"), b"696d706f7274&&");
        assert_eq!(end_frame(), b"end!!&&");
    }

    #[test]
    fn test_decode_frame() {
        assert_eq!(decode_frame(b"6f6b").unwrap(), b"ok");
        assert!(matches!(decode_frame(b""), Err(PackError::Protocol(_))));
        assert!(matches!(decode_frame(b"zz"), Err(PackError::Protocol(_))));
        assert!(matches!(decode_frame(b"abc"), Err(PackError::Protocol(_))));
    }

    #[test]
    fn test_single_frame_in_one_chunk() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push(b"6f6b&&"), vec![b"6f6b".to_vec()]);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_delimiter_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"6f6b&").is_empty());
        assert_eq!(decoder.push(b"&"), vec![b"6f6b".to_vec()]);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_no_delimiter_emits_nothing() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"6f").is_empty());
        assert!(decoder.push(b"6b").is_empty());
        assert!(decoder.push(b"&").is_empty());
        assert_eq!(decoder.pending(), b"6f6b&");
    }

    #[test]
    fn test_many_frames_and_tail_in_one_chunk() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"61&&62&&63&&6");
        assert_eq!(frames, vec![b"61".to_vec(), b"62".to_vec(), b"63".to_vec()]);
        assert_eq!(decoder.pending(), b"6");
        assert_eq!(decoder.push(b"4&&"), vec![b"64".to_vec()]);
    }

    #[test]
    fn test_empty_frames_are_surfaced() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push(b"&&&&"), vec![Vec::<u8>::new(), Vec::<u8>::new()]);
    }

    #[test]
    fn test_triple_ampersand() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push(b"61&&&"), vec![b"61".to_vec()]);
        assert_eq!(decoder.pending(), b"&");
        assert_eq!(decoder.push(b"&"), vec![Vec::<u8>::new()]);
    }
}
