//! Property-based tests for framing and the chunked cipher
//!
//! Uses proptest to check that results do not depend on how bytes arrive.

use apppack_core::crypto::{sealed_len, ChunkCipher};
use apppack_core::delivery::{decode_frame, encode_frame, FrameDecoder};
use proptest::prelude::*;

// ============================================================================
// Strategy Generators
// ============================================================================

/// Between one and eight messages; empty messages are not valid frames
fn messages_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..8)
}

/// Cut points used to split a byte stream into reads
fn cuts_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..2048, 0..16)
}

fn split_at_cuts(bytes: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (bytes.len() + 1)).collect();
    points.sort_unstable();
    points.dedup();

    let mut chunks = Vec::new();
    let mut start = 0;
    for point in points {
        chunks.push(bytes[start..point].to_vec());
        start = point;
    }
    chunks.push(bytes[start..].to_vec());
    chunks
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// However the wire bytes are chunked, the same messages come out in order
    #[test]
    fn frames_survive_any_chunking(messages in messages_strategy(), cuts in cuts_strategy()) {
        let wire: Vec<u8> = messages.iter().flat_map(|m| encode_frame(m)).collect();

        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for chunk in split_at_cuts(&wire, &cuts) {
            for frame in decoder.push(&chunk) {
                decoded.push(decode_frame(&frame).unwrap());
            }
        }

        prop_assert_eq!(decoded, messages);
        prop_assert!(decoder.pending().is_empty());
    }

    /// Encrypting then decrypting with the same key returns the input
    #[test]
    fn cipher_roundtrip(data in prop::collection::vec(any::<u8>(), 0..8192)) {
        let cipher = ChunkCipher::new(&ChunkCipher::generate_key());

        let mut sealed = Vec::new();
        let written = cipher.encrypt_stream(&data[..], &mut sealed).unwrap();
        prop_assert_eq!(written, sealed.len() as u64);
        prop_assert_eq!(sealed.len() as u64, sealed_len(data.len() as u64));

        let mut opened = Vec::new();
        cipher.decrypt_stream(&sealed[..], &mut opened).unwrap();
        prop_assert_eq!(opened, data);
    }

    /// Any single flipped bit makes decryption fail
    #[test]
    fn cipher_detects_corruption(
        data in prop::collection::vec(any::<u8>(), 0..2048),
        bit in any::<usize>(),
    ) {
        let cipher = ChunkCipher::new(&ChunkCipher::generate_key());
        let mut sealed = Vec::new();
        cipher.encrypt_stream(&data[..], &mut sealed).unwrap();

        let bit = bit % (sealed.len() * 8);
        sealed[bit / 8] ^= 1 << (bit % 8);

        let mut opened = Vec::new();
        prop_assert!(cipher.decrypt_stream(&sealed[..], &mut opened).is_err());
    }
}
