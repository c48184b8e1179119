//! Self-describing encrypted segments
//!
//! Wire layout of one segment:
//!
//! ```text
//! <kind> ; <wrapped key> <decimal ciphertext length> ; <ciphertext>
//! ```
//!
//! The wrapped key and the length digits are adjacent with no separator; a
//! reader splits them using the recipient key's fixed wrapped-key length.

use std::fmt;
use std::io::{self, BufRead, Read, Seek, SeekFrom, Write};
use std::str::FromStr;

use tracing::debug;

use crate::crypto::{ChunkCipher, RecipientKey, RecipientPrivateKey};
use crate::error::{PackError, PackResult};

/// Field separator used throughout the manifest.
pub const FIELD_SEPARATOR: u8 = b';';

/// Content kind carried by a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// The (already jar-encrypted) application archive
    Jar,
    /// One plugin payload unit: descriptor JSON plus helper executable
    Plugin,
    /// A JDK runtime archive
    Jdk,
}

impl SegmentKind {
    /// ASCII tag written at the head of the segment.
    pub fn as_tag(&self) -> &'static str {
        match self {
            SegmentKind::Jar => "jar",
            SegmentKind::Plugin => "plugin",
            SegmentKind::Jdk => "jdk",
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl FromStr for SegmentKind {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jar" => Ok(SegmentKind::Jar),
            "plugin" => Ok(SegmentKind::Plugin),
            "jdk" => Ok(SegmentKind::Jdk),
            other => Err(PackError::Format(format!("Unknown segment kind: {}", other))),
        }
    }
}

/// Encrypt `src` as one segment of `kind` and write it to `dst`.
///
/// The ciphertext is staged in an anonymous temp file so its length can be
/// written ahead of it; the temp file is removed when this returns, whether
/// or not the segment was written. Returns the number of bytes written.
pub fn encode_segment<R: Read, W: Write>(
    kind: SegmentKind,
    recipient: &RecipientKey,
    src: R,
    mut dst: W,
) -> PackResult<u64> {
    let key = ChunkCipher::generate_key();
    let cipher = ChunkCipher::new(&key);

    let mut staged = tempfile::tempfile()?;
    {
        let mut sink = io::BufWriter::new(&mut staged);
        cipher.encrypt_stream(src, &mut sink)?;
        sink.flush()?;
    }
    let ciphertext_len = staged.seek(SeekFrom::End(0))?;
    staged.seek(SeekFrom::Start(0))?;

    let wrapped = recipient.encrypt(&key)?;
    let length = ciphertext_len.to_string();

    dst.write_all(kind.as_tag().as_bytes())?;
    dst.write_all(&[FIELD_SEPARATOR])?;
    dst.write_all(&wrapped)?;
    dst.write_all(length.as_bytes())?;
    dst.write_all(&[FIELD_SEPARATOR])?;
    let copied = io::copy(&mut staged, &mut dst)?;
    if copied != ciphertext_len {
        return Err(PackError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "staged segment ciphertext shrank while copying",
        )));
    }

    debug!(kind = %kind, ciphertext_len, "Encoded segment");

    Ok((kind.as_tag().len() + 1 + wrapped.len() + length.len() + 1) as u64 + ciphertext_len)
}

/// A decoded segment: kind, wrapped key and ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub wrapped_key: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl Segment {
    /// Read the body that follows a `<kind>;` tag.
    pub fn read_body<R: BufRead>(kind: SegmentKind, reader: &mut R, wrapped_key_len: usize) -> PackResult<Self> {
        let mut wrapped_key = vec![0u8; wrapped_key_len];
        reader.read_exact(&mut wrapped_key).map_err(|e| truncated(kind, "wrapped key", e))?;

        let mut digits = Vec::new();
        reader
            .read_until(FIELD_SEPARATOR, &mut digits)
            .map_err(|e| truncated(kind, "length", e))?;
        if digits.pop() != Some(FIELD_SEPARATOR) {
            return Err(PackError::Format(format!("{} segment length is unterminated", kind)));
        }
        let len: u64 = std::str::from_utf8(&digits)
            .ok()
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                PackError::Format(format!(
                    "{} segment length is not a decimal number: {:?}",
                    kind,
                    String::from_utf8_lossy(&digits)
                ))
            })?;

        let mut ciphertext = Vec::new();
        let read = reader.by_ref().take(len).read_to_end(&mut ciphertext)?;
        if read as u64 != len {
            return Err(PackError::Format(format!(
                "{} segment declares {} ciphertext bytes but only {} remain",
                kind, len, read
            )));
        }

        Ok(Self {
            kind,
            wrapped_key,
            ciphertext,
        })
    }

    /// Ciphertext length as declared on the wire.
    pub fn ciphertext_len(&self) -> u64 {
        self.ciphertext.len() as u64
    }

    /// Unwrap the segment key and stream the plaintext into `dst`.
    pub fn decrypt_to<W: Write>(&self, private_key: &RecipientPrivateKey, dst: W) -> PackResult<u64> {
        let key = private_key.decrypt(&self.wrapped_key)?;
        let cipher = ChunkCipher::from_slice(&key)?;
        cipher.decrypt_stream(self.ciphertext.as_slice(), dst)
    }

    /// Unwrap the segment key and return the plaintext.
    pub fn open(&self, private_key: &RecipientPrivateKey) -> PackResult<Vec<u8>> {
        let mut plaintext = Vec::new();
        self.decrypt_to(private_key, &mut plaintext)?;
        Ok(plaintext)
    }
}

fn truncated(kind: SegmentKind, field: &str, e: io::Error) -> PackError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        PackError::Format(format!("{} segment truncated in {}", kind, field))
    } else {
        PackError::Io(e)
    }
}
