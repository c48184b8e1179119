//! tar+gzip wrapping of a finished container

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{PackError, PackResult};

/// Name of the single tar entry holding the container.
pub const ENTRY_NAME: &str = "app.pack";

/// Gzip (level 9) a tar archive holding `container` as its only entry.
pub fn compress(container: &[u8]) -> PackResult<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::best());
    let mut tar = tar::Builder::new(encoder);

    let mut header = tar::Header::new_gnu();
    header.set_size(container.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    tar.append_data(&mut header, ENTRY_NAME, container)?;

    let mut encoder = tar.into_inner()?;
    encoder.flush()?;
    Ok(encoder.finish()?)
}

/// Extract the container from bytes produced by [`compress`].
pub fn decompress(compressed: &[u8]) -> PackResult<Vec<u8>> {
    let mut archive = tar::Archive::new(GzDecoder::new(compressed));
    let mut entries = archive.entries()?;
    let mut entry = entries
        .next()
        .ok_or_else(|| PackError::Format("Archive holds no container".into()))??;

    let mut container = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut container)?;
    Ok(container)
}
