//! Root filesystem tarballs: checksum verification and unpacking.

use crate::RuntimeError;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;
use xz2::read::XzDecoder;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Xz,
}

impl Compression {
    /// Sniff the compression from the first bytes of a file.
    pub fn detect(head: &[u8]) -> Self {
        if head.starts_with(XZ_MAGIC) {
            Compression::Xz
        } else if head.starts_with(GZIP_MAGIC) {
            Compression::Gzip
        } else {
            Compression::None
        }
    }
}

/// Lowercase hex SHA-256 of the file at `path`.
pub fn sha256_file(path: &Path) -> Result<String, RuntimeError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Check `path` against `expected`. Accepts the `sha256sum` output format,
/// where the digest is followed by a file name.
pub fn verify_sha256(path: &Path, expected: &str) -> Result<(), RuntimeError> {
    let expected = expected
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let actual = sha256_file(path)?;
    if actual != expected {
        return Err(RuntimeError::Archive(format!(
            "checksum mismatch for {}: expected {expected}, got {actual}",
            path.display()
        )));
    }
    debug!("checksum of {} verified", path.display());
    Ok(())
}

/// Unpack a plain, gzip or xz compressed tarball into `target`.
pub fn unpack_tarball(archive: &Path, target: &Path) -> Result<(), RuntimeError> {
    let mut file = File::open(archive)?;
    let mut head = Vec::with_capacity(XZ_MAGIC.len());
    file.by_ref().take(XZ_MAGIC.len() as u64).read_to_end(&mut head)?;
    file.seek(SeekFrom::Start(0))?;

    let compression = Compression::detect(&head);
    debug!("unpacking {} ({compression:?})", archive.display());
    let reader = BufReader::new(file);
    let result = match compression {
        Compression::None => unpack(reader, target),
        Compression::Gzip => unpack(GzDecoder::new(reader), target),
        Compression::Xz => unpack(XzDecoder::new(reader), target),
    };
    result.map_err(|e| {
        RuntimeError::Archive(format!(
            "failed to unpack {} into {}: {e}",
            archive.display(),
            target.display()
        ))
    })
}

fn unpack<R: Read>(reader: R, target: &Path) -> io::Result<()> {
    fs::create_dir_all(target)?;
    let mut ar = tar::Archive::new(reader);
    ar.set_preserve_permissions(true);
    ar.set_preserve_mtime(true);
    ar.set_unpack_xattrs(false);
    ar.unpack(target)
}
