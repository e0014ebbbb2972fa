//! Snapshot files for the mirror store.
//!
//! Layout:
//!
//! ```text
//! magic "CNP\0" | version (u8) | body length (u64 LE) | body | crc32 of body (u32 LE)
//! ```
//!
//! The body is a MessagePack list of `(absolute path, JSON bytes)` pairs, one
//! per stored value.

use crate::error::{CanopyError, Result};
use crate::location::Location;
use crate::tree::Branch;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Magic bytes for snapshot files.
const SNAPSHOT_MAGIC: &[u8; 4] = b"CNP\0";

/// Current snapshot format version.
const SNAPSHOT_VERSION: u8 = 1;

/// Magic, version and body length.
const HEADER_LEN: u64 = 4 + 1 + 8;

/// CRC32 of the body.
const TRAILER_LEN: u64 = 4;

type Entry = (String, Vec<u8>);

/// Write every value stored under `tree` to `path`, replacing the file.
pub fn write_tree(path: &Path, tree: &Branch) -> Result<()> {
    let entries = tree
        .leaves()
        .into_iter()
        .filter_map(|leaf| Some((leaf.location().path(), leaf.payload()?)))
        .map(|(path, payload)| Ok((path, serde_json::to_vec(payload)?)))
        .collect::<Result<Vec<Entry>>>()?;
    let body = rmp_serde::to_vec(&entries)?;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(SNAPSHOT_MAGIC)?;
    writer.write_all(&[SNAPSHOT_VERSION])?;
    writer.write_all(&(body.len() as u64).to_le_bytes())?;
    writer.write_all(&body)?;
    writer.write_all(&crc32fast::hash(&body).to_le_bytes())?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    tracing::debug!(path = %path.display(), values = entries.len(), "wrote snapshot");
    Ok(())
}

/// Rebuild a tree from a file written by [`write_tree`].
pub fn read_tree(path: &Path) -> Result<Branch> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != SNAPSHOT_MAGIC {
        return Err(CanopyError::InvalidFormat("Invalid snapshot magic".into()));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != SNAPSHOT_VERSION {
        return Err(CanopyError::InvalidFormat(format!(
            "Unsupported snapshot version: {}",
            version[0]
        )));
    }

    let mut len_bytes = [0u8; 8];
    reader.read_exact(&mut len_bytes)?;
    let len = u64::from_le_bytes(len_bytes);
    let available = file_len.saturating_sub(HEADER_LEN + TRAILER_LEN);
    if len > available {
        return Err(CanopyError::Corruption(format!(
            "snapshot body length {len} exceeds the {available} bytes in the file"
        )));
    }
    let len = usize::try_from(len)
        .map_err(|_| CanopyError::Corruption("snapshot body too large".into()))?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = crc32fast::hash(&body);
    if stored != computed {
        return Err(CanopyError::Corruption(format!(
            "checksum mismatch: expected {stored:#010x}, got {computed:#010x}"
        )));
    }

    let entries: Vec<Entry> = rmp_serde::from_slice(&body)?;
    let mut tree = Branch::new(Location::root());
    for (path, bytes) in entries {
        let payload = serde_json::from_slice(&bytes)
            .map_err(|e| CanopyError::Deserialization(e.to_string()))?;
        tree.insert(&Location::parse(&path), Some(payload))
            .map_err(|e| CanopyError::Corruption(format!("{path}: {e}")))?;
    }

    tracing::debug!(path = %path.display(), values = tree.leaves().len(), "read snapshot");
    Ok(tree)
}
