use crate::bencode::{decode, dict_value_span, encode, Value};
use crate::error::{LeechError, Result};
use crate::piece::{PieceDescriptor, BLOCK_SIZE};
use sha1::{Digest, Sha1};
use std::path::PathBuf;

/// A file in a multi-file torrent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path components below the torrent's directory
    pub path: Vec<String>,
    pub length: u64,
}

/// How the torrent's bytes map onto files on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLayout {
    Single { name: String, length: u64 },
    Multi { name: String, files: Vec<FileEntry> },
}

impl FileLayout {
    pub fn name(&self) -> &str {
        match self {
            FileLayout::Single { name, .. } | FileLayout::Multi { name, .. } => name,
        }
    }

    pub fn total_length(&self) -> u64 {
        match self {
            FileLayout::Single { length, .. } => *length,
            FileLayout::Multi { files, .. } => files.iter().map(|f| f.length).sum(),
        }
    }

    /// Every file in torrent order, as a path relative to the download
    /// directory and its length. Multi-file torrents live under a directory
    /// named after the torrent.
    pub fn entries(&self) -> Vec<(PathBuf, u64)> {
        match self {
            FileLayout::Single { name, length } => vec![(PathBuf::from(name), *length)],
            FileLayout::Multi { name, files } => files
                .iter()
                .map(|file| {
                    let mut path = PathBuf::from(name);
                    path.extend(&file.path);
                    (path, file.length)
                })
                .collect(),
        }
    }
}

/// Top-level metainfo structure from a .torrent file
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// URL of the tracker
    pub announce: String,
    /// Tiers of additional tracker URLs, empty when absent
    pub announce_list: Vec<Vec<String>>,
    /// SHA1 hash of the bencoded info dictionary
    pub info_hash: [u8; 20],
    pub name: String,
    pub piece_length: u32,
    pub layout: FileLayout,
    pub pieces: Vec<PieceDescriptor>,
}

impl Metainfo {
    /// Parse a .torrent file. The info hash covers the `info` dictionary's
    /// bytes exactly as they appear in `data`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let value = decode(data)?;
        let raw_info = dict_value_span(data, b"info")?;
        Self::parse(&value, raw_info)
    }

    /// Parse an already decoded torrent. The info hash covers the canonical
    /// encoding of the `info` dictionary.
    pub fn from_bencode(value: &Value) -> Result<Self> {
        Self::parse(value, None)
    }

    fn parse(value: &Value, raw_info: Option<&[u8]>) -> Result<Self> {
        if value.as_dict().is_none() {
            return Err(invalid("torrent must be a dict"));
        }

        // Parse announce-list (optional)
        let announce_list: Vec<Vec<String>> = value
            .get("announce-list")
            .and_then(Value::as_list)
            .map(|tiers| {
                tiers
                    .iter()
                    .filter_map(Value::as_list)
                    .map(|urls| {
                        urls.iter()
                            .filter_map(Value::as_str)
                            .map(String::from)
                            .collect::<Vec<_>>()
                    })
                    .filter(|tier| !tier.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        // Parse announce, falling back to the first listed tracker
        let announce = value
            .get_str("announce")
            .map(String::from)
            .or_else(|| announce_list.first().and_then(|tier| tier.first()).cloned())
            .ok_or_else(|| invalid("missing 'announce' field"))?;

        let info = value
            .get("info")
            .filter(|info| info.as_dict().is_some())
            .ok_or_else(|| invalid("missing 'info' dict"))?;

        let mut info_hash = [0u8; 20];
        match raw_info {
            Some(raw) => info_hash.copy_from_slice(&Sha1::digest(raw)),
            None => info_hash.copy_from_slice(&Sha1::digest(encode(info))),
        }

        // Parse name
        let name = info
            .get_str("name")
            .ok_or_else(|| invalid("missing 'name' field"))?
            .to_string();
        validate_component(&name)?;

        // Parse piece length
        let piece_length = info
            .get_int("piece length")
            .ok_or_else(|| invalid("missing 'piece length' field"))?;
        let piece_length = u32::try_from(piece_length)
            .ok()
            .filter(|len| *len > 0 && len.div_ceil(BLOCK_SIZE) <= u16::MAX as u32)
            .ok_or_else(|| invalid(format!("piece length {} out of range", piece_length)))?;

        let layout = parse_layout(info, name.clone())?;

        let hashes = info
            .get_bytes("pieces")
            .ok_or_else(|| invalid("missing 'pieces' field"))?;
        let pieces = piece_descriptors(hashes, piece_length, layout.total_length())?;

        Ok(Metainfo {
            announce,
            announce_list,
            info_hash,
            name,
            piece_length,
            layout,
            pieces,
        })
    }

    pub fn total_length(&self) -> u64 {
        self.layout.total_length()
    }

    /// Get the info hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Tracker URLs to try, primary announce first, without duplicates.
    pub fn trackers(&self) -> Vec<String> {
        let mut urls = vec![self.announce.clone()];
        for url in self.announce_list.iter().flatten() {
            if !urls.contains(url) {
                urls.push(url.clone());
            }
        }
        urls
    }
}

fn invalid(msg: impl Into<String>) -> LeechError {
    LeechError::InvalidTorrent(msg.into())
}

fn parse_length(value: Option<i64>, what: &str) -> Result<u64> {
    let length = value.ok_or_else(|| invalid(format!("missing {} 'length'", what)))?;
    u64::try_from(length).map_err(|_| invalid(format!("negative {} length {}", what, length)))
}

fn parse_layout(info: &Value, name: String) -> Result<FileLayout> {
    if info.get("length").is_some() {
        // Single-file mode
        let length = parse_length(info.get_int("length"), "file")?;
        return Ok(FileLayout::Single { name, length });
    }

    // Multi-file mode
    let list = info
        .get("files")
        .and_then(Value::as_list)
        .ok_or_else(|| invalid("missing 'length' or 'files' field"))?;

    if list.is_empty() {
        return Err(invalid("'files' is empty"));
    }

    let mut files = Vec::with_capacity(list.len());
    for entry in list {
        let length = parse_length(entry.get_int("length"), "file entry")?;

        let components = entry
            .get("path")
            .and_then(Value::as_list)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| invalid("missing file 'path'"))?;

        let path = components
            .iter()
            .map(|component| -> Result<String> {
                let component = component
                    .as_str()
                    .ok_or_else(|| invalid("path component is not UTF-8"))?;
                validate_component(component)?;
                Ok(component.to_string())
            })
            .collect::<Result<Vec<_>>>()?;

        files.push(FileEntry { path, length });
    }

    Ok(FileLayout::Multi { name, files })
}

/// A path component must name exactly one entry inside its parent.
fn validate_component(component: &str) -> Result<()> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains(['/', '\\'])
    {
        return Err(invalid(format!("unsafe path component {:?}", component)));
    }
    Ok(())
}

fn piece_descriptors(hashes: &[u8], piece_length: u32, total_length: u64) -> Result<Vec<PieceDescriptor>> {
    if hashes.len() % 20 != 0 {
        return Err(invalid("pieces length must be a multiple of 20"));
    }
    if total_length == 0 {
        return Err(invalid("torrent has no content"));
    }

    let expected = total_length.div_ceil(piece_length as u64);
    let count = (hashes.len() / 20) as u64;
    if count != expected {
        return Err(invalid(format!(
            "{} piece hashes for {} bytes at piece length {} (expected {})",
            count, total_length, piece_length, expected
        )));
    }

    hashes
        .chunks_exact(20)
        .enumerate()
        .map(|(index, chunk)| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);

            let start = index as u64 * piece_length as u64;
            let length = (total_length - start).min(piece_length as u64) as u32;
            PieceDescriptor::new(index as u32, hash, length)
                .ok_or_else(|| invalid(format!("piece {} has unusable length {}", index, length)))
        })
        .collect()
}
