//! On-disk encodings for record stores.
//!
//! A store writes exactly one configured output format, but discovers its
//! input format by trial parsing: candidates are attempted most
//! structurally restrictive first, and the first deserializer that
//! completes wins. The binary encoding is framed the same way on every
//! store:
//!
//! ```text
//! [magic: 4 bytes][version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```

use std::collections::HashMap;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};

use crc32fast::Hasher;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Magic bytes identifying the framed binary encoding.
pub const MAGIC: [u8; 4] = *b"ALDB";

/// Current binary codec version.
const CODEC_VERSION: u8 = 1;

/// Sanity limit on the binary payload length field (100 MB).
const MAX_PAYLOAD_SIZE: usize = 100 * 1024 * 1024;

/// Column delimiter for the row-oriented encoding.
const ROW_DELIMITER: char = '\t';

/// Serialization formats understood by a [`RecordStore`](super::RecordStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Framed JSON with magic bytes and a CRC32 trailer.
    Binary,
    /// Compact JSON object, one document for the whole mapping.
    #[default]
    Json,
    /// Human-editable nested-map encoding; the metadata store's format.
    Toml,
    /// Line-delimited `key<TAB>json-value` rows.
    Rows,
}

impl Format {
    /// Input-detection priority, most structurally restrictive first.
    ///
    /// `Rows` accepts almost any tab-delimited text, so it must stay
    /// last; the parsers ahead of it each reject foreign input outright
    /// (magic bytes, JSON grammar, TOML grammar).
    pub const DETECTION_ORDER: [Self; 4] = [Self::Binary, Self::Json, Self::Toml, Self::Rows];
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary => write!(f, "binary"),
            Self::Json => write!(f, "json"),
            Self::Toml => write!(f, "toml"),
            Self::Rows => write!(f, "rows"),
        }
    }
}

/// Serializes the whole mapping in the given format.
pub(crate) fn encode<V: Serialize>(format: Format, map: &HashMap<String, V>) -> IoResult<Vec<u8>> {
    match format {
        Format::Binary => encode_binary(map),
        Format::Json => serde_json::to_vec(map).map_err(invalid_data),
        Format::Toml => {
            let text = toml::to_string_pretty(map).map_err(invalid_data)?;
            Ok(text.into_bytes())
        }
        Format::Rows => encode_rows(map),
    }
}

/// Deserializes a whole mapping from bytes in the given format.
pub(crate) fn decode<V: DeserializeOwned>(
    format: Format,
    bytes: &[u8],
) -> IoResult<HashMap<String, V>> {
    match format {
        Format::Binary => decode_binary(bytes),
        Format::Json => serde_json::from_slice(bytes).map_err(invalid_data),
        Format::Toml => {
            let text = utf8(bytes)?;
            toml::from_str(text).map_err(invalid_data)
        }
        Format::Rows => decode_rows(bytes),
    }
}

fn encode_binary<V: Serialize>(map: &HashMap<String, V>) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(map).map_err(invalid_data)?;

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    let len = u32::try_from(data.len())
        .map_err(|_| IoError::new(ErrorKind::InvalidData, "payload exceeds u32 length"))?;

    let mut out = Vec::with_capacity(MAGIC.len() + 1 + 4 + data.len() + 4);
    out.extend_from_slice(&MAGIC);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc.to_le_bytes());

    Ok(out)
}

fn decode_binary<V: DeserializeOwned>(bytes: &[u8]) -> IoResult<HashMap<String, V>> {
    let header_len = MAGIC.len() + 1 + 4;
    if bytes.len() < header_len + 4 {
        return Err(IoError::new(ErrorKind::UnexpectedEof, "truncated binary frame"));
    }

    if bytes[..MAGIC.len()] != MAGIC {
        return Err(IoError::new(ErrorKind::InvalidData, "missing magic bytes"));
    }

    let version = bytes[MAGIC.len()];
    if version != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported codec version: {version} (expected {CODEC_VERSION})"),
        ));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[MAGIC.len() + 1..header_len]);
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_PAYLOAD_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("payload size {len} exceeds maximum {MAX_PAYLOAD_SIZE}"),
        ));
    }
    if bytes.len() != header_len + len + 4 {
        return Err(IoError::new(ErrorKind::InvalidData, "frame length mismatch"));
    }

    let data = &bytes[header_len..header_len + len];

    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&bytes[header_len + len..]);
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(data);
    let computed_crc = hasher.finalize();

    if stored_crc != computed_crc {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x} (data corrupted)"),
        ));
    }

    serde_json::from_slice(data).map_err(invalid_data)
}

fn encode_rows<V: Serialize>(map: &HashMap<String, V>) -> IoResult<Vec<u8>> {
    let mut out = String::new();
    for (key, value) in map {
        if key.contains(ROW_DELIMITER) || key.contains('\n') {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!("key {key:?} cannot be represented in the rows format"),
            ));
        }
        let value = serde_json::to_string(value).map_err(invalid_data)?;
        out.push_str(key);
        out.push(ROW_DELIMITER);
        out.push_str(&value);
        out.push('\n');
    }
    Ok(out.into_bytes())
}

/// Row parsing is deliberately strict: every non-blank line must carry the
/// delimiter and a non-empty key, so text meant for another format cannot
/// be silently accepted here.
fn decode_rows<V: DeserializeOwned>(bytes: &[u8]) -> IoResult<HashMap<String, V>> {
    let text = utf8(bytes)?;
    let mut map = HashMap::new();
    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (key, value) = line.split_once(ROW_DELIMITER).ok_or_else(|| {
            IoError::new(
                ErrorKind::InvalidData,
                format!("line {}: missing column delimiter", number + 1),
            )
        })?;
        if key.is_empty() {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!("line {}: empty key", number + 1),
            ));
        }
        let value = serde_json::from_str(value).map_err(invalid_data)?;
        map.insert(key.to_owned(), value);
    }
    Ok(map)
}

fn utf8(bytes: &[u8]) -> IoResult<&str> {
    std::str::from_utf8(bytes).map_err(|e| IoError::new(ErrorKind::InvalidData, e))
}

fn invalid_data(err: impl std::error::Error + Send + Sync + 'static) -> IoError {
    IoError::new(ErrorKind::InvalidData, err)
}
