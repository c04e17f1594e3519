//! Reader for IDL SAVE files (`.sav`).
//!
//! Supports plain and per-record compressed files, all scalar and array
//! types, structures (returned as arrays of structure instances) and heap
//! pointers, which are dereferenced in place.

mod reader;
pub mod value;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub use reader::parse;
pub use value::{Array, Structure, Value};

/// Variables read from a SAVE file, keyed by lowercase name.
pub type Results = BTreeMap<String, Value>;

#[derive(Debug, Error)]
pub enum SaveFileError {
    #[error("Failed to read save file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not an IDL save file (missing SR signature)")]
    BadSignature,

    #[error("Unsupported save file format bytes {0:02x?}")]
    UnsupportedFormat([u8; 2]),

    #[error("Save file ended unexpectedly at byte {offset}")]
    UnexpectedEof { offset: usize },

    #[error("Malformed save file: {0}")]
    Malformed(String),

    #[error("Unsupported IDL type code {0}")]
    UnsupportedType(i32),

    #[error("Failed to decompress record at byte {offset}: {source}")]
    Decompress {
        offset: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Read and decode the SAVE file at `path`.
pub fn read(path: &Path) -> Result<Results, SaveFileError> {
    let data = fs::read(path).map_err(|source| SaveFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("reading {} ({} bytes)", path.display(), data.len());
    parse(&data)
}
