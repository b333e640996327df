use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures that abort a whole recovery run.
#[derive(Error, Debug)]
pub enum Error {
  #[error("failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("not a SQLite database: missing \"SQLite format 3\" magic")]
  NotSqlite,
  #[error("file is {len} bytes, too short for a database header")]
  Truncated { len: u64 },
  #[error("database header declares an impossible page size ({0})")]
  InvalidPageSize(u32),
  #[error("invalid WAL header magic {0:#010x}")]
  BadWalMagic(u32),
  #[error("invalid rollback journal header")]
  BadJournalMagic,
}

impl Error {
  pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    Error::Io {
      path: path.into(),
      source,
    }
  }
}

/// Failures that abandon a single record. They never escape the page being decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
  #[error("truncated varint at offset {0}")]
  TruncatedVarint(usize),
  #[error("record header length {0} is shorter than its own length varint")]
  HeaderTooShort(u64),
  #[error("record header length {header_len} exceeds the {available} available bytes")]
  HeaderTooLong { header_len: u64, available: usize },
  #[error("column {column} needs {needed} bytes but only {available} remain")]
  ColumnOverrun {
    column: usize,
    needed: usize,
    available: usize,
  },
  #[error("cell offset {0} lies outside the page")]
  BadCellOffset(usize),
  #[error("reserved serial type {0}")]
  ReservedSerialType(u64),
  #[error("payload length {0} is implausible")]
  BadPayloadLength(u64),
}
