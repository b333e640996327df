use std::fmt;

use crate::btree_page::schema_layer::Value;
use crate::carve::CarveMode;

/// How a row was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowStatus {
  /// A live cell reachable from the page's cell pointer array.
  Regular,
  /// Carved out of a freeblock or other unexplained bytes of a page.
  DeletedInPage,
  /// Found on a page of the free list.
  FreelistEntry,
  /// Decoded from the gap between the cell pointer array and the cell content area.
  UnallocatedSpace,
}

impl RowStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      RowStatus::Regular => "regular",
      RowStatus::DeletedInPage => "deleted-in-page",
      RowStatus::FreelistEntry => "freelist-entry",
      RowStatus::UnallocatedSpace => "unallocated-space",
    }
  }
}

impl fmt::Display for RowStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Where a WAL or journal row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
  Wal {
    committed: bool,
    db_page: u32,
    frame: usize,
    salt1: u32,
    salt2: u32,
  },
  Journal {
    db_page: u32,
    index: usize,
    checksum: u32,
    nonce: u32,
  },
}

impl Provenance {
  /// Leading output columns: `committed, db_page, frame/record, salt1/checksum, salt2/nonce`.
  pub fn columns(&self) -> [String; 5] {
    match *self {
      Provenance::Wal {
        committed,
        db_page,
        frame,
        salt1,
        salt2,
      } => [
        committed.to_string(),
        db_page.to_string(),
        frame.to_string(),
        salt1.to_string(),
        salt2.to_string(),
      ],
      Provenance::Journal {
        db_page,
        index,
        checksum,
        nonce,
      } => [
        false.to_string(),
        db_page.to_string(),
        index.to_string(),
        checksum.to_string(),
        nonce.to_string(),
      ],
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredRow {
  pub table: String,
  pub status: RowStatus,
  /// Absolute offset of the record in the file it was read from.
  pub offset: u64,
  pub page_number: u32,
  pub payload_len: u64,
  pub header_len: usize,
  pub row_id: Option<i64>,
  pub values: Vec<Value>,
  pub synthesized_columns: Vec<usize>,
  /// Columns cut short by a broken overflow chain; their values are partial or NULL.
  pub truncated_columns: Vec<usize>,
  pub carve_mode: Option<CarveMode>,
  pub provenance: Option<Provenance>,
}

impl RecoveredRow {
  /// `[provenance..., offset, status, payload_len, header_len, values...]`.
  pub fn to_strings(&self) -> Vec<String> {
    let mut out = Vec::with_capacity(9 + self.values.len());
    if let Some(provenance) = &self.provenance {
      out.extend(provenance.columns());
    }
    out.push(self.offset.to_string());
    out.push(self.status.to_string());
    out.push(self.payload_len.to_string());
    out.push(self.header_len.to_string());
    out.extend(self.values.iter().map(Value::to_string));
    out
  }

  /// Two rows with the same key are the same evidence found twice. Cells that carry a
  /// rowid are told apart by it, so equal values under different rowids stay separate rows.
  pub fn content_key(&self) -> Vec<String> {
    let mut key = Vec::with_capacity(6 + self.values.len());
    if let Some(provenance) = &self.provenance {
      key.extend(provenance.columns());
    }
    key.push(self.row_id.map_or_else(String::new, |row_id| format!("rowid:{row_id}")));
    key.extend(self.values.iter().map(Value::to_string));
    key
  }
}
