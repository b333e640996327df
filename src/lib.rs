use std::path::Path;

use tracing::debug;

use crate::btree_page::cell::Cell;
use crate::btree_page::overflow::OverflowChain;
use crate::btree_page::page::Page;
use crate::btree_page::schema_layer::Record;
use crate::btree_page::BTree;
use crate::dbheader::{DbHeader, TextEncoding, HEADER_SIZE};
use crate::store::{ByteStore, DEFAULT_SEGMENT_SIZE};

pub mod btree_page;
pub mod carve;
pub mod config;
pub mod dbheader;
pub mod error;
pub mod journal;
pub mod parser;
pub mod recovery;
pub mod schema;
pub mod store;
pub mod varint;
pub mod wal;

#[cfg(test)]
mod fixtures;

pub use config::RecoveryConfig;
pub use error::{DecodeError, Error, Result};
pub use recovery::{job::Job, RecoveredRow, RecoveryReport, RowStatus};

/// Runs a complete recovery over the database at `path`.
pub fn start(path: impl AsRef<Path>, config: RecoveryConfig) -> Result<RecoveryReport> {
  Job::new(path.as_ref(), config).run()
}

/// A read-only view of a database file.
///
/// The number of pages comes from the file length, not the header: evidence files are often
/// truncated or carry trailing pages the header no longer counts.
pub struct SQLite {
  store: ByteStore,
  db_header: DbHeader,
  number_of_pages: u32,
}

impl SQLite {
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with_segment_size(path, DEFAULT_SEGMENT_SIZE)
  }

  pub fn open_with_segment_size(path: impl AsRef<Path>, segment_size: usize) -> Result<Self> {
    Self::from_store(ByteStore::open_with_segment_size(path, segment_size)?)
  }

  pub fn from_store(store: ByteStore) -> Result<Self> {
    if store.len() < HEADER_SIZE as u64 {
      return Err(Error::Truncated { len: store.len() });
    }
    let db_header = DbHeader::try_from(&store.read(0, HEADER_SIZE)[..])?;
    let number_of_pages = (store.len() / db_header.page_size as u64) as u32;
    if number_of_pages == 0 {
      return Err(Error::Truncated { len: store.len() });
    }
    if db_header.in_header_size_valid() && db_header.database_size != number_of_pages {
      debug!(
        header = db_header.database_size,
        file = number_of_pages,
        "page count in header differs from file length"
      );
    }
    Ok(SQLite {
      store,
      db_header,
      number_of_pages,
    })
  }

  pub fn header(&self) -> &DbHeader {
    &self.db_header
  }

  pub fn store(&self) -> &ByteStore {
    &self.store
  }

  pub fn page_size(&self) -> usize {
    self.db_header.page_size as usize
  }

  pub fn usable_size(&self) -> usize {
    self.db_header.usable_size() as usize
  }

  pub fn number_of_pages(&self) -> u32 {
    self.number_of_pages
  }

  pub fn text_encoding(&self) -> TextEncoding {
    self.db_header.text_encoding()
  }

  /// Pages are numbered from 1; `None` for page 0 and for pages past the end of the file.
  pub fn load_page(&self, page_num: u32) -> Option<Page> {
    if page_num == 0 || page_num > self.number_of_pages {
      return None;
    }
    let offset = (page_num as u64 - 1) * self.page_size() as u64;
    let data = self.store.try_slice(offset, self.page_size())?;
    Some(Page::new(data, page_num, offset))
  }

  pub fn btree_from_page(&self, page_num: u32) -> Option<BTree> {
    BTree::new(self.load_page(page_num)?, self.usable_size())
  }

  /// The local payload of `cell` followed by as much of its overflow chain as can be read.
  pub fn get_full_payload(&self, cell: &Cell) -> Vec<u8> {
    let mut full_payload = cell.payload().to_vec();
    if let Some(first_page) = cell.overflow_page() {
      let needed = (cell.payload_size() as usize).saturating_sub(full_payload.len());
      let chain = OverflowChain::read(self, first_page, needed);
      if !chain.complete {
        debug!(first_page, needed, read = chain.data.len(), "overflow chain cut short");
      }
      full_payload.extend(chain.data);
    }
    full_payload
  }

  pub fn record_from_cell(&self, cell: &Cell) -> std::result::Result<Record, DecodeError> {
    let max_payload = self.number_of_pages as u64 * self.usable_size() as u64;
    if cell.payload_size() > max_payload {
      return Err(DecodeError::BadPayloadLength(cell.payload_size()));
    }
    Record::parse(&self.get_full_payload(cell), self.text_encoding())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::btree_page::schema_layer::Value;
  use crate::btree_page::PageType;
  use crate::fixtures;

  #[test]
  fn page_count_follows_file_length() {
    let mut image = fixtures::empty_db(3);
    image.extend(vec![0u8; 100]);
    let db = fixtures::open(image);
    assert_eq!(db.number_of_pages(), 3);
    assert!(db.load_page(3).is_some());
    assert!(db.load_page(4).is_none());
    assert!(db.load_page(0).is_none());
    assert_eq!(db.load_page(2).map(|p| p.offset), Some(fixtures::PAGE_SIZE as u64));
  }

  #[test]
  fn rejects_non_database() {
    let store = ByteStore::from_bytes(vec![0u8; 4096], DEFAULT_SEGMENT_SIZE);
    assert!(matches!(SQLite::from_store(store), Err(Error::NotSqlite)));
    let store = ByteStore::from_bytes(vec![0u8; 10], DEFAULT_SEGMENT_SIZE);
    assert!(matches!(
      SQLite::from_store(store),
      Err(Error::Truncated { len: 10 })
    ));
  }

  #[test]
  fn decodes_record_spilling_into_overflow() {
    let text = "x".repeat(1500);
    let record = fixtures::encode_record(&[Value::Integer(7), Value::Text(text.clone())]);
    let local = btree_page::cell::local_payload_size(
      PageType::TableLeaf,
      record.len() as u64,
      fixtures::PAGE_SIZE,
    );
    let mut cell = fixtures::table_cell(1, &record[..local]);
    // table_cell wrote the local length; patch in the full payload length
    let mut patched = varint::VarInt::encode(record.len() as u64);
    patched.extend_from_slice(&cell[varint::VarInt::decode(&cell).map_or(0, |v| v.size)..]);
    cell = patched;
    cell.extend_from_slice(&3u32.to_be_bytes());

    let mut image = fixtures::empty_db(3);
    fixtures::put_page(&mut image, 2, &fixtures::leaf_page(2, &[cell]));
    let mut overflow = vec![0u8; fixtures::PAGE_SIZE];
    let rest = &record[local..];
    overflow[4..4 + rest.len()].copy_from_slice(rest);
    fixtures::put_page(&mut image, 3, &overflow);
    let db = fixtures::open(image);

    let btree = db.btree_from_page(2).expect("leaf page");
    let parsed = &btree.cells[0];
    assert_eq!(parsed.cell.overflow_page(), Some(3));
    let decoded = db.record_from_cell(&parsed.cell).expect("record decodes");
    assert_eq!(decoded.values, vec![Value::Integer(7), Value::Text(text)]);
  }
}
