//! Rollback journal reader.
//!
//! The journal holds pre-images of pages a transaction was about to change. The header
//! fills the first sector; each record is a 4-byte page number, the page image and a
//! 4-byte checksum.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::btree_page::page::Page;
use crate::error::{Error, Result};
use crate::store::ByteStore;

pub const JOURNAL_MAGIC: [u8; 8] = [0xd9, 0xd5, 0x05, 0xf9, 0x20, 0xa1, 0x63, 0xd7];
pub const DEFAULT_SECTOR_SIZE: usize = 512;
const HEADER_LEN: usize = 28;

/// `nonce + data[i]` for `i = page_size - 200`, stepping down by 200 while positive.
pub fn journal_checksum(nonce: u32, data: &[u8]) -> u32 {
  let mut sum = nonce;
  let mut i = data.len() as isize - 200;
  while i > 0 {
    sum = sum.wrapping_add(data[i as usize] as u32);
    i -= 200;
  }
  sum
}

/// +------+----+---------------------------------------------------+
/// |Offset|Size|Description                                        |
/// +------+----+---------------------------------------------------|
/// |0     |8   |Magic d9 d5 05 f9 20 a1 63 d7                      |
/// |8     |4   |Number of page records, or -1 to read to the end   |
/// |12    |4   |Nonce for the record checksums                     |
/// |16    |4   |Database size in pages before the transaction      |
/// |20    |4   |Sector size                                        |
/// |24    |4   |Page size                                          |
/// +------+----+---------------------------------------------------+
///
/// A committed journal is often left with a zeroed header; `valid` is false then and the
/// defaults are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalHeader {
  pub valid: bool,
  pub record_count: u32,
  pub nonce: u32,
  pub initial_size: u32,
  pub sector_size: u32,
  pub page_size: u32,
}

/// One page record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalPage {
  /// 1-based position in the journal.
  pub index: usize,
  /// Offset of the record's page number field.
  pub offset: u64,
  pub db_page: u32,
  pub checksum: u32,
  pub checksum_valid: bool,
}

pub struct JournalReader {
  store: ByteStore,
  header: JournalHeader,
  page_size: usize,
  records: Vec<JournalPage>,
}

fn valid_size(size: u32) -> Option<usize> {
  (size.is_power_of_two() && (512..=65536).contains(&size)).then_some(size as usize)
}

impl JournalReader {
  pub fn open(path: impl AsRef<Path>, db_page_size: usize) -> Result<Self> {
    Self::from_store(ByteStore::open(path)?, db_page_size)
  }

  pub fn from_store(store: ByteStore, db_page_size: usize) -> Result<Self> {
    if !store.contains(0, HEADER_LEN) {
      return Err(Error::BadJournalMagic);
    }
    let magic = store.read(0, JOURNAL_MAGIC.len());
    let valid = magic == JOURNAL_MAGIC;
    if !valid && magic.iter().any(|&b| b != 0) {
      return Err(Error::BadJournalMagic);
    }

    let mut cursor = store.cursor();
    cursor.skip(JOURNAL_MAGIC.len());
    let header = JournalHeader {
      valid,
      record_count: cursor.get_u32_be(),
      nonce: cursor.get_u32_be(),
      initial_size: cursor.get_u32_be(),
      sector_size: cursor.get_u32_be(),
      page_size: cursor.get_u32_be(),
    };
    if !valid {
      warn!("journal header zeroed, assuming defaults");
    }

    let sector_size = valid_size(header.sector_size)
      .filter(|_| valid)
      .unwrap_or(DEFAULT_SECTOR_SIZE);
    let page_size = valid_size(header.page_size)
      .filter(|_| valid)
      .unwrap_or(db_page_size);

    let records = Self::read_records(&store, &header, sector_size, page_size);
    info!(records = records.len(), page_size, sector_size, "journal parsed");
    Ok(Self {
      store,
      header,
      page_size,
      records,
    })
  }

  fn read_records(
    store: &ByteStore,
    header: &JournalHeader,
    sector_size: usize,
    page_size: usize,
  ) -> Vec<JournalPage> {
    let mut records = Vec::new();
    if store.len() < sector_size as u64 {
      return records;
    }
    let mut cursor = store.cursor();
    cursor.set_position(sector_size as u64);
    let mut index = 0;

    while cursor.has_remaining(page_size + 8) {
      let offset = cursor.position();
      let db_page = cursor.get_u32_be();
      let page = cursor.get_bytes(page_size);
      let checksum = cursor.get_u32_be();
      index += 1;

      if db_page == 0 {
        debug!(record = index, offset, "skipping record without a page number");
        continue;
      }
      records.push(JournalPage {
        index,
        offset,
        db_page,
        checksum,
        checksum_valid: journal_checksum(header.nonce, &page) == checksum,
      });
    }
    records
  }

  pub fn header(&self) -> &JournalHeader {
    &self.header
  }

  pub fn page_size(&self) -> usize {
    self.page_size
  }

  pub fn records(&self) -> &[JournalPage] {
    &self.records
  }

  pub fn page(&self, record: &JournalPage) -> Option<Page> {
    let offset = record.offset + 4;
    let data = self.store.try_slice(offset, self.page_size)?;
    Some(Page::new(data, record.db_page, offset))
  }
}
