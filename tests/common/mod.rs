//! Hand-built database, WAL and journal images.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use sqlite_carve::btree_page::schema_layer::Value;
use sqlite_carve::journal::JOURNAL_MAGIC;
use sqlite_carve::varint::VarInt;
use sqlite_carve::wal::{wal_checksum, WalChecksum, WAL_MAGIC_BE};

pub const HEADER_SIZE: usize = 100;

pub fn record(values: &[Value]) -> Vec<u8> {
  let mut serials = Vec::new();
  let mut body = Vec::new();
  for value in values {
    let code = match value {
      Value::Null => 0,
      Value::Integer(0) => 8,
      Value::Integer(1) => 9,
      Value::Integer(i) => {
        let (code, width) = match *i {
          i if i8::try_from(i).is_ok() => (1, 1),
          i if i16::try_from(i).is_ok() => (2, 2),
          i if i32::try_from(i).is_ok() => (4, 4),
          _ => (6, 8),
        };
        body.extend_from_slice(&i.to_be_bytes()[8 - width..]);
        code
      }
      Value::Float(f) => {
        body.extend_from_slice(&f.to_be_bytes());
        7
      }
      Value::Text(s) => {
        body.extend_from_slice(s.as_bytes());
        13 + 2 * s.len() as u64
      }
      Value::Blob(b) => {
        body.extend_from_slice(b);
        12 + 2 * b.len() as u64
      }
    };
    serials.extend(VarInt::encode(code));
  }
  let mut out = VarInt::encode(serials.len() as u64 + 1);
  out.extend(serials);
  out.extend(body);
  out
}

pub fn table_cell(row_id: i64, record: &[u8]) -> Vec<u8> {
  let mut cell = VarInt::encode(record.len() as u64);
  cell.extend(VarInt::encode(row_id as u64));
  cell.extend_from_slice(record);
  cell
}

pub fn schema_cell(row_id: i64, name: &str, root_page: i64, sql: &str) -> Vec<u8> {
  table_cell(row_id, &schema_record(name, root_page, sql))
}

pub fn schema_record(name: &str, root_page: i64, sql: &str) -> Vec<u8> {
  record(&[
    Value::Text("table".into()),
    Value::Text(name.into()),
    Value::Text(name.into()),
    Value::Integer(root_page),
    Value::Text(sql.into()),
  ])
}

/// A table leaf holding `cells` packed against the end of the page.
pub fn leaf_page(page_size: usize, page_number: u32, cells: &[Vec<u8>]) -> Vec<u8> {
  let mut page = vec![0u8; page_size];
  let header = if page_number == 1 { HEADER_SIZE } else { 0 };
  let mut content = page_size;
  page[header] = 0x0D;
  page[header + 3..header + 5].copy_from_slice(&(cells.len() as u16).to_be_bytes());
  for (i, cell) in cells.iter().enumerate() {
    content -= cell.len();
    page[content..content + cell.len()].copy_from_slice(cell);
    let slot = header + 8 + i * 2;
    page[slot..slot + 2].copy_from_slice(&(content as u16).to_be_bytes());
  }
  set_content_start(&mut page, page_number, content);
  page
}

pub fn set_content_start(page: &mut [u8], page_number: u32, content: usize) {
  let header = if page_number == 1 { HEADER_SIZE } else { 0 };
  page[header + 5..header + 7].copy_from_slice(&(content as u16).to_be_bytes());
}

/// Builds a database image page by page. Page 1 starts as an empty schema leaf.
pub struct DbBuilder {
  page_size: usize,
  pages: Vec<Vec<u8>>,
  freelist: (u32, u32),
}

impl DbBuilder {
  pub fn new(page_size: usize, pages: u32) -> Self {
    let mut builder = Self {
      page_size,
      pages: vec![vec![0u8; page_size]; pages as usize],
      freelist: (0, 0),
    };
    builder.put(1, leaf_page(page_size, 1, &[]));
    builder
  }

  pub fn page_size(&self) -> usize {
    self.page_size
  }

  pub fn page_mut(&mut self, page_number: u32) -> &mut [u8] {
    &mut self.pages[page_number as usize - 1]
  }

  pub fn put(&mut self, page_number: u32, page: Vec<u8>) -> &mut Self {
    assert_eq!(page.len(), self.page_size);
    self.pages[page_number as usize - 1] = page;
    self
  }

  pub fn freelist(&mut self, first_trunk: u32, count: u32) -> &mut Self {
    self.freelist = (first_trunk, count);
    self
  }

  fn header(&self) -> Vec<u8> {
    let mut bytes = vec![0u8; HEADER_SIZE];
    bytes[..16].copy_from_slice(b"SQLite format 3\0");
    let encoded = if self.page_size == 65536 { 1 } else { self.page_size as u16 };
    bytes[16..18].copy_from_slice(&encoded.to_be_bytes());
    bytes[18] = 1;
    bytes[19] = 1;
    bytes[21] = 64;
    bytes[22] = 32;
    bytes[23] = 32;
    bytes[24..28].copy_from_slice(&1u32.to_be_bytes());
    bytes[28..32].copy_from_slice(&(self.pages.len() as u32).to_be_bytes());
    bytes[32..36].copy_from_slice(&self.freelist.0.to_be_bytes());
    bytes[36..40].copy_from_slice(&self.freelist.1.to_be_bytes());
    bytes[44..48].copy_from_slice(&4u32.to_be_bytes());
    bytes[56..60].copy_from_slice(&1u32.to_be_bytes());
    bytes[92..96].copy_from_slice(&1u32.to_be_bytes());
    bytes
  }

  pub fn build(&self) -> Vec<u8> {
    let mut image = self.pages.concat();
    image[..HEADER_SIZE].copy_from_slice(&self.header());
    image
  }

  pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, self.build()).expect("write database image");
    path
  }
}

pub struct WalFrameInput<'a> {
  pub db_page: u32,
  pub commit_size: u32,
  pub salt1: u32,
  pub salt2: u32,
  pub page: &'a [u8],
}

/// A big-endian-checksum WAL whose header carries `salt1`/`salt2`. Frames with the header's
/// salts continue the checksum chain; others get a zero checksum.
pub fn wal_image(
  page_size: usize,
  salt1: u32,
  salt2: u32,
  frames: &[WalFrameInput<'_>],
) -> Vec<u8> {
  let mut image = Vec::new();
  image.extend(WAL_MAGIC_BE.to_be_bytes());
  image.extend(3007000u32.to_be_bytes());
  image.extend((page_size as u32).to_be_bytes());
  image.extend(0u32.to_be_bytes());
  image.extend(salt1.to_be_bytes());
  image.extend(salt2.to_be_bytes());
  let mut running = wal_checksum(&image, WalChecksum::default(), true);
  image.extend(running.s1.to_be_bytes());
  image.extend(running.s2.to_be_bytes());

  for frame in frames {
    assert_eq!(frame.page.len(), page_size);
    let mut header = Vec::with_capacity(24);
    header.extend(frame.db_page.to_be_bytes());
    header.extend(frame.commit_size.to_be_bytes());
    header.extend(frame.salt1.to_be_bytes());
    header.extend(frame.salt2.to_be_bytes());
    let checksum = if frame.salt1 == salt1 && frame.salt2 == salt2 {
      running = wal_checksum(&header[..8], running, true);
      running = wal_checksum(frame.page, running, true);
      running
    } else {
      WalChecksum::default()
    };
    header.extend(checksum.s1.to_be_bytes());
    header.extend(checksum.s2.to_be_bytes());
    image.extend(header);
    image.extend_from_slice(frame.page);
  }
  image
}

/// A rollback journal with one record per `(db_page, page)`. A `None` nonce leaves the
/// header zeroed, the way a committed journal is left behind.
pub fn journal_image(page_size: usize, nonce: Option<u32>, records: &[(u32, &[u8])]) -> Vec<u8> {
  let mut image = vec![0u8; 512];
  if let Some(nonce) = nonce {
    image[..8].copy_from_slice(&JOURNAL_MAGIC);
    image[8..12].copy_from_slice(&(records.len() as u32).to_be_bytes());
    image[12..16].copy_from_slice(&nonce.to_be_bytes());
    image[16..20].copy_from_slice(&4u32.to_be_bytes());
    image[20..24].copy_from_slice(&512u32.to_be_bytes());
    image[24..28].copy_from_slice(&(page_size as u32).to_be_bytes());
  }
  for (db_page, page) in records {
    assert_eq!(page.len(), page_size);
    image.extend(db_page.to_be_bytes());
    image.extend_from_slice(page);
    let checksum = sqlite_carve::journal::journal_checksum(nonce.unwrap_or(0), page);
    image.extend(checksum.to_be_bytes());
  }
  image
}
