//! Finding `sqlite_master` rows, live or deleted.
//!
//! Live rows come from walking the schema b-tree rooted at page 1. Deleted rows (dropped
//! tables and indexes) are found by searching every page for the encoded keywords `table`
//! and `index` and decoding the record around each hit. Two shapes are tried: an intact
//! header whose length byte sits in front of the type column's serial code, and a header
//! whose length byte was overwritten, which is synthesized.

use tracing::{debug, info};

use super::signature::SCHEMA_TABLE_ID;
use super::{SchemaOrigin, SchemaRow};
use crate::btree_page::schema_layer::Record;
use crate::btree_page::walker::{BTreeWalker, PageMap, PageRole};
use crate::dbheader::TextEncoding;
use crate::wal::WalReader;
use crate::SQLite;

const KEYWORDS: [&str; 2] = ["table", "index"];

/// Header length byte, five serial codes; realistic upper bound with multi-byte codes.
const MIN_SCHEMA_HEADER: usize = 6;
const MAX_SCHEMA_HEADER: usize = 12;

/// Schema rows from every available source, live rows first.
pub fn discover(db: &SQLite, wal: Option<&WalReader>) -> Vec<SchemaRow> {
  let mut rows = from_btree(db);
  let live = rows.len();
  rows.extend(scan_database(db));

  let user_rows = rows
    .iter()
    .any(|row| matches!(row.object_type.as_str(), "table" | "index"));
  if !user_rows {
    if let Some(wal) = wal {
      rows.extend(scan_wal(wal, db.text_encoding()));
    }
  }
  info!(live, total = rows.len(), "schema rows discovered");
  rows
}

/// Rows of the live schema b-tree.
pub fn from_btree(db: &SQLite) -> Vec<SchemaRow> {
  let role = PageRole::Table(SCHEMA_TABLE_ID);
  let mut pages = PageMap::new(db.number_of_pages());
  BTreeWalker::new(db, &mut pages).walk(1, role);

  let mut rows = Vec::new();
  for (page_number, _) in pages.assigned().filter(|(_, r)| *r == role) {
    let Some(btree) = db.btree_from_page(page_number) else {
      continue;
    };
    if !btree.header.page_type.is_leaf() {
      continue;
    }
    for parsed in &btree.cells {
      match db.record_from_cell(&parsed.cell) {
        Ok(record) => rows.extend(SchemaRow::from_record(&record, SchemaOrigin::Live)),
        Err(e) => debug!(
          page = page_number,
          offset = parsed.offset,
          error = %e,
          "unreadable schema cell"
        ),
      }
    }
  }
  rows
}

pub fn scan_database(db: &SQLite) -> Vec<SchemaRow> {
  (1..=db.number_of_pages())
    .filter_map(|page_number| db.load_page(page_number))
    .flat_map(|page| scan_bytes(&page.data, db.text_encoding(), SchemaOrigin::Carved))
    .collect()
}

pub fn scan_wal(wal: &WalReader, encoding: TextEncoding) -> Vec<SchemaRow> {
  wal
    .frames()
    .iter()
    .filter_map(|frame| wal.page(frame))
    .flat_map(|page| scan_bytes(&page.data, encoding, SchemaOrigin::Wal))
    .collect()
}

pub fn scan_bytes(data: &[u8], encoding: TextEncoding, origin: SchemaOrigin) -> Vec<SchemaRow> {
  let mut rows = Vec::new();
  for keyword in KEYWORDS {
    let needle = encoding.encode_keyword(keyword);
    let type_code = 13 + 2 * needle.len() as u64;
    let mut from = 0;
    while let Some(hit) = find(&data[from..], &needle).map(|at| at + from) {
      from = hit + 1;
      if let Some(row) = row_at(data, hit, type_code, keyword, encoding, origin) {
        rows.push(row);
      }
    }
  }
  rows
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
  haystack
    .windows(needle.len())
    .position(|window| window == needle)
}

/// Tries to decode a schema record whose body starts with the keyword at `hit`.
fn row_at(
  data: &[u8],
  hit: usize,
  type_code: u64,
  keyword: &str,
  encoding: TextEncoding,
  origin: SchemaOrigin,
) -> Option<SchemaRow> {
  for header_len in MIN_SCHEMA_HEADER..=MAX_SCHEMA_HEADER {
    let Some(start) = hit.checked_sub(header_len) else {
      break;
    };
    if data[start] as usize == header_len && data[start + 1] as u64 == type_code {
      if let Some(row) = decode_row(&data[start..], keyword, encoding, origin) {
        return Some(row);
      }
    }
  }

  for serials_len in MIN_SCHEMA_HEADER - 1..MAX_SCHEMA_HEADER {
    let Some(start) = hit.checked_sub(serials_len) else {
      break;
    };
    if data[start] as u64 != type_code {
      continue;
    }
    let mut record = Vec::with_capacity(data.len() - start + 1);
    record.push(serials_len as u8 + 1);
    record.extend_from_slice(&data[start..]);
    if let Some(row) = decode_row(&record, keyword, encoding, origin) {
      return Some(row);
    }
  }
  None
}

fn decode_row(
  data: &[u8],
  keyword: &str,
  encoding: TextEncoding,
  origin: SchemaOrigin,
) -> Option<SchemaRow> {
  let record = Record::parse(data, encoding).ok()?;
  let row = SchemaRow::from_record(&record, origin)?;
  (row.object_type == keyword && !row.name.is_empty()).then_some(row)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fixtures;

  const SQL: &str = "CREATE TABLE gone(a INTEGER, b TEXT)";

  #[test]
  fn finds_intact_record() {
    let mut data = vec![0u8; 64];
    data.extend(fixtures::schema_record("table", "gone", 5, SQL));
    data.extend([0u8; 16]);
    let rows = scan_bytes(&data, TextEncoding::Utf8, SchemaOrigin::Carved);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "gone");
    assert_eq!(rows[0].root_page, 5);
    assert_eq!(rows[0].sql.as_deref(), Some(SQL));
  }

  #[test]
  fn synthesizes_overwritten_header_length() {
    let record = fixtures::schema_record("table", "gone", 5, SQL);
    let mut data = vec![0xFFu8; 32];
    // freeblock header clobbered everything up to the first serial code
    data.extend_from_slice(&record[1..]);
    let rows = scan_bytes(&data, TextEncoding::Utf8, SchemaOrigin::Carved);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].table_name, "gone");
  }

  #[test]
  fn ignores_keyword_in_unrelated_text() {
    let data = b"\x00\x00a table of contents\x00\x00".to_vec();
    assert!(scan_bytes(&data, TextEncoding::Utf8, SchemaOrigin::Carved).is_empty());
  }

  #[test]
  fn live_rows_come_from_page_one() {
    let cell = fixtures::table_cell(1, &fixtures::schema_record("table", "t", 2, SQL));
    let mut image = fixtures::empty_db(2);
    fixtures::put_page(&mut image, 1, &fixtures::leaf_page(1, &[cell]));
    let db = fixtures::open(image);

    let rows = from_btree(&db);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].origin, SchemaOrigin::Live);
    assert_eq!(discover(&db, None)[0].origin, SchemaOrigin::Live);
  }
}
