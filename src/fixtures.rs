//! Small synthetic database images for unit tests.

use bytes::Bytes;

use crate::btree_page::schema_layer::Value;
use crate::dbheader::{HEADER_SIZE, SQLITE_MAGIC};
use crate::store::{ByteStore, DEFAULT_SEGMENT_SIZE};
use crate::varint::VarInt;
use crate::SQLite;

pub const PAGE_SIZE: usize = 1024;

pub fn header(pages: u32) -> Vec<u8> {
  let mut bytes = vec![0u8; HEADER_SIZE];
  bytes[..16].copy_from_slice(SQLITE_MAGIC);
  bytes[16..18].copy_from_slice(&(PAGE_SIZE as u16).to_be_bytes());
  bytes[18] = 1;
  bytes[19] = 1;
  bytes[21] = 64;
  bytes[22] = 32;
  bytes[23] = 32;
  bytes[24..28].copy_from_slice(&1u32.to_be_bytes());
  bytes[28..32].copy_from_slice(&pages.to_be_bytes());
  bytes[44..48].copy_from_slice(&4u32.to_be_bytes());
  bytes[56..60].copy_from_slice(&1u32.to_be_bytes());
  bytes[92..96].copy_from_slice(&1u32.to_be_bytes());
  bytes
}

/// `pages` pages; page 1 is an empty table leaf.
pub fn empty_db(pages: u32) -> Vec<u8> {
  let mut image = vec![0u8; PAGE_SIZE * pages as usize];
  image[..HEADER_SIZE].copy_from_slice(&header(pages));
  image[HEADER_SIZE..PAGE_SIZE].copy_from_slice(&leaf_page(1, &[])[HEADER_SIZE..]);
  image
}

/// Copies a page image into place. Page 1 keeps the database header.
pub fn put_page(image: &mut [u8], page_number: u32, page: &[u8]) {
  let start = (page_number as usize - 1) * PAGE_SIZE;
  let skip = if page_number == 1 { HEADER_SIZE } else { 0 };
  image[start + skip..start + PAGE_SIZE].copy_from_slice(&page[skip..PAGE_SIZE]);
}

pub fn set_freelist(image: &mut [u8], first_trunk: u32, count: u32) {
  image[32..36].copy_from_slice(&first_trunk.to_be_bytes());
  image[36..40].copy_from_slice(&count.to_be_bytes());
}

pub fn open(image: Vec<u8>) -> SQLite {
  SQLite::from_store(ByteStore::from_bytes(Bytes::from(image), DEFAULT_SEGMENT_SIZE))
    .expect("fixture image is a valid database")
}

pub fn encode_record(values: &[Value]) -> Vec<u8> {
  let mut codes = Vec::new();
  let mut body = Vec::new();
  for value in values {
    match value {
      Value::Null => codes.push(0),
      Value::Integer(0) => codes.push(8),
      Value::Integer(1) => codes.push(9),
      Value::Integer(i) => {
        let (code, width) = match *i {
          i if i8::try_from(i).is_ok() => (1, 1),
          i if i16::try_from(i).is_ok() => (2, 2),
          i if (-(1 << 23)..1 << 23).contains(&i) => (3, 3),
          i if i32::try_from(i).is_ok() => (4, 4),
          i if (-(1 << 47)..1 << 47).contains(&i) => (5, 6),
          _ => (6, 8),
        };
        codes.push(code);
        body.extend_from_slice(&i.to_be_bytes()[8 - width..]);
      }
      Value::Float(f) => {
        codes.push(7);
        body.extend_from_slice(&f.to_be_bytes());
      }
      Value::Text(s) => {
        codes.push(13 + 2 * s.len() as u64);
        body.extend_from_slice(s.as_bytes());
      }
      Value::Blob(b) => {
        codes.push(12 + 2 * b.len() as u64);
        body.extend_from_slice(b);
      }
    }
  }
  let serials: Vec<u8> = codes.iter().flat_map(|&c| VarInt::encode(c)).collect();
  let mut record = VarInt::encode(serials.len() as u64 + 1);
  record.extend(serials);
  record.extend(body);
  record
}

pub fn table_cell(row_id: i64, record: &[u8]) -> Vec<u8> {
  let mut cell = VarInt::encode(record.len() as u64);
  cell.extend(VarInt::encode(row_id as u64));
  cell.extend_from_slice(record);
  cell
}

pub fn schema_record(kind: &str, name: &str, root_page: i64, sql: &str) -> Vec<u8> {
  encode_record(&[
    Value::Text(kind.into()),
    Value::Text(name.into()),
    Value::Text(name.into()),
    Value::Integer(root_page),
    Value::Text(sql.into()),
  ])
}

/// A table leaf page holding `cells`, packed against the end of the page.
pub fn leaf_page(page_number: u32, cells: &[Vec<u8>]) -> Vec<u8> {
  let mut page = vec![0u8; PAGE_SIZE];
  let header = if page_number == 1 { HEADER_SIZE } else { 0 };
  let mut content = PAGE_SIZE;
  page[header] = 0x0D;
  page[header + 3..header + 5].copy_from_slice(&(cells.len() as u16).to_be_bytes());
  for (i, cell) in cells.iter().enumerate() {
    content -= cell.len();
    page[content..content + cell.len()].copy_from_slice(cell);
    let slot = header + 8 + i * 2;
    page[slot..slot + 2].copy_from_slice(&(content as u16).to_be_bytes());
  }
  page[header + 5..header + 7].copy_from_slice(&(content as u16).to_be_bytes());
  page
}
