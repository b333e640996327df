use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";
pub const HEADER_SIZE: usize = 100;

/// Text encoding of every string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
  #[default]
  Utf8,
  Utf16Le,
  Utf16Be,
}

impl TextEncoding {
  /// 0 appears in databases that never had a table created; SQLite treats it as UTF-8.
  pub fn from_header(value: u32) -> Self {
    match value {
      2 => TextEncoding::Utf16Le,
      3 => TextEncoding::Utf16Be,
      _ => TextEncoding::Utf8,
    }
  }

  /// Encodes an ASCII keyword the way it appears in record bodies.
  pub fn encode_keyword(&self, keyword: &str) -> Vec<u8> {
    match self {
      TextEncoding::Utf8 => keyword.as_bytes().to_vec(),
      TextEncoding::Utf16Le => keyword.encode_utf16().flat_map(u16::to_le_bytes).collect(),
      TextEncoding::Utf16Be => keyword.encode_utf16().flat_map(u16::to_be_bytes).collect(),
    }
  }

  pub fn decode(&self, data: &[u8]) -> String {
    let units = |to_u16: fn([u8; 2]) -> u16| {
      let units = data.chunks_exact(2).map(|pair| to_u16([pair[0], pair[1]]));
      char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect::<String>()
    };
    match self {
      TextEncoding::Utf8 => String::from_utf8_lossy(data).into_owned(),
      TextEncoding::Utf16Le => units(u16::from_le_bytes),
      TextEncoding::Utf16Be => units(u16::from_be_bytes),
    }
  }

  pub fn char_width(&self) -> usize {
    match self {
      TextEncoding::Utf8 => 1,
      _ => 2,
    }
  }
}

/// Sqlite Database Header
///
/// The first 100 bytes of the database file comprise the database file header.
/// All multibyte fields are stored big-endian.
///
/// +------+----+------------------------------------------------------------------------------------------+
/// |Offset|Size|Description                                                                               |
/// +------+----+------------------------------------------------------------------------------------------|
/// |0     |16  |The header string: "SQLite format 3\000"                                                  |
/// |16    |2   |Page size in bytes: a power of two between 512 and 32768, or 1 meaning 65536.              |
/// |18    |1   |File format write version. 1 for legacy; 2 for WAL.                                       |
/// |19    |1   |File format read version. 1 for legacy; 2 for WAL.                                        |
/// |20    |1   |Bytes of unused "reserved" space at the end of each page. Usually 0.                      |
/// |21    |1   |Maximum embedded payload fraction. Must be 64.                                            |
/// |22    |1   |Minimum embedded payload fraction. Must be 32.                                            |
/// |23    |1   |Leaf payload fraction. Must be 32.                                                        |
/// |24    |4   |File change counter.                                                                      |
/// |28    |4   |Size of the database file in pages. The "in-header database size".                        |
/// |32    |4   |Page number of the first freelist trunk page.                                             |
/// |36    |4   |Total number of freelist pages.                                                           |
/// |40    |4   |The schema cookie.                                                                        |
/// |44    |4   |The schema format number. Supported schema formats are 1 2 3 and 4.                       |
/// |48    |4   |Default page cache size.                                                                  |
/// |52    |4   |Largest root b-tree page in auto-vacuum or incremental-vacuum modes, zero otherwise.      |
/// |56    |4   |The database text encoding. 1 means UTF-8, 2 means UTF-16le, 3 means UTF-16be.            |
/// |60    |4   |The "user version" as read and set by the user_version pragma.                            |
/// |64    |4   |True (non-zero) for incremental-vacuum mode. False (zero) otherwise.                      |
/// |68    |4   |The "Application ID" set by PRAGMA application_id.                                        |
/// |72    |20  |Reserved for expansion. Must be zero.                                                     |
/// |92    |4   |The version-valid-for number.                                                             |
/// |96    |4   |SQLITE_VERSION_NUMBER                                                                     |
/// +------+----+------------------------------------------------------------------------------------------+
#[derive(Debug, Clone)]
pub struct DbHeader {
  pub header: [u8; 16],
  pub page_size: u32,
  pub file_format_write_version: u8,
  pub file_format_read_version: u8,
  pub reserved_space: u8,
  pub max_embedded_payload_fraction: u8,
  pub min_embedded_payload_fraction: u8,
  pub leaf_payload_fraction: u8,
  pub file_change_counter: u32,
  pub database_size: u32,
  pub first_freelist_trunk_page: u32,
  pub total_freelist_pages: u32,
  pub schema_cookie: u32,
  pub schema_format_number: u32,
  pub default_page_cache_size: u32,
  pub largest_root_b_tree_page: u32,
  pub database_text_encoding: u32,
  pub user_version: u32,
  pub incremental_vacuum_mode: u32,
  pub application_id: u32,
  pub reserved_expansion: [u8; 20],
  pub version_valid_for_number: u32,
  pub sqlite_version_number: u32,
}

/// Decodes the 2-byte page size field; 1 stands for 65536.
pub fn decode_page_size(raw: u16) -> Option<u32> {
  let size = if raw == 1 { 65536 } else { raw as u32 };
  (size.is_power_of_two() && (512..=65536).contains(&size)).then_some(size)
}

fn be_u32(bytes: &[u8], offset: usize) -> u32 {
  u32::from_be_bytes([
    bytes[offset],
    bytes[offset + 1],
    bytes[offset + 2],
    bytes[offset + 3],
  ])
}

impl TryFrom<&[u8]> for DbHeader {
  type Error = Error;

  fn try_from(bytes: &[u8]) -> Result<Self> {
    if bytes.len() < HEADER_SIZE {
      return Err(Error::Truncated {
        len: bytes.len() as u64,
      });
    }
    if &bytes[..16] != SQLITE_MAGIC {
      return Err(Error::NotSqlite);
    }
    let raw_page_size = u16::from_be_bytes([bytes[16], bytes[17]]);
    let page_size =
      decode_page_size(raw_page_size).ok_or(Error::InvalidPageSize(raw_page_size as u32))?;

    let mut header = [0; 16];
    header.copy_from_slice(&bytes[..16]);
    let mut reserved_expansion = [0; 20];
    reserved_expansion.copy_from_slice(&bytes[72..92]);

    let header = DbHeader {
      header,
      page_size,
      file_format_write_version: bytes[18],
      file_format_read_version: bytes[19],
      reserved_space: bytes[20],
      max_embedded_payload_fraction: bytes[21],
      min_embedded_payload_fraction: bytes[22],
      leaf_payload_fraction: bytes[23],
      file_change_counter: be_u32(bytes, 24),
      database_size: be_u32(bytes, 28),
      first_freelist_trunk_page: be_u32(bytes, 32),
      total_freelist_pages: be_u32(bytes, 36),
      schema_cookie: be_u32(bytes, 40),
      schema_format_number: be_u32(bytes, 44),
      default_page_cache_size: be_u32(bytes, 48),
      largest_root_b_tree_page: be_u32(bytes, 52),
      database_text_encoding: be_u32(bytes, 56),
      user_version: be_u32(bytes, 60),
      incremental_vacuum_mode: be_u32(bytes, 64),
      application_id: be_u32(bytes, 68),
      reserved_expansion,
      version_valid_for_number: be_u32(bytes, 92),
      sqlite_version_number: be_u32(bytes, 96),
    };

    if header.usable_size() < 480 {
      return Err(Error::InvalidPageSize(page_size));
    }
    if header.max_embedded_payload_fraction != 64
      || header.min_embedded_payload_fraction != 32
      || header.leaf_payload_fraction != 32
    {
      warn!(
        max = header.max_embedded_payload_fraction,
        min = header.min_embedded_payload_fraction,
        leaf = header.leaf_payload_fraction,
        "non-standard payload fractions in database header"
      );
    }
    debug!(
      page_size,
      pages = header.database_size,
      freelist_head = header.first_freelist_trunk_page,
      encoding = ?header.text_encoding(),
      "parsed database header"
    );

    Ok(header)
  }
}

impl DbHeader {
  pub fn usable_size(&self) -> u32 {
    self.page_size - self.reserved_space as u32
  }

  pub fn text_encoding(&self) -> TextEncoding {
    TextEncoding::from_header(self.database_text_encoding)
  }

  /// The in-header page count is only meaningful when written by a version of SQLite that
  /// also kept the version-valid-for field in step with the change counter.
  pub fn in_header_size_valid(&self) -> bool {
    self.database_size != 0 && self.version_valid_for_number == self.file_change_counter
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn header_bytes(page_size: u16) -> Vec<u8> {
    let mut bytes = vec![0; HEADER_SIZE];
    bytes[..16].copy_from_slice(SQLITE_MAGIC);
    bytes[16..18].copy_from_slice(&page_size.to_be_bytes());
    bytes[18] = 1;
    bytes[19] = 1;
    bytes[21] = 64;
    bytes[22] = 32;
    bytes[23] = 32;
    bytes[28..32].copy_from_slice(&3u32.to_be_bytes());
    bytes[56..60].copy_from_slice(&2u32.to_be_bytes());
    bytes
  }

  #[test]
  fn parses_standard_header() {
    let header = DbHeader::try_from(&header_bytes(4096)[..]).unwrap();
    assert_eq!(header.page_size, 4096);
    assert_eq!(header.database_size, 3);
    assert_eq!(header.text_encoding(), TextEncoding::Utf16Le);
    assert_eq!(header.usable_size(), 4096);
  }

  #[test]
  fn page_size_one_means_65536() {
    let header = DbHeader::try_from(&header_bytes(1)[..]).unwrap();
    assert_eq!(header.page_size, 65536);
  }

  #[test]
  fn rejects_bad_magic_and_page_size() {
    let mut bytes = header_bytes(4096);
    bytes[0] = b'X';
    assert!(matches!(
      DbHeader::try_from(&bytes[..]),
      Err(Error::NotSqlite)
    ));
    assert!(matches!(
      DbHeader::try_from(&header_bytes(1000)[..]),
      Err(Error::InvalidPageSize(1000))
    ));
    assert!(matches!(
      DbHeader::try_from(&header_bytes(256)[..]),
      Err(Error::InvalidPageSize(256))
    ));
    assert!(matches!(
      DbHeader::try_from(&bytes[..50]),
      Err(Error::Truncated { len: 50 })
    ));
  }

  #[test]
  fn utf16_keywords_round_trip() {
    for encoding in [
      TextEncoding::Utf8,
      TextEncoding::Utf16Le,
      TextEncoding::Utf16Be,
    ] {
      let bytes = encoding.encode_keyword("table");
      assert_eq!(bytes.len(), 5 * encoding.char_width());
      assert_eq!(encoding.decode(&bytes), "table");
    }
  }
}
