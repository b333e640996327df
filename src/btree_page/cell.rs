use bytes::Bytes;

use super::{page::Page, PageType};
use crate::error::DecodeError;

/// Table B-Tree Leaf Cell (header 0x0d):
///
///   A varint which is the total number of bytes of payload, including any overflow
///   A varint which is the integer key, a.k.a. "rowid"
///   The initial portion of the payload that does not spill to overflow pages.
///   A 4-byte big-endian integer page number for the first page of the overflow page list - omitted if all payload fits on the b-tree page.
///
/// Table B-Tree Interior Cell (header 0x05):
///
///   A 4-byte big-endian page number which is the left child pointer.
///   A varint which is the integer key
///
/// Index B-Tree Leaf Cell (header 0x0a):
///
///   A varint which is the total number of bytes of key payload, including any overflow
///   The initial portion of the payload that does not spill to overflow pages.
///   A 4-byte big-endian integer page number for the first page of the overflow page list - omitted if all payload fits on the b-tree page.
///
/// Index B-Tree Interior Cell (header 0x02):
///
///   A 4-byte big-endian page number which is the left child pointer.
///   A varint which is the total number of bytes of key payload, including any overflow
///   The initial portion of the payload that does not spill to overflow pages.
///   A 4-byte big-endian integer page number for the first page of the overflow page list - omitted if all payload fits on the b-tree page.
#[derive(Debug, Clone)]
pub enum Cell {
  TableLeaf {
    payload_size: u64,
    row_id: i64,
    payload: Bytes, // Local payload bytes
    overflow_page: Option<u32>,
  },
  TableInterior {
    left_child_page: u32,
    row_id: i64,
  },
  IndexLeaf {
    payload_size: u64,
    payload: Bytes,
    overflow_page: Option<u32>,
  },
  IndexInterior {
    left_child_page: u32,
    payload_size: u64,
    payload: Bytes,
    overflow_page: Option<u32>,
  },
}

macro_rules! read_varint_and_advance {
  ($page:expr, $offset:expr) => {{
    let varint = $page
      .read_varint($offset)
      .ok_or(DecodeError::TruncatedVarint($offset))?;
    $offset += varint.size;
    varint.value
  }};
}

/// How many payload bytes stay on the b-tree page; the rest spills into the overflow chain.
pub fn local_payload_size(page_type: PageType, payload_size: u64, usable_size: usize) -> usize {
  let usable = usable_size as u64;
  let max_local = if page_type == PageType::TableLeaf {
    usable - 35
  } else {
    (usable - 12) * 64 / 255 - 23
  };
  if payload_size <= max_local {
    return payload_size as usize;
  }
  let min_local = (usable - 12) * 32 / 255 - 23;
  let spill = min_local + (payload_size - min_local) % (usable - 4);
  if spill <= max_local {
    spill as usize
  } else {
    min_local as usize
  }
}

impl Cell {
  pub fn payload(&self) -> &[u8] {
    match self {
      Cell::TableLeaf { payload, .. } => payload,
      Cell::IndexLeaf { payload, .. } => payload,
      Cell::IndexInterior { payload, .. } => payload,
      _ => &[],
    }
  }

  pub fn payload_size(&self) -> u64 {
    match self {
      Cell::TableLeaf { payload_size, .. }
      | Cell::IndexLeaf { payload_size, .. }
      | Cell::IndexInterior { payload_size, .. } => *payload_size,
      Cell::TableInterior { .. } => 0,
    }
  }

  pub fn overflow_page(&self) -> Option<u32> {
    match self {
      Cell::TableLeaf { overflow_page, .. }
      | Cell::IndexLeaf { overflow_page, .. }
      | Cell::IndexInterior { overflow_page, .. } => *overflow_page,
      Cell::TableInterior { .. } => None,
    }
  }

  pub fn row_id(&self) -> Option<i64> {
    match self {
      Cell::TableLeaf { row_id, .. } | Cell::TableInterior { row_id, .. } => Some(*row_id),
      _ => None,
    }
  }

  pub fn left_child_page(&self) -> Option<u32> {
    match self {
      Cell::TableInterior {
        left_child_page, ..
      }
      | Cell::IndexInterior {
        left_child_page, ..
      } => Some(*left_child_page),
      _ => None,
    }
  }

  /// Parses the cell starting at `offset`, returning it with the offset one past its last byte.
  pub fn parse(
    page: &Page,
    page_type: PageType,
    offset: usize,
    usable_size: usize,
  ) -> Result<(Self, usize), DecodeError> {
    if offset >= page.len() {
      return Err(DecodeError::BadCellOffset(offset));
    }
    let mut cell_offset = offset;
    match page_type {
      PageType::TableLeaf => {
        let payload_size = read_varint_and_advance!(page, cell_offset);
        let row_id = read_varint_and_advance!(page, cell_offset) as i64;
        let (payload, overflow_page, end) =
          Self::read_payload(page, page_type, payload_size, cell_offset, usable_size)?;
        Ok((
          Cell::TableLeaf {
            payload_size,
            row_id,
            payload,
            overflow_page,
          },
          end,
        ))
      }
      PageType::TableInterior => {
        let left_child_page = page
          .read_u32(cell_offset)
          .ok_or(DecodeError::BadCellOffset(offset))?;
        cell_offset += 4;
        let row_id = read_varint_and_advance!(page, cell_offset) as i64;
        Ok((
          Cell::TableInterior {
            left_child_page,
            row_id,
          },
          cell_offset,
        ))
      }
      PageType::IndexLeaf => {
        let payload_size = read_varint_and_advance!(page, cell_offset);
        let (payload, overflow_page, end) =
          Self::read_payload(page, page_type, payload_size, cell_offset, usable_size)?;
        Ok((
          Cell::IndexLeaf {
            payload_size,
            payload,
            overflow_page,
          },
          end,
        ))
      }
      PageType::IndexInterior => {
        let left_child_page = page
          .read_u32(cell_offset)
          .ok_or(DecodeError::BadCellOffset(offset))?;
        cell_offset += 4;
        let payload_size = read_varint_and_advance!(page, cell_offset);
        let (payload, overflow_page, end) =
          Self::read_payload(page, page_type, payload_size, cell_offset, usable_size)?;
        Ok((
          Cell::IndexInterior {
            left_child_page,
            payload_size,
            payload,
            overflow_page,
          },
          end,
        ))
      }
      PageType::OverflowOrUnassigned => Err(DecodeError::BadCellOffset(offset)),
    }
  }

  fn read_payload(
    page: &Page,
    page_type: PageType,
    payload_size: u64,
    payload_offset: usize,
    usable_size: usize,
  ) -> Result<(Bytes, Option<u32>, usize), DecodeError> {
    let limit = usable_size.min(page.len());
    let local = local_payload_size(page_type, payload_size, usable_size);
    let local_end = payload_offset + local;
    if local_end > limit {
      return Err(DecodeError::BadPayloadLength(payload_size));
    }
    let payload = page
      .read_bytes(payload_offset, local)
      .ok_or(DecodeError::BadPayloadLength(payload_size))?;
    if local as u64 == payload_size {
      return Ok((payload, None, local_end));
    }
    if local_end + 4 > limit {
      return Err(DecodeError::BadPayloadLength(payload_size));
    }
    let overflow_page = page.read_u32(local_end).filter(|&page| page != 0);
    Ok((payload, overflow_page, local_end + 4))
  }
}
