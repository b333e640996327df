use super::policy::{FirstColumnContext, FirstColumnPolicy};
use crate::btree_page::schema_layer::SerialType;
use crate::schema::signature::{PatternSlot, TableSignature};
use crate::varint::VarInt;

/// `next freeblock` and `size`, both u16.
const FREEBLOCK_HEADER_LEN: usize = 4;

/// How much of a deleted record's header is assumed to survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CarveMode {
  /// Header length varint and every serial code intact.
  Normal,
  /// Header length overwritten; every serial code intact.
  ColumnsOnly,
  /// Header length and the first serial code overwritten by a freeblock header.
  FirstColumnMissing,
}

impl CarveMode {
  pub const ALL: [CarveMode; 3] = [
    CarveMode::Normal,
    CarveMode::ColumnsOnly,
    CarveMode::FirstColumnMissing,
  ];

  /// Bytes in front of the match that belonged to the record and were overwritten.
  pub fn destroyed_prefix(&self) -> usize {
    match self {
      CarveMode::Normal => 0,
      CarveMode::ColumnsOnly => 1,
      CarveMode::FirstColumnMissing => 2,
    }
  }
}

/// A header that fits a signature at some page position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMatch {
  pub mode: CarveMode,
  /// Where the matched bytes start.
  pub position: usize,
  /// First content byte, right after the last matched serial code.
  pub body_start: usize,
  /// The complete header, reconstructed where bytes were lost.
  pub header: Vec<u8>,
  pub codes: Vec<u64>,
  pub synthesized_first: bool,
}

impl HeaderMatch {
  /// Content size implied by the serial codes; `None` on overflow.
  pub fn body_len(&self) -> Option<usize> {
    self
      .codes
      .iter()
      .try_fold(0usize, |sum, &code| sum.checked_add(SerialType::from_code(code).content_size()))
  }
}

fn match_columns(
  data: &[u8],
  mut at: usize,
  end: usize,
  slots: &[PatternSlot],
) -> Option<(Vec<u64>, usize)> {
  let mut codes = Vec::with_capacity(slots.len());
  for slot in slots {
    let varint = VarInt::decode(data.get(at..end)?)?;
    if !slot.matches(varint.value) {
      return None;
    }
    codes.push(varint.value);
    at += varint.size;
  }
  Some((codes, at))
}

/// Prefixes serial codes with the header length varint they need.
pub fn synthesize_header(serials: &[u8]) -> Vec<u8> {
  let mut header_len = serials.len() + 1;
  while VarInt::get_encoded_size(header_len as u64) + serials.len() != header_len {
    header_len += 1;
  }
  let mut header = VarInt::encode(header_len as u64);
  header.extend_from_slice(serials);
  header
}

/// Tries to read a header for `signature` at `position`, never reading at or past `end`.
/// Headers whose serial codes are all zero are rejected.
pub fn match_header(
  data: &[u8],
  position: usize,
  end: usize,
  signature: &TableSignature,
  mode: CarveMode,
  policy: &dyn FirstColumnPolicy,
) -> Option<HeaderMatch> {
  let pattern = &signature.pattern;
  let end = end.min(data.len());

  let (header, codes, body_start, synthesized_first) = match mode {
    CarveMode::Normal => {
      let header_len = VarInt::decode(data.get(position..end)?)?;
      if !pattern.header_len.matches(header_len.value) {
        return None;
      }
      let (codes, body_start) =
        match_columns(data, position + header_len.size, end, &pattern.columns)?;
      if header_len.value != (body_start - position) as u64 {
        return None;
      }
      (data[position..body_start].to_vec(), codes, body_start, false)
    }
    CarveMode::ColumnsOnly => {
      let (codes, body_start) = match_columns(data, position, end, &pattern.columns)?;
      (synthesize_header(&data[position..body_start]), codes, body_start, false)
    }
    CarveMode::FirstColumnMissing => {
      if pattern.columns.len() < 2 {
        return None;
      }
      let (rest, body_start) = match_columns(data, position, end, &pattern.columns[1..])?;
      let rest_body_len = rest
        .iter()
        .map(|&code| SerialType::from_code(code).content_size())
        .try_fold(0usize, |sum, len| sum.checked_add(len))?;
      let freeblock_size = position
        .checked_sub(2)
        .and_then(|at| data.get(at..position))
        .map(|size| u16::from_be_bytes([size[0], size[1]]) as usize);
      // the freeblock starts two bytes before its size field and covers what survived
      let covered = FREEBLOCK_HEADER_LEN + (body_start - position) + rest_body_len;
      if freeblock_size.is_some_and(|size| size < covered) {
        return None;
      }
      let context = FirstColumnContext {
        freeblock_size,
        rest_header_len: body_start - position,
        rest_body_len,
      };
      let first = policy.first_column(signature, &context)?;
      if !pattern.columns[0].matches(first) {
        return None;
      }

      let mut serials = VarInt::encode(first);
      serials.extend_from_slice(&data[position..body_start]);
      let mut codes = Vec::with_capacity(rest.len() + 1);
      codes.push(first);
      codes.extend(rest);
      (synthesize_header(&serials), codes, body_start, true)
    }
  };

  if codes.iter().all(|&code| code == 0) {
    return None;
  }
  Some(HeaderMatch {
    mode,
    position,
    body_start,
    header,
    codes,
    synthesized_first,
  })
}
