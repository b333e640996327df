use std::fmt::Debug;

use crate::schema::signature::{ColumnClass, TableSignature};

/// What is left around a record whose header length byte and first serial code were
/// overwritten by a freeblock header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirstColumnContext {
  /// The freeblock size field written over the cell, when it can be read.
  pub freeblock_size: Option<usize>,
  /// Serial codes that survived, in bytes.
  pub rest_header_len: usize,
  /// Content size implied by the surviving codes.
  pub rest_body_len: usize,
}

/// Chooses the serial type code of a destroyed first column.
pub trait FirstColumnPolicy: Debug + Send + Sync {
  fn first_column(&self, signature: &TableSignature, context: &FirstColumnContext) -> Option<u64>;
}

/// Infers the first column from its declared type and the space the freeblock says the
/// cell used.
///
/// Assumes one-byte payload length, rowid and header varints: the freeblock then covers
/// `4 + rest_header_len + first_len + rest_body_len` bytes of a rowid table cell. Falls
/// back to NULL when the length cannot be derived.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclaredTypePolicy;

const MAX_FIRST_COLUMN_LEN: usize = 1 << 16;

impl FirstColumnPolicy for DeclaredTypePolicy {
  fn first_column(&self, signature: &TableSignature, context: &FirstColumnContext) -> Option<u64> {
    let column = signature.columns.first()?;
    if column.class == ColumnClass::RowidAlias {
      return Some(0);
    }

    let overhead = if signature.has_rowid() { 4 } else { 3 };
    let first_len = context
      .freeblock_size
      .and_then(|size| size.checked_sub(overhead + context.rest_header_len + context.rest_body_len))
      .filter(|&len| len < MAX_FIRST_COLUMN_LEN);

    let code = match (column.class, first_len) {
      (_, None) | (_, Some(0)) => 0,
      (ColumnClass::Text, Some(len)) => 13 + 2 * len as u64,
      (ColumnClass::Real, Some(8)) => 7,
      (_, Some(len)) => match len {
        1 => 1,
        2 => 2,
        3 => 3,
        4 => 4,
        6 => 5,
        8 => 6,
        _ if column.class == ColumnClass::Any => 12 + 2 * len as u64,
        _ => 0,
      },
    };
    Some(code)
  }
}
