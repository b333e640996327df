use std::ops::Range;

use bytes::Bytes;

use super::PageType;
use crate::{dbheader::HEADER_SIZE, varint::VarInt};

/// One page image, from the main database file or from a WAL/journal frame.
///
/// Reads return `None` instead of panicking when they would leave the page; callers are
/// decoding untrusted bytes.
#[derive(Debug, Clone)]
pub struct Page {
  pub data: Bytes,
  /// Absolute offset of the first byte of the page within the file it was read from.
  pub offset: u64,
  pub page_number: u32,
}

impl Page {
  pub fn new(data: Bytes, page_number: u32, offset: u64) -> Self {
    Self {
      data,
      offset,
      page_number,
    }
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// Page 1 starts with the database file header.
  pub fn header_offset(&self) -> usize {
    if self.page_number == 1 {
      HEADER_SIZE
    } else {
      0
    }
  }

  pub fn page_type(&self) -> PageType {
    self
      .read_u8(self.header_offset())
      .map_or(PageType::OverflowOrUnassigned, PageType::classify)
  }

  pub fn is_zeroed(&self) -> bool {
    self.data.iter().all(|&b| b == 0)
  }

  fn at(&self, offset: usize) -> Option<u8> {
    self.data.get(offset).copied()
  }

  fn slice(&self, offset_range: Range<usize>) -> Option<&[u8]> {
    self.data.get(offset_range)
  }

  pub fn read_u8(&self, offset: usize) -> Option<u8> {
    self.at(offset)
  }

  pub fn read_u16(&self, offset: usize) -> Option<u16> {
    let bytes = self.slice(offset..offset.checked_add(2)?)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
  }

  pub fn read_u32(&self, offset: usize) -> Option<u32> {
    let bytes = self.slice(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
  }

  /// Zero-copy view of `size` bytes at `offset`.
  pub fn read_bytes(&self, offset: usize, size: usize) -> Option<Bytes> {
    let end = offset.checked_add(size)?;
    (end <= self.data.len()).then(|| self.data.slice(offset..end))
  }

  pub fn read_varint(&self, offset: usize) -> Option<VarInt> {
    VarInt::decode(self.data.get(offset..)?)
  }

  /// Absolute file offset of a byte within the page.
  pub fn absolute(&self, offset: usize) -> u64 {
    self.offset + offset as u64
  }
}
