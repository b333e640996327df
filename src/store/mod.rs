//! Flat byte addressing over files of any size.
//!
//! The file is loaded as a sequence of fixed-capacity segments, each one a [`Bytes`]
//! handle, so offsets beyond what a single segment should cover are still reachable
//! through one `u64` address space. Each segment is copied out of a short-lived mapping
//! during [`ByteStore::open`]; later reads are plain memory reads and a file truncated
//! mid-run cannot fault a worker.

use std::{fs::File, path::Path};

use bytes::{Bytes, BytesMut};
use memmap2::MmapOptions;

use crate::error::{Error, Result};

/// 1 GiB per segment.
pub const DEFAULT_SEGMENT_SIZE: usize = 1 << 30;
/// Mapping offsets must be a multiple of the allocation granularity.
pub const SEGMENT_ALIGNMENT: usize = 1 << 16;

#[derive(Debug, Clone)]
pub struct ByteStore {
  segments: Vec<Bytes>,
  segment_size: usize,
  len: u64,
}

impl ByteStore {
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with_segment_size(path, DEFAULT_SEGMENT_SIZE)
  }

  pub fn open_with_segment_size(path: impl AsRef<Path>, segment_size: usize) -> Result<Self> {
    let path = path.as_ref();
    let segment_size = segment_size
      .max(SEGMENT_ALIGNMENT)
      .next_multiple_of(SEGMENT_ALIGNMENT);
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let len = file.metadata().map_err(|e| Error::io(path, e))?.len();

    let mut segments = Vec::new();
    let mut offset = 0u64;
    while offset < len {
      let segment_len = (len - offset).min(segment_size as u64) as usize;
      // Read-only mapping, dropped as soon as the segment is copied.
      let map = unsafe {
        MmapOptions::new()
          .offset(offset)
          .len(segment_len)
          .map(&file)
          .map_err(|e| Error::io(path, e))?
      };
      segments.push(Bytes::copy_from_slice(&map));
      offset += segment_len as u64;
    }

    tracing::debug!(
      path = %path.display(),
      len,
      segments = segments.len(),
      "loaded file"
    );
    Ok(Self {
      segments,
      segment_size,
      len,
    })
  }

  /// Builds a store over bytes already in memory, split into `segment_size` chunks.
  pub fn from_bytes(data: impl Into<Bytes>, segment_size: usize) -> Self {
    assert!(segment_size > 0, "segment size must be positive");
    let data: Bytes = data.into();
    let len = data.len() as u64;
    let segments = (0..data.len())
      .step_by(segment_size)
      .map(|start| data.slice(start..(start + segment_size).min(data.len())))
      .collect();
    Self {
      segments,
      segment_size,
      len,
    }
  }

  pub fn len(&self) -> u64 {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn segment_count(&self) -> usize {
    self.segments.len()
  }

  pub fn contains(&self, offset: u64, len: usize) -> bool {
    offset
      .checked_add(len as u64)
      .is_some_and(|end| end <= self.len)
  }

  fn locate(&self, offset: u64) -> (usize, usize) {
    let segment = (offset / self.segment_size as u64) as usize;
    let within = (offset % self.segment_size as u64) as usize;
    (segment, within)
  }

  fn check(&self, offset: u64, len: usize) {
    assert!(
      self.contains(offset, len),
      "read of {len} bytes at {offset} is outside a store of {} bytes",
      self.len
    );
  }

  pub fn get_u8(&self, offset: u64) -> u8 {
    self.check(offset, 1);
    let (segment, within) = self.locate(offset);
    self.segments[segment][within]
  }

  pub fn get_u16_be(&self, offset: u64) -> u16 {
    let mut buf = [0; 2];
    self.read_into(offset, &mut buf);
    u16::from_be_bytes(buf)
  }

  pub fn get_u32_be(&self, offset: u64) -> u32 {
    let mut buf = [0; 4];
    self.read_into(offset, &mut buf);
    u32::from_be_bytes(buf)
  }

  pub fn get_u32_le(&self, offset: u64) -> u32 {
    let mut buf = [0; 4];
    self.read_into(offset, &mut buf);
    u32::from_le_bytes(buf)
  }

  /// Copies `dst.len()` bytes starting at `offset`, crossing segment boundaries as needed.
  pub fn read_into(&self, offset: u64, dst: &mut [u8]) {
    self.check(offset, dst.len());
    let mut copied = 0;
    while copied < dst.len() {
      let (segment, within) = self.locate(offset + copied as u64);
      let source = &self.segments[segment][within..];
      let n = source.len().min(dst.len() - copied);
      dst[copied..copied + n].copy_from_slice(&source[..n]);
      copied += n;
    }
  }

  pub fn read(&self, offset: u64, len: usize) -> Vec<u8> {
    let mut data = vec![0; len];
    self.read_into(offset, &mut data);
    data
  }

  /// A view of `len` bytes at `offset`. Zero-copy unless the range straddles two segments.
  pub fn slice(&self, offset: u64, len: usize) -> Bytes {
    self.check(offset, len);
    if len == 0 {
      return Bytes::new();
    }
    let (segment, within) = self.locate(offset);
    if within + len <= self.segments[segment].len() {
      return self.segments[segment].slice(within..within + len);
    }
    let mut joined = BytesMut::zeroed(len);
    self.read_into(offset, &mut joined);
    joined.freeze()
  }

  /// Like [`ByteStore::slice`], but `None` instead of a panic when out of range.
  pub fn try_slice(&self, offset: u64, len: usize) -> Option<Bytes> {
    self
      .contains(offset, len)
      .then(|| self.slice(offset, len))
  }

  pub fn cursor(&self) -> ByteCursor<'_> {
    ByteCursor {
      store: self,
      position: 0,
      limit: self.len,
      mark: None,
    }
  }
}

/// Relative reads over a [`ByteStore`] with position / limit / mark semantics.
///
/// Moving the position past the limit, or the limit past the end of the store, is a
/// programming error and panics.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
  store: &'a ByteStore,
  position: u64,
  limit: u64,
  mark: Option<u64>,
}

impl<'a> ByteCursor<'a> {
  pub fn position(&self) -> u64 {
    self.position
  }

  pub fn set_position(&mut self, position: u64) -> &mut Self {
    assert!(
      position <= self.limit,
      "position {position} beyond limit {}",
      self.limit
    );
    if self.mark.is_some_and(|mark| mark > position) {
      self.mark = None;
    }
    self.position = position;
    self
  }

  pub fn limit(&self) -> u64 {
    self.limit
  }

  pub fn set_limit(&mut self, limit: u64) -> &mut Self {
    assert!(
      limit <= self.store.len(),
      "limit {limit} beyond store length {}",
      self.store.len()
    );
    self.limit = limit;
    if self.position > limit {
      self.position = limit;
    }
    if self.mark.is_some_and(|mark| mark > limit) {
      self.mark = None;
    }
    self
  }

  pub fn mark(&mut self) -> &mut Self {
    self.mark = Some(self.position);
    self
  }

  pub fn reset(&mut self) -> &mut Self {
    let mark = self.mark.expect("reset called without a mark");
    self.position = mark;
    self
  }

  pub fn remaining(&self) -> u64 {
    self.limit - self.position
  }

  pub fn has_remaining(&self, len: usize) -> bool {
    self.remaining() >= len as u64
  }

  fn advance(&mut self, len: usize) -> u64 {
    assert!(
      self.has_remaining(len),
      "read of {len} bytes past limit {}",
      self.limit
    );
    let at = self.position;
    self.position += len as u64;
    at
  }

  pub fn skip(&mut self, len: usize) -> &mut Self {
    self.advance(len);
    self
  }

  pub fn get_u8(&mut self) -> u8 {
    let at = self.advance(1);
    self.store.get_u8(at)
  }

  pub fn get_u32_be(&mut self) -> u32 {
    let at = self.advance(4);
    self.store.get_u32_be(at)
  }

  pub fn get_bytes(&mut self, len: usize) -> Bytes {
    let at = self.advance(len);
    self.store.slice(at, len)
  }
}
