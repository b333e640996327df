//! Write-ahead log reader.
//!
//! A 32-byte header, then frames of a 24-byte frame header followed by one page image.
//! Frames are never discarded: those whose salts differ from the header belong to an older
//! WAL generation and are kept, flagged as not current.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::btree_page::page::Page;
use crate::dbheader::decode_page_size;
use crate::error::{Error, Result};
use crate::store::ByteStore;

pub const WAL_HEADER_SIZE: usize = 32;
pub const WAL_FRAME_HEADER_SIZE: usize = 24;
/// Checksum words stored little-endian.
pub const WAL_MAGIC_LE: u32 = 0x377F_0682;
/// Checksum words stored big-endian.
pub const WAL_MAGIC_BE: u32 = 0x377F_0683;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalChecksum {
  pub s1: u32,
  pub s2: u32,
}

/// SQLite's Fibonacci-weighted checksum over 8-byte chunks, continuing from `seed`.
pub fn wal_checksum(data: &[u8], seed: WalChecksum, big_endian: bool) -> WalChecksum {
  let word = |bytes: &[u8]| {
    let bytes = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if big_endian {
      u32::from_be_bytes(bytes)
    } else {
      u32::from_le_bytes(bytes)
    }
  };
  let WalChecksum { mut s1, mut s2 } = seed;
  for chunk in data.chunks_exact(8) {
    s1 = s1.wrapping_add(word(&chunk[..4])).wrapping_add(s2);
    s2 = s2.wrapping_add(word(&chunk[4..])).wrapping_add(s1);
  }
  WalChecksum { s1, s2 }
}

/// +------+----+----------------------------------------------+
/// |Offset|Size|Description                                   |
/// +------+----+----------------------------------------------|
/// |0     |4   |Magic number. 0x377f0682 or 0x377f0683        |
/// |4     |4   |File format version. Currently 3007000.       |
/// |8     |4   |Database page size.                           |
/// |12    |4   |Checkpoint sequence number                    |
/// |16    |4   |Salt-1: random integer incremented each ckpt  |
/// |20    |4   |Salt-2: a different random number each ckpt  |
/// |24    |4   |Checksum-1: first part of header checksum     |
/// |28    |4   |Checksum-2: second part of header checksum    |
/// +------+----+----------------------------------------------+
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
  pub magic: u32,
  pub format_version: u32,
  pub page_size: u32,
  pub checkpoint_sequence: u32,
  pub salt1: u32,
  pub salt2: u32,
  pub checksum: WalChecksum,
}

impl WalHeader {
  pub fn big_endian_checksum(&self) -> bool {
    self.magic == WAL_MAGIC_BE
  }
}

/// One frame, as found in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalFrame {
  /// 1-based position in the file.
  pub index: usize,
  /// Offset of the frame header.
  pub offset: u64,
  pub db_page: u32,
  /// Database size in pages after a commit; 0 for other frames.
  pub commit_size: u32,
  pub salt1: u32,
  pub salt2: u32,
  pub committed: bool,
  /// Salts match the header: the frame belongs to the live WAL generation.
  pub current: bool,
  pub checksum_valid: bool,
}

/// Frames sharing one `salt1`, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
  pub salt1: u32,
  pub frames: Vec<WalFrame>,
}

impl Checkpoint {
  pub fn committed(&self) -> bool {
    self.frames.iter().any(|frame| frame.committed)
  }
}

pub struct WalReader {
  store: ByteStore,
  header: WalHeader,
  page_size: usize,
  frames: Vec<WalFrame>,
}

impl WalReader {
  pub fn open(path: impl AsRef<Path>, db_page_size: usize) -> Result<Self> {
    Self::from_store(ByteStore::open(path)?, db_page_size)
  }

  pub fn from_store(store: ByteStore, db_page_size: usize) -> Result<Self> {
    if !store.contains(0, WAL_HEADER_SIZE) {
      return Err(Error::BadWalMagic(0));
    }
    let mut cursor = store.cursor();
    let magic = cursor.get_u32_be();
    if magic != WAL_MAGIC_LE && magic != WAL_MAGIC_BE {
      return Err(Error::BadWalMagic(magic));
    }
    let header = WalHeader {
      magic,
      format_version: cursor.get_u32_be(),
      page_size: cursor.get_u32_be(),
      checkpoint_sequence: cursor.get_u32_be(),
      salt1: cursor.get_u32_be(),
      salt2: cursor.get_u32_be(),
      checksum: WalChecksum {
        s1: cursor.get_u32_be(),
        s2: cursor.get_u32_be(),
      },
    };

    let expected = wal_checksum(
      &store.read(0, WAL_HEADER_SIZE - 8),
      WalChecksum::default(),
      header.big_endian_checksum(),
    );
    if expected != header.checksum {
      warn!("WAL header checksum mismatch; frame checksums will not verify");
    }

    let page_size = match u16::try_from(header.page_size).ok().and_then(decode_page_size) {
      Some(size) => size as usize,
      None if header.page_size == 65536 => 65536,
      None => {
        warn!(
          wal_page_size = header.page_size,
          db_page_size, "WAL header page size invalid, using the database's"
        );
        db_page_size
      }
    };

    let frames = Self::read_frames(&store, &header, page_size, expected == header.checksum);
    let reader = Self {
      store,
      header,
      page_size,
      frames,
    };
    info!(
      frames = reader.frames.len(),
      checkpoints = reader.checkpoints().len(),
      page_size,
      "WAL parsed"
    );
    Ok(reader)
  }

  fn read_frames(
    store: &ByteStore,
    header: &WalHeader,
    page_size: usize,
    header_ok: bool,
  ) -> Vec<WalFrame> {
    let big_endian = header.big_endian_checksum();
    let mut frames = Vec::new();
    let mut running = header.checksum;
    let mut chain_ok = header_ok;
    let mut index = 0;
    let mut cursor = store.cursor();
    cursor.set_position(WAL_HEADER_SIZE as u64);

    while cursor.has_remaining(WAL_FRAME_HEADER_SIZE + page_size) {
      let offset = cursor.position();
      let db_page = cursor.get_u32_be();
      let commit_size = cursor.get_u32_be();
      let salt1 = cursor.get_u32_be();
      let salt2 = cursor.get_u32_be();
      let stored = WalChecksum {
        s1: cursor.get_u32_be(),
        s2: cursor.get_u32_be(),
      };
      let page = cursor.get_bytes(page_size);
      index += 1;

      if db_page == 0 {
        debug!(frame = index, offset, "skipping frame without a page number");
        continue;
      }
      let current = salt1 == header.salt1 && salt2 == header.salt2;
      let checksum_valid = if current && chain_ok {
        running = wal_checksum(&store.read(offset, 8), running, big_endian);
        running = wal_checksum(&page, running, big_endian);
        chain_ok = running == stored;
        chain_ok
      } else {
        false
      };

      frames.push(WalFrame {
        index,
        offset,
        db_page,
        commit_size,
        salt1,
        salt2,
        committed: commit_size != 0,
        current,
        checksum_valid,
      });
    }
    frames
  }

  pub fn header(&self) -> &WalHeader {
    &self.header
  }

  pub fn page_size(&self) -> usize {
    self.page_size
  }

  pub fn frames(&self) -> &[WalFrame] {
    &self.frames
  }

  /// The page image carried by `frame`, numbered as the database page it replaces.
  pub fn page(&self, frame: &WalFrame) -> Option<Page> {
    let offset = frame.offset + WAL_FRAME_HEADER_SIZE as u64;
    let data = self.store.try_slice(offset, self.page_size)?;
    Some(Page::new(data, frame.db_page, offset))
  }

  /// Frames grouped by `salt1`, groups in order of first appearance.
  pub fn checkpoints(&self) -> Vec<Checkpoint> {
    let mut checkpoints: Vec<Checkpoint> = Vec::new();
    for frame in &self.frames {
      match checkpoints.iter_mut().find(|c| c.salt1 == frame.salt1) {
        Some(checkpoint) => checkpoint.frames.push(*frame),
        None => checkpoints.push(Checkpoint {
          salt1: frame.salt1,
          frames: vec![*frame],
        }),
      }
    }
    checkpoints
  }
}
