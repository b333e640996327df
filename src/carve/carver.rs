use tracing::{debug, trace};

use super::gaps::{Gap, GapTracker};
use super::matcher::{match_header, CarveMode, HeaderMatch};
use super::policy::FirstColumnPolicy;
use crate::btree_page::cell::local_payload_size;
use crate::btree_page::overflow::OverflowChain;
use crate::btree_page::schema_layer::Record;
use crate::btree_page::walker::SignatureId;
use crate::btree_page::PageType;
use crate::schema::signature::TableSignature;
use crate::schema::Schema;
use crate::SQLite;

/// A deleted record rebuilt from unexplained page bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct CarvedRecord {
  pub signature: SignatureId,
  pub mode: CarveMode,
  /// First page byte attributed to the record, including overwritten header bytes.
  pub offset: usize,
  /// One past the last page byte attributed to the record.
  pub end: usize,
  pub header_len: usize,
  pub payload_len: u64,
  pub record: Record,
  /// Columns whose serial type was inferred rather than read.
  pub synthesized_columns: Vec<usize>,
  /// Columns cut short by a missing or broken overflow chain.
  pub truncated_columns: Vec<usize>,
}

/// Scans the gaps of one page for records of known tables.
pub struct Carver<'a> {
  db: &'a SQLite,
  schema: &'a Schema,
  policy: &'a dyn FirstColumnPolicy,
  min_gap_len: usize,
}

impl<'a> Carver<'a> {
  pub fn new(
    db: &'a SQLite,
    schema: &'a Schema,
    policy: &'a dyn FirstColumnPolicy,
    min_gap_len: usize,
  ) -> Self {
    Self {
      db,
      schema,
      policy,
      min_gap_len,
    }
  }

  /// Runs the modes in order, each over every candidate and freshly computed gaps, so an
  /// intact header of any table is found before a damaged one is guessed. Every accepted
  /// record is marked visited before the scan moves on.
  pub fn carve(
    &self,
    data: &[u8],
    tracker: &mut GapTracker,
    candidates: &[SignatureId],
  ) -> Vec<CarvedRecord> {
    let mut carved = Vec::new();
    for mode in CarveMode::ALL {
      for &id in candidates {
        let Some(signature) = self.schema.get(id) else {
          continue;
        };
        if signature.columns.is_empty() {
          continue;
        }
        for gap in tracker.find_gaps(data, self.min_gap_len) {
          let mut position = gap.from;
          while position < gap.to {
            if tracker.is_visited(position) {
              position += 1;
              continue;
            }
            match self.try_carve(data, gap, position, id, signature, mode) {
              Some(record) => {
                trace!(
                  offset = record.offset,
                  end = record.end,
                  table = %signature.name,
                  ?mode,
                  "carved record"
                );
                tracker.mark(record.offset..record.end);
                position = record.end.max(position + 1);
                carved.push(record);
              }
              None => position += 1,
            }
          }
        }
      }
    }
    carved
  }

  fn try_carve(
    &self,
    data: &[u8],
    gap: Gap,
    position: usize,
    id: SignatureId,
    signature: &TableSignature,
    mode: CarveMode,
  ) -> Option<CarvedRecord> {
    let found = match_header(data, position, gap.to, signature, mode, self.policy)?;
    let body_len = found.body_len()?;
    let payload_len = found.header.len().checked_add(body_len)?;
    let max_payload = self.db.number_of_pages() as usize * self.db.usable_size();
    if payload_len > max_payload {
      return None;
    }

    let (payload, end) = if found.body_start + body_len <= gap.to {
      let mut payload = found.header.clone();
      payload.extend_from_slice(&data[found.body_start..found.body_start + body_len]);
      (payload, found.body_start + body_len)
    } else if signature.has_rowid() {
      self.with_overflow(data, gap, &found, payload_len)?
    } else {
      return None;
    };

    let encoding = self.db.text_encoding();
    let (record, truncated_at) = if payload.len() == payload_len {
      let record = Record::parse(&payload, encoding).ok()?;
      if record.len != payload_len {
        return None;
      }
      (record, None)
    } else {
      // a short payload only makes sense if some column runs into the missing bytes
      let (record, truncated_at) = Record::parse_truncated(&payload, encoding).ok()?;
      (record, Some(truncated_at?))
    };
    if !plausible(&record, truncated_at) {
      return None;
    }

    let offset = position
      .saturating_sub(mode.destroyed_prefix())
      .max(gap.from);
    Some(CarvedRecord {
      signature: id,
      mode,
      offset,
      end,
      header_len: found.header.len(),
      payload_len: payload_len as u64,
      synthesized_columns: if found.synthesized_first { vec![0] } else { Vec::new() },
      truncated_columns: truncated_at.map_or(Vec::new(), |first| {
        (first..record.values.len()).collect()
      }),
      record,
    })
  }

  /// The body runs past the gap: the on-page part ends in a 4-byte overflow page number.
  ///
  /// A chain that is missing or cut short still yields the local part plus whatever pages
  /// could be read; the record keeps every byte up to and including the pointer.
  fn with_overflow(
    &self,
    data: &[u8],
    gap: Gap,
    found: &HeaderMatch,
    payload_len: usize,
  ) -> Option<(Vec<u8>, usize)> {
    let local = local_payload_size(PageType::TableLeaf, payload_len as u64, self.db.usable_size());
    let record_start = found.body_start.checked_sub(found.header.len())?;
    let local_end = record_start + local;
    if local < found.header.len() || local_end + 4 > gap.to {
      return None;
    }
    let pointer = &data[local_end..local_end + 4];
    let first_page = u32::from_be_bytes([pointer[0], pointer[1], pointer[2], pointer[3]]);

    let mut payload = found.header.clone();
    payload.extend_from_slice(&data[found.body_start..local_end]);
    let chain = OverflowChain::read(self.db, first_page, payload_len - local);
    if !chain.complete {
      debug!(
        first_page,
        local,
        read = chain.data.len(),
        payload_len,
        "carved record keeps a broken overflow chain"
      );
    }
    payload.extend(chain.data);
    Some((payload, local_end + 4))
  }
}

/// Text read from the wrong place decodes to NULs or replacement characters; real rows
/// rarely contain either. A column cut mid-character may end in one replacement character.
fn plausible(record: &Record, truncated_at: Option<usize>) -> bool {
  record.values.iter().enumerate().all(|(column, value)| {
    let Some(text) = value.as_text() else {
      return true;
    };
    let text = if truncated_at == Some(column) {
      text.trim_end_matches(char::REPLACEMENT_CHARACTER)
    } else {
      text
    };
    !text.contains(['\0', char::REPLACEMENT_CHARACTER])
  })
}
