use tracing::{debug, trace};

use super::context::RecoveryContext;
use super::results::ResultMap;
use super::row::{Provenance, RecoveredRow, RowStatus};
use crate::btree_page::cell::Cell;
use crate::btree_page::page::Page;
use crate::btree_page::schema_layer::{Record, Value};
use crate::btree_page::walker::{PageRole, SignatureId};
use crate::btree_page::BTree;
use crate::carve::{Carver, GapTracker};
use crate::journal::JournalPage;
use crate::wal::WalFrame;

#[derive(Debug, Clone)]
pub enum TaskSource {
  Database,
  FreelistTrunk,
  FreelistLeaf,
  Wal { frame: WalFrame, page: Page },
  Journal { record: JournalPage, nonce: u32, page: Page },
}

/// Recovery of one page image. Tasks for the same page number go to the same worker.
#[derive(Debug, Clone)]
pub struct RecoveryTask {
  pub page_number: u32,
  pub source: TaskSource,
}

impl RecoveryTask {
  pub fn database(page_number: u32) -> Self {
    Self {
      page_number,
      source: TaskSource::Database,
    }
  }

  pub fn freelist(page_number: u32, trunk: bool) -> Self {
    let source = if trunk {
      TaskSource::FreelistTrunk
    } else {
      TaskSource::FreelistLeaf
    };
    Self {
      page_number,
      source,
    }
  }

  pub fn wal(frame: WalFrame, page: Page) -> Self {
    Self {
      page_number: frame.db_page,
      source: TaskSource::Wal { frame, page },
    }
  }

  pub fn journal(record: JournalPage, nonce: u32, page: Page) -> Self {
    Self {
      page_number: record.db_page,
      source: TaskSource::Journal {
        record,
        nonce,
        page,
      },
    }
  }

  pub fn run(&self, ctx: &RecoveryContext) {
    let (page, sink, provenance) = match &self.source {
      TaskSource::Database | TaskSource::FreelistTrunk | TaskSource::FreelistLeaf => {
        let Some(page) = ctx.db.load_page(self.page_number) else {
          debug!(page = self.page_number, "page outside the file");
          return;
        };
        (page, &ctx.results, None)
      }
      TaskSource::Wal { frame, page } => (
        page.clone(),
        &ctx.wal_results,
        Some(Provenance::Wal {
          committed: frame.committed,
          db_page: frame.db_page,
          frame: frame.index,
          salt1: frame.salt1,
          salt2: frame.salt2,
        }),
      ),
      TaskSource::Journal {
        record,
        nonce,
        page,
      } => (
        page.clone(),
        &ctx.journal_results,
        Some(Provenance::Journal {
          db_page: record.db_page,
          index: record.index,
          checksum: record.checksum,
          nonce: *nonce,
        }),
      ),
    };

    let freelist = matches!(
      self.source,
      TaskSource::FreelistTrunk | TaskSource::FreelistLeaf
    );
    let scan = PageScan {
      ctx,
      page: &page,
      role: ctx.pages.get(self.page_number),
      status_override: freelist.then_some(RowStatus::FreelistEntry),
      provenance,
    };
    let rows = scan.run(matches!(self.source, TaskSource::FreelistTrunk));
    self.finish(ctx, sink, rows);
  }

  fn finish(&self, ctx: &RecoveryContext, sink: &ResultMap, rows: Vec<RecoveredRow>) {
    ctx.stats.page_scanned();
    ctx.stats.rows_found(&rows);
    let found = rows.len();
    let added = sink.extend(rows);
    trace!(page = self.page_number, found, added, "page recovered");
    if matches!(
      self.source,
      TaskSource::Database | TaskSource::FreelistTrunk | TaskSource::FreelistLeaf
    ) {
      ctx.mark_scanned(self.page_number);
    }
  }
}

/// Live cells, the unallocated region, then carving of whatever is left.
struct PageScan<'a> {
  ctx: &'a RecoveryContext,
  page: &'a Page,
  role: PageRole,
  /// Free-list pages report every row as a free-list entry.
  status_override: Option<RowStatus>,
  provenance: Option<Provenance>,
}

impl PageScan<'_> {
  fn run(&self, trunk: bool) -> Vec<RecoveredRow> {
    let usable = self.ctx.db.usable_size().min(self.page.len());
    let mut tracker = GapTracker::new(self.page.len());
    tracker.mark(usable..self.page.len());
    tracker.mark(0..self.page.header_offset());
    let mut rows = Vec::new();

    if trunk {
      let max_leaves = self.ctx.db.usable_size() / 4 - 2;
      let leaves = (self.page.read_u32(4).unwrap_or(0) as usize).min(max_leaves);
      tracker.mark(0..8 + leaves * 4);
    } else {
      let page_type = self.page.page_type();
      if page_type.is_interior() {
        trace!(page = self.page.page_number, ?page_type, "interior page, nothing to recover");
        return rows;
      }
      if page_type.is_leaf() {
        if let Some(btree) = BTree::new(self.page.clone(), usable) {
          self.decode_cells(&btree, &mut tracker, &mut rows);
          self.decode_unallocated(&btree, usable, &mut tracker, &mut rows);
        }
      } else if self.page.is_zeroed() {
        return rows;
      }
    }

    if self.ctx.config.carve {
      self.carve(&mut tracker, &mut rows);
    }
    rows
  }

  fn status(&self, status: RowStatus) -> RowStatus {
    self.status_override.unwrap_or(status)
  }

  fn owner(&self, record: &Record, btree: &BTree) -> Option<SignatureId> {
    self
      .role
      .signature()
      .or_else(|| self.ctx.schema.match_record(&record.codes(), btree.header.page_type))
  }

  fn row(
    &self,
    signature: Option<SignatureId>,
    status: RowStatus,
    offset: usize,
    cell: &Cell,
    record: Record,
  ) -> RecoveredRow {
    let mut values = record.values;
    let row_id = cell.row_id();
    let alias = signature
      .and_then(|id| self.ctx.schema.get(id))
      .and_then(|signature| signature.rowid_alias());
    if let (Some(column), Some(row_id)) = (alias, row_id) {
      if let Some(value) = values.get_mut(column).filter(|value| **value == Value::Null) {
        *value = Value::Integer(row_id);
      }
    }
    RecoveredRow {
      table: self.ctx.table_name(signature),
      status: self.status(status),
      offset: self.page.absolute(offset),
      page_number: self.page.page_number,
      payload_len: cell.payload_size(),
      header_len: record.header_len,
      row_id,
      values,
      synthesized_columns: Vec::new(),
      truncated_columns: Vec::new(),
      carve_mode: None,
      provenance: self.provenance,
    }
  }

  fn decode_cells(&self, btree: &BTree, tracker: &mut GapTracker, rows: &mut Vec<RecoveredRow>) {
    tracker.mark(btree.header.offset..btree.header.cell_pointer_array_end());
    for parsed in &btree.cells {
      match self.ctx.db.record_from_cell(&parsed.cell) {
        Ok(record) => {
          tracker.mark(parsed.offset..parsed.end);
          let signature = self.owner(&record, btree);
          rows.push(self.row(signature, RowStatus::Regular, parsed.offset, &parsed.cell, record));
        }
        Err(e) => debug!(
          page = self.page.page_number,
          offset = parsed.offset,
          error = %e,
          "undecodable cell left for carving"
        ),
      }
    }
  }

  /// One opportunistic cell at the first non-zero byte between the pointer array and the
  /// content area.
  fn decode_unallocated(
    &self,
    btree: &BTree,
    usable: usize,
    tracker: &mut GapTracker,
    rows: &mut Vec<RecoveredRow>,
  ) {
    let header = &btree.header;
    let region = header.cell_pointer_array_end()..(header.start_cell_content as usize).min(usable);
    let Some(start) = region
      .clone()
      .find(|&i| self.page.data[i] != 0 && !tracker.is_visited(i))
    else {
      return;
    };
    let Ok((cell, end)) = Cell::parse(self.page, header.page_type, start, usable) else {
      return;
    };
    if end > region.end {
      return;
    }
    let Ok(record) = self.ctx.db.record_from_cell(&cell) else {
      return;
    };
    let Some(signature) = self.owner(&record, btree) else {
      return;
    };
    let accepted = self
      .ctx
      .schema
      .get(signature)
      .is_some_and(|s| s.pattern.accepts(&record.codes()));
    if accepted {
      trace!(page = self.page.page_number, offset = start, "record in unallocated space");
      tracker.mark(start..end);
      rows.push(self.row(Some(signature), RowStatus::UnallocatedSpace, start, &cell, record));
    }
  }

  fn carve(&self, tracker: &mut GapTracker, rows: &mut Vec<RecoveredRow>) {
    let ctx = self.ctx;
    let carver = Carver::new(
      &ctx.db,
      &ctx.schema,
      ctx.config.first_column_policy.as_ref(),
      ctx.config.min_gap_len,
    );
    let candidates = ctx.candidates(self.role);
    for carved in carver.carve(&self.page.data, tracker, &candidates) {
      rows.push(RecoveredRow {
        table: ctx.table_name(Some(carved.signature)),
        status: self.status(RowStatus::DeletedInPage),
        offset: self.page.absolute(carved.offset),
        page_number: self.page.page_number,
        payload_len: carved.payload_len,
        header_len: carved.header_len,
        row_id: None,
        values: carved.record.values,
        synthesized_columns: carved.synthesized_columns,
        truncated_columns: carved.truncated_columns,
        carve_mode: Some(carved.mode),
        provenance: self.provenance,
      });
    }
  }
}
