use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::results::ResultMap;
use super::row::{RecoveredRow, RowStatus};
use crate::btree_page::freelist::FreeList;
use crate::btree_page::walker::{PageMap, PageRole, SignatureId};
use crate::config::RecoveryConfig;
use crate::schema::Schema;
use crate::SQLite;

/// Table name for rows no signature accepts.
pub const UNASSIGNED_TABLE: &str = "__unassigned__";

/// Everything a task reads, plus the result sinks it writes to. Shared by all workers.
pub struct RecoveryContext {
  pub db: SQLite,
  pub schema: Schema,
  pub pages: PageMap,
  pub freelist: FreeList,
  pub config: RecoveryConfig,
  pub results: ResultMap,
  pub wal_results: ResultMap,
  pub journal_results: ResultMap,
  pub stats: RecoveryStats,
  scanned: Vec<AtomicBool>,
}

impl RecoveryContext {
  pub fn new(
    db: SQLite,
    schema: Schema,
    pages: PageMap,
    freelist: FreeList,
    config: RecoveryConfig,
  ) -> Self {
    let scanned = (0..=db.number_of_pages()).map(|_| AtomicBool::new(false)).collect();
    Self {
      db,
      schema,
      pages,
      freelist,
      config,
      results: ResultMap::new(),
      wal_results: ResultMap::new(),
      journal_results: ResultMap::new(),
      stats: RecoveryStats::default(),
      scanned,
    }
  }

  pub fn mark_scanned(&self, page_number: u32) {
    if let Some(flag) = self.scanned.get(page_number as usize) {
      flag.store(true, Ordering::Release);
    }
  }

  pub fn is_scanned(&self, page_number: u32) -> bool {
    self
      .scanned
      .get(page_number as usize)
      .is_some_and(|flag| flag.load(Ordering::Acquire))
  }

  /// Signatures to carve a page with: its owner, or every table when the owner is unknown.
  pub fn candidates(&self, role: PageRole) -> Vec<SignatureId> {
    match role.signature() {
      Some(id) => vec![id],
      None => self.schema.table_candidates(),
    }
  }

  pub fn table_name(&self, id: Option<SignatureId>) -> String {
    id.and_then(|id| self.schema.get(id))
      .map_or_else(|| UNASSIGNED_TABLE.to_string(), |signature| signature.name.clone())
  }
}

/// Counters updated by workers as they go.
#[derive(Debug, Default)]
pub struct RecoveryStats {
  pages_scanned: AtomicUsize,
  failed_tasks: AtomicUsize,
  rows: [AtomicUsize; 4],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
  pub pages_scanned: usize,
  pub failed_tasks: usize,
  pub regular: usize,
  pub deleted_in_page: usize,
  pub freelist_entry: usize,
  pub unallocated_space: usize,
}

fn status_slot(status: RowStatus) -> usize {
  match status {
    RowStatus::Regular => 0,
    RowStatus::DeletedInPage => 1,
    RowStatus::FreelistEntry => 2,
    RowStatus::UnallocatedSpace => 3,
  }
}

impl RecoveryStats {
  pub fn page_scanned(&self) {
    self.pages_scanned.fetch_add(1, Ordering::Relaxed);
  }

  pub fn task_failed(&self) {
    self.failed_tasks.fetch_add(1, Ordering::Relaxed);
  }

  pub fn rows_found(&self, rows: &[RecoveredRow]) {
    for row in rows {
      self.rows[status_slot(row.status)].fetch_add(1, Ordering::Relaxed);
    }
  }

  pub fn snapshot(&self) -> StatsSnapshot {
    let rows = |status| self.rows[status_slot(status)].load(Ordering::Relaxed);
    StatsSnapshot {
      pages_scanned: self.pages_scanned.load(Ordering::Relaxed),
      failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
      regular: rows(RowStatus::Regular),
      deleted_in_page: rows(RowStatus::DeletedInPage),
      freelist_entry: rows(RowStatus::FreelistEntry),
      unallocated_space: rows(RowStatus::UnallocatedSpace),
    }
  }
}
