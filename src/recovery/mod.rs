//! Page-by-page recovery driven by a pool of workers.
//!
//! A [`job::Job`] prepares the shared [`context::RecoveryContext`] single-threaded, then hands
//! [`task::RecoveryTask`]s to a [`pool::WorkerPool`] in sequential batches. Rows land in
//! append-only [`results::ResultMap`]s keyed by table name.

use std::collections::BTreeMap;

use crate::btree_page::walker::PageRole;
use crate::wal::Checkpoint;

pub mod context;
pub mod job;
pub mod pool;
pub mod results;
pub mod row;
pub mod task;

pub use context::{StatsSnapshot, UNASSIGNED_TABLE};
pub use row::{Provenance, RecoveredRow, RowStatus};

#[derive(Debug, Clone)]
pub struct RecoveryReport {
  /// Rows from the database file, by table name.
  pub tables: BTreeMap<String, Vec<RecoveredRow>>,
  pub wal_tables: BTreeMap<String, Vec<RecoveredRow>>,
  pub journal_tables: BTreeMap<String, Vec<RecoveredRow>>,
  /// Owner of every page, indexed by page number. Index 0 is unused.
  pub page_roles: Vec<PageRole>,
  /// Schema object names, indexed by signature id.
  pub signatures: Vec<String>,
  pub checkpoints: Vec<Checkpoint>,
  pub freelist_pages: Vec<u32>,
  pub stats: StatsSnapshot,
}

impl RecoveryReport {
  pub fn rows(&self, table: &str) -> &[RecoveredRow] {
    self.tables.get(table).map_or(&[], Vec::as_slice)
  }

  /// Database rows with the given status, across all tables.
  pub fn count_by_status(&self, status: RowStatus) -> usize {
    self
      .tables
      .values()
      .flatten()
      .filter(|row| row.status == status)
      .count()
  }

  /// Name of the table or index owning `page_number`, if the b-tree walk reached it.
  pub fn page_owner(&self, page_number: u32) -> Option<&str> {
    let id = self.page_roles.get(page_number as usize)?.signature()?;
    self.signatures.get(id).map(String::as_str)
  }
}
