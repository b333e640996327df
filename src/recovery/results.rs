use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;

use super::row::RecoveredRow;

#[derive(Debug, Default)]
struct TableRows {
  rows: Vec<RecoveredRow>,
  seen: HashSet<Vec<String>>,
}

/// Rows per table, shared by all workers. A row whose content was already recorded for
/// the same table is dropped.
#[derive(Debug, Default)]
pub struct ResultMap {
  tables: Mutex<HashMap<String, TableRows>>,
}

impl ResultMap {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns how many rows were new.
  pub fn extend(&self, rows: impl IntoIterator<Item = RecoveredRow>) -> usize {
    let mut tables = self.tables.lock();
    let mut added = 0;
    for row in rows {
      let entry = tables.entry(row.table.clone()).or_default();
      if entry.seen.insert(row.content_key()) {
        entry.rows.push(row);
        added += 1;
      }
    }
    added
  }

  pub fn insert(&self, row: RecoveredRow) -> bool {
    self.extend(std::iter::once(row)) == 1
  }

  pub fn len(&self) -> usize {
    self.tables.lock().values().map(|table| table.rows.len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Tables by name, rows by offset.
  pub fn snapshot(&self) -> BTreeMap<String, Vec<RecoveredRow>> {
    self
      .tables
      .lock()
      .iter()
      .map(|(name, table)| {
        let mut rows = table.rows.clone();
        rows.sort_by_key(|row| (row.offset, row.page_number));
        (name.clone(), rows)
      })
      .collect()
  }
}
