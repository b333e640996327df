use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::carve::{DeclaredTypePolicy, FirstColumnPolicy};
use crate::store::{DEFAULT_SEGMENT_SIZE, SEGMENT_ALIGNMENT};

/// Knobs for one recovery run.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
  /// Worker threads (default: available parallelism)
  pub threads: usize,
  /// Bytes per in-memory segment of the database file (default: 1 GiB)
  pub segment_size: usize,
  /// Shorter unexplained runs are not carved (default: 4)
  pub min_gap_len: usize,
  /// Carve deleted records out of gaps (default: true)
  pub carve: bool,
  /// Recover free-list pages before the rest of the file (default: true)
  pub scan_freelist: bool,
  pub wal_path: Option<PathBuf>,
  pub journal_path: Option<PathBuf>,
  /// Pick up `<db>-wal` and `<db>-journal` when no path was given (default: true)
  pub detect_companions: bool,
  pub first_column_policy: Arc<dyn FirstColumnPolicy>,
}

fn default_threads() -> usize {
  std::thread::available_parallelism().map_or(1, |n| n.get())
}

impl Default for RecoveryConfig {
  fn default() -> Self {
    Self {
      threads: default_threads(),
      segment_size: DEFAULT_SEGMENT_SIZE,
      min_gap_len: 4,
      carve: true,
      scan_freelist: true,
      wal_path: None,
      journal_path: None,
      detect_companions: true,
      first_column_policy: Arc::new(DeclaredTypePolicy),
    }
  }
}

impl RecoveryConfig {
  pub fn with_threads(mut self, threads: usize) -> Self {
    self.threads = threads.max(1);
    self
  }

  /// Rounded up to the mapping alignment.
  pub fn with_segment_size(mut self, segment_size: usize) -> Self {
    self.segment_size = segment_size.max(1).next_multiple_of(SEGMENT_ALIGNMENT);
    self
  }

  pub fn with_wal(mut self, path: impl Into<PathBuf>) -> Self {
    self.wal_path = Some(path.into());
    self
  }

  pub fn with_journal(mut self, path: impl Into<PathBuf>) -> Self {
    self.journal_path = Some(path.into());
    self
  }

  pub fn with_carving(mut self, carve: bool) -> Self {
    self.carve = carve;
    self
  }

  pub fn with_companion_detection(mut self, detect: bool) -> Self {
    self.detect_companions = detect;
    self
  }

  pub fn with_policy(mut self, policy: Arc<dyn FirstColumnPolicy>) -> Self {
    self.first_column_policy = policy;
    self
  }

  /// The WAL to read: the configured path, else a non-empty `<db>-wal` next to the database.
  pub fn resolve_wal(&self, db_path: &Path) -> Option<PathBuf> {
    self.resolve(self.wal_path.as_ref(), db_path, "-wal")
  }

  pub fn resolve_journal(&self, db_path: &Path) -> Option<PathBuf> {
    self.resolve(self.journal_path.as_ref(), db_path, "-journal")
  }

  fn resolve(&self, explicit: Option<&PathBuf>, db_path: &Path, suffix: &str) -> Option<PathBuf> {
    if let Some(path) = explicit {
      return Some(path.clone());
    }
    if !self.detect_companions {
      return None;
    }
    let mut companion = db_path.as_os_str().to_owned();
    companion.push(suffix);
    let companion = PathBuf::from(companion);
    let non_empty = fs::metadata(&companion).is_ok_and(|meta| meta.is_file() && meta.len() > 0);
    non_empty.then_some(companion)
  }
}
