use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use super::context::RecoveryContext;
use super::pool::WorkerPool;
use super::task::RecoveryTask;
use super::RecoveryReport;
use crate::btree_page::freelist::FreeList;
use crate::btree_page::walker::{BTreeWalker, PageMap};
use crate::config::RecoveryConfig;
use crate::error::Result;
use crate::journal::JournalReader;
use crate::schema::{discovery, Schema};
use crate::wal::WalReader;
use crate::SQLite;

/// One recovery run over a database file and its companions.
///
/// ```text
/// open db ─► open WAL / journal ─► discover schema ─► walk b-trees ─► walk free list
///        ─► batch 1: free-list pages ─► batch 2: every page not yet scanned
///        ─► WAL frames ─► journal records ─► report
/// ```
#[derive(Debug)]
pub struct Job {
  path: PathBuf,
  config: RecoveryConfig,
}

impl Job {
  pub fn new(path: &Path, config: RecoveryConfig) -> Self {
    Self {
      path: path.to_path_buf(),
      config,
    }
  }

  pub fn run(self) -> Result<RecoveryReport> {
    let db = SQLite::open_with_segment_size(&self.path, self.config.segment_size)?;
    info!(
      path = %self.path.display(),
      page_size = db.page_size(),
      pages = db.number_of_pages(),
      "database opened"
    );

    let wal = self.open_wal(&db);
    let journal = self.open_journal(&db);

    let rows = discovery::discover(&db, wal.as_ref());
    let schema = Schema::build(&rows);

    let mut pages = PageMap::new(db.number_of_pages());
    {
      let mut walker = BTreeWalker::new(&db, &mut pages);
      for (id, signature) in schema.signatures().iter().enumerate() {
        let claimed = walker.walk(signature.root_page, schema.role_for(id));
        info!(name = %signature.name, root = signature.root_page, pages = claimed, "b-tree walked");
      }
    }

    let freelist = if self.config.scan_freelist {
      FreeList::walk(&db)
    } else {
      FreeList::default()
    };
    let checkpoints = wal.as_ref().map(WalReader::checkpoints).unwrap_or_default();

    let ctx = Arc::new(RecoveryContext::new(db, schema, pages, freelist, self.config));
    let pool = WorkerPool::new(ctx.config.threads, Arc::clone(&ctx));

    info!(pages = ctx.freelist.len(), "scanning free-list pages");
    for &page in &ctx.freelist.trunks {
      pool.submit(RecoveryTask::freelist(page, true), &ctx);
    }
    for &page in &ctx.freelist.leaves {
      pool.submit(RecoveryTask::freelist(page, false), &ctx);
    }
    pool.wait();

    let remaining: Vec<u32> = (1..=ctx.db.number_of_pages())
      .filter(|&page| !ctx.is_scanned(page))
      .collect();
    info!(pages = remaining.len(), "scanning database pages");
    for page in remaining {
      pool.submit(RecoveryTask::database(page), &ctx);
    }
    pool.wait();

    if let Some(wal) = &wal {
      info!(frames = wal.frames().len(), "scanning WAL frames");
      for frame in wal.frames() {
        if let Some(page) = wal.page(frame) {
          pool.submit(RecoveryTask::wal(*frame, page), &ctx);
        }
      }
      pool.wait();
    }

    if let Some(journal) = &journal {
      let nonce = journal.header().nonce;
      info!(records = journal.records().len(), "scanning journal records");
      for record in journal.records() {
        if let Some(page) = journal.page(record) {
          pool.submit(RecoveryTask::journal(*record, nonce, page), &ctx);
        }
      }
      pool.wait();
    }
    drop(pool);

    let report = RecoveryReport {
      tables: ctx.results.snapshot(),
      wal_tables: ctx.wal_results.snapshot(),
      journal_tables: ctx.journal_results.snapshot(),
      page_roles: ctx.pages.roles().to_vec(),
      signatures: ctx.schema.signatures().iter().map(|s| s.name.clone()).collect(),
      checkpoints,
      freelist_pages: ctx.freelist.pages().collect(),
      stats: ctx.stats.snapshot(),
    };
    info!(
      rows = report.tables.values().map(Vec::len).sum::<usize>(),
      wal_rows = report.wal_tables.values().map(Vec::len).sum::<usize>(),
      journal_rows = report.journal_tables.values().map(Vec::len).sum::<usize>(),
      failed = report.stats.failed_tasks,
      "recovery finished"
    );
    Ok(report)
  }

  fn open_wal(&self, db: &SQLite) -> Option<WalReader> {
    let path = self.config.resolve_wal(&self.path)?;
    match WalReader::open(&path, db.page_size()) {
      Ok(wal) => {
        info!(path = %path.display(), frames = wal.frames().len(), "WAL opened");
        Some(wal)
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "ignoring unreadable WAL");
        None
      }
    }
  }

  fn open_journal(&self, db: &SQLite) -> Option<JournalReader> {
    let path = self.config.resolve_journal(&self.path)?;
    match JournalReader::open(&path, db.page_size()) {
      Ok(journal) => {
        info!(path = %path.display(), records = journal.records().len(), "journal opened");
        Some(journal)
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "ignoring unreadable journal");
        None
      }
    }
  }
}
