use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use super::context::RecoveryContext;
use super::task::RecoveryTask;

/// Outstanding task count with a condition to wait on.
#[derive(Default)]
struct Pending {
  count: AtomicUsize,
  lock: Mutex<()>,
  idle: Condvar,
}

impl Pending {
  fn add(&self) {
    self.count.fetch_add(1, Ordering::AcqRel);
  }

  fn done(&self) {
    if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
      let _guard = self.lock.lock();
      self.idle.notify_all();
    }
  }

  fn wait(&self) {
    let mut guard = self.lock.lock();
    while self.count.load(Ordering::Acquire) > 0 {
      self.idle.wait(&mut guard);
    }
  }
}

/// Decrements the pending count even when the task panics.
struct DoneGuard<'a>(&'a Pending);

impl Drop for DoneGuard<'_> {
  fn drop(&mut self) {
    self.0.done();
  }
}

/// Fixed set of worker threads, each draining its own FIFO queue.
///
/// A task goes to worker `page_number % workers`, so every image of one page is processed by
/// the same thread in submission order.
pub struct WorkerPool {
  senders: Vec<Sender<RecoveryTask>>,
  workers: Vec<JoinHandle<()>>,
  pending: Arc<Pending>,
}

impl WorkerPool {
  pub fn new(threads: usize, ctx: Arc<RecoveryContext>) -> Self {
    let threads = threads.max(1);
    let pending = Arc::new(Pending::default());
    let mut senders = Vec::with_capacity(threads);
    let mut workers = Vec::with_capacity(threads);

    for id in 0..threads {
      let (sender, receiver) = mpsc::channel::<RecoveryTask>();
      let ctx = Arc::clone(&ctx);
      let pending = Arc::clone(&pending);
      let handle = thread::Builder::new()
        .name(format!("recovery-{id}"))
        .spawn(move || {
          for task in receiver {
            let _done = DoneGuard(&pending);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run(&ctx)));
            if outcome.is_err() {
              error!(worker = id, page = task.page_number, "recovery task panicked");
              ctx.stats.task_failed();
            }
          }
          debug!(worker = id, "worker finished");
        });
      match handle {
        Ok(handle) => {
          senders.push(sender);
          workers.push(handle);
        }
        Err(e) => error!(worker = id, error = %e, "could not spawn worker"),
      }
    }

    Self {
      senders,
      workers,
      pending,
    }
  }

  pub fn workers(&self) -> usize {
    self.senders.len()
  }

  /// Queues a task on the worker that owns its page. With no live worker the task runs inline.
  pub fn submit(&self, task: RecoveryTask, ctx: &RecoveryContext) {
    if self.senders.is_empty() {
      task.run(ctx);
      return;
    }
    let worker = task.page_number as usize % self.senders.len();
    self.pending.add();
    if let Err(mpsc::SendError(task)) = self.senders[worker].send(task) {
      self.pending.done();
      error!(worker, page = task.page_number, "worker gone, dropping task");
      ctx.stats.task_failed();
    }
  }

  /// Blocks until every submitted task has finished.
  pub fn wait(&self) {
    self.pending.wait();
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    self.senders.clear();
    for worker in self.workers.drain(..) {
      if worker.join().is_err() {
        error!("worker thread panicked outside a task");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::btree_page::freelist::FreeList;
  use crate::btree_page::walker::PageMap;
  use crate::config::RecoveryConfig;
  use crate::fixtures;
  use crate::schema::Schema;

  fn context(pages: u32) -> Arc<RecoveryContext> {
    let db = fixtures::open(fixtures::empty_db(pages));
    let map = PageMap::new(db.number_of_pages());
    Arc::new(RecoveryContext::new(
      db,
      Schema::default(),
      map,
      FreeList::default(),
      RecoveryConfig::default(),
    ))
  }

  #[test]
  fn wait_returns_after_every_task_ran() {
    let ctx = context(8);
    let pool = WorkerPool::new(3, Arc::clone(&ctx));
    for page in 1..=8 {
      pool.submit(RecoveryTask::database(page), &ctx);
    }
    pool.wait();
    assert_eq!(ctx.stats.snapshot().pages_scanned, 8);
    assert!((1..=8).all(|page| ctx.is_scanned(page)));
  }

  #[test]
  fn tasks_outside_the_file_still_complete() {
    let ctx = context(2);
    let pool = WorkerPool::new(2, Arc::clone(&ctx));
    pool.submit(RecoveryTask::database(40), &ctx);
    pool.wait();
    assert_eq!(ctx.stats.snapshot().pages_scanned, 0);
    assert_eq!(ctx.stats.snapshot().failed_tasks, 0);
  }
}
