use std::collections::HashSet;

use tracing::{debug, warn};

use crate::SQLite;

/// Pages no longer referenced by any b-tree.
///
/// A trunk page holds the next trunk page number, a leaf count, then that many leaf page
/// numbers. Leaf pages keep whatever they held before being freed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeList {
  pub trunks: Vec<u32>,
  pub leaves: Vec<u32>,
}

impl FreeList {
  pub fn walk(db: &SQLite) -> Self {
    let mut list = FreeList::default();
    let mut seen = HashSet::new();
    let max_leaves = db.usable_size() / 4 - 2;
    let mut next = db.header().first_freelist_trunk_page;

    while next != 0 {
      if !seen.insert(next) {
        warn!(
          page = next,
          "free-list trunk chain revisits a page, possible tampering"
        );
        break;
      }
      let Some(trunk) = db.load_page(next) else {
        warn!(page = next, "free-list trunk pointer outside the file");
        break;
      };
      list.trunks.push(next);

      let mut count = trunk.read_u32(4).unwrap_or(0) as usize;
      if count > max_leaves {
        warn!(page = next, count, max_leaves, "free-list trunk claims too many leaves");
        count = max_leaves;
      }
      for i in 0..count {
        let Some(leaf) = trunk.read_u32(8 + i * 4) else {
          break;
        };
        if leaf == 0 || leaf > db.number_of_pages() {
          debug!(trunk = next, leaf, "free-list leaf outside the file");
          continue;
        }
        if !seen.insert(leaf) {
          warn!(trunk = next, leaf, "free-list lists a page twice, possible tampering");
          continue;
        }
        list.leaves.push(leaf);
      }
      next = trunk.read_u32(0).unwrap_or(0);
    }

    if list.len() as u32 != db.header().total_freelist_pages {
      debug!(
        found = list.len(),
        declared = db.header().total_freelist_pages,
        "free-list size differs from the header"
      );
    }
    list
  }

  pub fn len(&self) -> usize {
    self.trunks.len() + self.leaves.len()
  }

  pub fn is_empty(&self) -> bool {
    self.trunks.is_empty() && self.leaves.is_empty()
  }

  pub fn is_trunk(&self, page_number: u32) -> bool {
    self.trunks.contains(&page_number)
  }

  /// Trunks first, then leaves, in chain order.
  pub fn pages(&self) -> impl Iterator<Item = u32> + '_ {
    self.trunks.iter().chain(&self.leaves).copied()
  }
}
