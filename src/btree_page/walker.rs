use std::collections::HashSet;

use tracing::{debug, trace, warn};

use super::BTree;
use crate::SQLite;

/// Index into the list of schema signatures.
pub type SignatureId = usize;

/// Which schema object owns a page, as far as the b-tree walk could tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PageRole {
  #[default]
  Unknown,
  Table(SignatureId),
  Index(SignatureId),
}

impl PageRole {
  pub fn signature(&self) -> Option<SignatureId> {
    match self {
      PageRole::Unknown => None,
      PageRole::Table(id) | PageRole::Index(id) => Some(*id),
    }
  }
}

/// Page number to owner. Index 0 is unused so page numbers index directly.
#[derive(Debug, Clone)]
pub struct PageMap {
  roles: Vec<PageRole>,
}

impl PageMap {
  pub fn new(number_of_pages: u32) -> Self {
    Self {
      roles: vec![PageRole::Unknown; number_of_pages as usize + 1],
    }
  }

  pub fn get(&self, page_number: u32) -> PageRole {
    self
      .roles
      .get(page_number as usize)
      .copied()
      .unwrap_or_default()
  }

  /// Claims an unowned page. Returns the current owner when the page is already taken.
  pub fn assign(&mut self, page_number: u32, role: PageRole) -> Result<(), PageRole> {
    if page_number == 0 {
      return Err(PageRole::Unknown);
    }
    match self.roles.get_mut(page_number as usize) {
      Some(slot) if *slot == PageRole::Unknown => {
        *slot = role;
        Ok(())
      }
      Some(slot) => Err(*slot),
      None => Err(PageRole::Unknown),
    }
  }

  pub fn number_of_pages(&self) -> u32 {
    self.roles.len() as u32 - 1
  }

  /// Every role, indexed by page number.
  pub fn roles(&self) -> &[PageRole] {
    &self.roles
  }

  pub fn assigned(&self) -> impl Iterator<Item = (u32, PageRole)> + '_ {
    self
      .roles
      .iter()
      .enumerate()
      .skip(1)
      .filter(|(_, role)| **role != PageRole::Unknown)
      .map(|(page, role)| (page as u32, *role))
  }
}

const MAX_TREE_DEPTH: usize = 256;

/// Descends a b-tree from its root page, assigning every reachable page to one owner.
///
/// Pointers outside the file are dropped, a page already owned by another tree is never
/// re-assigned or descended into, and a pointer back into the current path stops that
/// branch. Walking the same root twice leaves the map unchanged.
pub struct BTreeWalker<'a> {
  db: &'a SQLite,
  pages: &'a mut PageMap,
  path: HashSet<u32>,
  max_depth: usize,
}

impl<'a> BTreeWalker<'a> {
  pub fn new(db: &'a SQLite, pages: &'a mut PageMap) -> Self {
    let max_depth = MAX_TREE_DEPTH.min(db.number_of_pages() as usize);
    Self {
      db,
      pages,
      path: HashSet::new(),
      max_depth,
    }
  }

  /// Returns the number of pages newly assigned to `role`.
  pub fn walk(&mut self, root: u32, role: PageRole) -> usize {
    self.path.clear();
    self.visit(root, role, 0)
  }

  fn visit(&mut self, page_number: u32, role: PageRole, depth: usize) -> usize {
    if page_number == 0 || page_number > self.db.number_of_pages() {
      debug!(page = page_number, ?role, "dropping b-tree pointer outside the file");
      return 0;
    }
    if depth >= self.max_depth {
      warn!(page = page_number, ?role, depth, "b-tree deeper than the file allows");
      return 0;
    }
    if !self.path.insert(page_number) {
      warn!(page = page_number, ?role, "b-tree pointer loops back, possible tampering");
      return 0;
    }
    let assigned = self.claim(page_number, role, depth);
    self.path.remove(&page_number);
    assigned
  }

  fn claim(&mut self, page_number: u32, role: PageRole, depth: usize) -> usize {
    let Some(page) = self.db.load_page(page_number) else {
      return 0;
    };
    let page_type = page.page_type();
    if !page_type.is_btree() {
      debug!(page = page_number, ?role, "pointer leads to a non b-tree page");
      return 0;
    }
    match self.pages.assign(page_number, role) {
      Ok(()) => {}
      Err(owner) if owner == role => return 0,
      Err(owner) => {
        warn!(page = page_number, ?role, ?owner, "page claimed by two b-trees");
        return 0;
      }
    }
    trace!(page = page_number, ?role, ?page_type, depth, "assigned page");

    let mut assigned = 1;
    if page_type.is_interior() {
      if let Some(btree) = BTree::new(page, self.db.usable_size()) {
        for child in btree.child_pages() {
          assigned += self.visit(child, role, depth + 1);
        }
      }
    }
    assigned
  }
}
