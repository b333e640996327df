use std::collections::HashSet;

use tracing::{debug, warn};

use crate::SQLite;

/// Payload bytes gathered from a linked list of overflow pages.
///
/// Each overflow page starts with the 4-byte number of the next page (0 ends the chain)
/// followed by `usable_size - 4` bytes of payload.
#[derive(Debug, Clone, Default)]
pub struct OverflowChain {
  pub pages: Vec<u32>,
  pub data: Vec<u8>,
  /// False when the chain ended, left the file or looped before `needed` bytes were read.
  pub complete: bool,
}

impl OverflowChain {
  pub fn read(db: &SQLite, first_page: u32, needed: usize) -> Self {
    let content_size = db.usable_size() - 4;
    let mut chain = OverflowChain::default();
    let mut seen = HashSet::new();
    let mut next = first_page;

    while chain.data.len() < needed && next != 0 {
      if !seen.insert(next) {
        warn!(
          page = next,
          first_page, "overflow chain revisits a page, possible tampering"
        );
        break;
      }
      let Some(page) = db.load_page(next) else {
        debug!(page = next, first_page, "overflow pointer outside the file");
        break;
      };
      let take = content_size.min(needed - chain.data.len());
      chain.data.extend_from_slice(&page.data[4..4 + take]);
      chain.pages.push(next);
      next = page.read_u32(0).unwrap_or(0);
    }

    chain.complete = chain.data.len() == needed;
    chain
  }
}
