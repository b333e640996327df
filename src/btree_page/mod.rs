pub mod cell;
pub mod freelist;
pub mod overflow;
pub mod page;
pub mod schema_layer;
pub mod walker;

use cell::Cell;
use page::Page;
use tracing::{debug, trace};

/// The one-byte flag at offset 0 of a b-tree page header.
///
/// Anything other than the four b-tree flags is an overflow page, a free-list page or a
/// page that was never written; recovery cannot tell those apart from the flag alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageType {
  OverflowOrUnassigned,
  IndexInterior,
  TableInterior,
  IndexLeaf,
  TableLeaf,
}

impl PageType {
  pub fn classify(first_byte: u8) -> Self {
    match first_byte {
      0x02 => PageType::IndexInterior,
      0x05 => PageType::TableInterior,
      0x0A => PageType::IndexLeaf,
      0x0D => PageType::TableLeaf,
      _ => PageType::OverflowOrUnassigned,
    }
  }

  pub fn is_btree(&self) -> bool {
    *self != PageType::OverflowOrUnassigned
  }

  pub fn is_leaf(&self) -> bool {
    matches!(self, PageType::IndexLeaf | PageType::TableLeaf)
  }

  pub fn is_interior(&self) -> bool {
    matches!(self, PageType::IndexInterior | PageType::TableInterior)
  }

  pub fn is_table(&self) -> bool {
    matches!(self, PageType::TableInterior | PageType::TableLeaf)
  }

  /// Interior pages carry the 4-byte right-most pointer.
  pub fn header_size(&self) -> usize {
    if self.is_interior() {
      12
    } else {
      8
    }
  }
}

/// The b-tree algorithm provides key/data storage with unique and ordered keys on page-oriented storage devices.
/// Two variants of b-trees are used by SQLite. "Table b-trees" use a 64-bit signed integer key and store all data in the leaves.
/// "Index b-trees" use arbitrary keys and store no data at all.
///
/// A b-tree page is divided into regions in the following order:
///   1. The 100-byte database file header (found on page 1 only)
///   2. The 8 or 12 byte b-tree page header
///   3. The cell pointer array
///   4. Unallocated space
///   5. The cell content area
///   6. The reserved region.
///
/// +------+----+-------------------------------------------------------------------------------------------+
/// |Offset|Size|Description                                                                                |
/// +------+----+-------------------------------------------------------------------------------------------|
/// |0     |1   |The b-tree page type flag (0x02, 0x05, 0x0a or 0x0d).                                      |
/// |1     |2   |Start of the first freeblock on the page, or zero if there are no freeblocks.              |
/// |3     |2   |The number of cells on the page.                                                           |
/// |5     |2   |Start of the cell content area. A zero value is interpreted as 65536.                      |
/// |7     |1   |The number of fragmented free bytes within the cell content area.                          |
/// |8     |4   |The right-most pointer. Interior b-tree pages only.                                        |
/// +------+----+-------------------------------------------------------------------------------------------+
///
/// Everything read from a page is untrusted: cell pointers that leave the page are dropped
/// and a cell count that would run the pointer array off the page is clamped.
#[derive(Debug, Clone)]
pub struct BTree {
  pub page: Page,
  pub header: Header,
  pub cell_pointers: Vec<usize>,
  pub cells: Vec<ParsedCell>,
}

/// A cell together with the byte range it occupies on its page.
#[derive(Debug, Clone)]
pub struct ParsedCell {
  pub offset: usize,
  pub end: usize,
  pub cell: Cell,
}

impl BTree {
  pub fn new(page: Page, usable_size: usize) -> Option<Self> {
    let header = Header::new(&page)?;
    let cell_pointers = header.cell_pointers(&page, usable_size);
    let mut cells = Vec::with_capacity(cell_pointers.len());
    for &offset in &cell_pointers {
      match Cell::parse(&page, header.page_type, offset, usable_size) {
        Ok((cell, end)) => cells.push(ParsedCell { offset, end, cell }),
        Err(e) => debug!(page = page.page_number, offset, error = %e, "skipping cell"),
      }
    }
    Some(Self {
      page,
      header,
      cell_pointers,
      cells,
    })
  }

  /// Child page numbers of an interior page: the right-most pointer first, then every
  /// cell's left child in pointer-array order.
  pub fn child_pages(&self) -> Vec<u32> {
    let mut children = Vec::with_capacity(self.cells.len() + 1);
    children.extend(self.header.right_most_pointer);
    children.extend(self.cells.iter().filter_map(|parsed| parsed.cell.left_child_page()));
    children
  }
}

#[derive(Debug, Clone, Copy)]
pub struct Header {
  pub page_type: PageType,
  /// Where the header starts within the page: 100 on page 1, 0 elsewhere.
  pub offset: usize,
  pub first_freeblock: u16,
  pub num_cells: u16,
  pub start_cell_content: u32,
  pub num_fragmented_free_bytes: u8,
  pub right_most_pointer: Option<u32>,
}

impl Header {
  pub fn new(page: &Page) -> Option<Self> {
    let offset = page.header_offset();
    let page_type = PageType::classify(page.read_u8(offset)?);
    if !page_type.is_btree() {
      return None;
    }
    let first_freeblock = page.read_u16(offset + 1)?;
    let mut num_cells = page.read_u16(offset + 3)?;
    let start_cell_content = match page.read_u16(offset + 5)? {
      0 => 65536,
      start => start as u32,
    };
    let num_fragmented_free_bytes = page.read_u8(offset + 7)?;
    let right_most_pointer = if page_type.is_interior() {
      Some(page.read_u32(offset + 8)?)
    } else {
      None
    };

    let array_start = offset + page_type.header_size();
    let max_cells = page.len().saturating_sub(array_start) / 2;
    if num_cells as usize > max_cells {
      debug!(
        page = page.page_number,
        num_cells, max_cells, "cell count runs off the page, clamping"
      );
      num_cells = max_cells as u16;
    }

    trace!(
      page = page.page_number,
      ?page_type,
      first_freeblock,
      num_cells,
      start_cell_content,
      num_fragmented_free_bytes,
      ?right_most_pointer,
      "page header"
    );

    Some(Self {
      page_type,
      offset,
      first_freeblock,
      num_cells,
      start_cell_content,
      num_fragmented_free_bytes,
      right_most_pointer,
    })
  }

  pub fn cell_pointer_array_start(&self) -> usize {
    self.offset + self.page_type.header_size()
  }

  pub fn cell_pointer_array_end(&self) -> usize {
    self.cell_pointer_array_start() + self.num_cells as usize * 2
  }

  /// Cell offsets that land inside the cell content region of the page.
  pub fn cell_pointers(&self, page: &Page, usable_size: usize) -> Vec<usize> {
    let array_end = self.cell_pointer_array_end();
    (0..self.num_cells as usize)
      .filter_map(|i| page.read_u16(self.cell_pointer_array_start() + i * 2))
      .map(|pointer| pointer as usize)
      .filter(|&pointer| {
        let inside = pointer >= array_end && pointer < usable_size.min(page.len());
        if !inside {
          debug!(page = page.page_number, pointer, "cell pointer outside the page");
        }
        inside
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use bytes::Bytes;

  fn leaf_page() -> Page {
    let mut data = vec![0u8; 512];
    data[0] = 0x0D;
    data[3..5].copy_from_slice(&2u16.to_be_bytes());
    data[5..7].copy_from_slice(&500u16.to_be_bytes());
    data[8..10].copy_from_slice(&506u16.to_be_bytes());
    data[10..12].copy_from_slice(&600u16.to_be_bytes());
    // payload 2, rowid 9, header [02][09] -> constant 1
    data[506..510].copy_from_slice(&[0x02, 0x09, 0x02, 0x09]);
    Page::new(Bytes::from(data), 2, 512)
  }

  #[test]
  fn classifies_page_types() {
    assert_eq!(PageType::classify(0x0D), PageType::TableLeaf);
    assert_eq!(PageType::classify(0x05), PageType::TableInterior);
    assert_eq!(PageType::classify(0x0A), PageType::IndexLeaf);
    assert_eq!(PageType::classify(0x02), PageType::IndexInterior);
    assert_eq!(PageType::classify(0x00), PageType::OverflowOrUnassigned);
    assert_eq!(PageType::classify(0x0E), PageType::OverflowOrUnassigned);
    assert_eq!(PageType::TableInterior.header_size(), 12);
    assert_eq!(PageType::IndexLeaf.header_size(), 8);
  }

  #[test]
  fn drops_pointers_outside_the_page() {
    let btree = BTree::new(leaf_page(), 512).unwrap();
    assert_eq!(btree.header.num_cells, 2);
    assert_eq!(btree.cell_pointers, vec![506]);
    assert_eq!(btree.cells.len(), 1);
    assert_eq!(btree.cells[0].end, 510);
  }

  #[test]
  fn clamps_impossible_cell_count() {
    let mut data = vec![0u8; 512];
    data[0] = 0x0D;
    data[3..5].copy_from_slice(&u16::MAX.to_be_bytes());
    let page = Page::new(Bytes::from(data), 3, 1024);
    let header = Header::new(&page).unwrap();
    assert_eq!(header.num_cells as usize, (512 - 8) / 2);
  }

  #[test]
  fn unassigned_page_has_no_header() {
    let page = Page::new(Bytes::from(vec![0u8; 512]), 4, 1536);
    assert!(Header::new(&page).is_none());
  }
}
