use std::ops::Range;

/// Fixed-size set of bits, one per byte of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSet {
  words: Vec<u64>,
  len: usize,
}

impl BitSet {
  pub fn new(len: usize) -> Self {
    Self {
      words: vec![0; len.div_ceil(64)],
      len,
    }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn get(&self, index: usize) -> bool {
    index < self.len && self.words[index / 64] & (1 << (index % 64)) != 0
  }

  pub fn set(&mut self, index: usize) {
    if index < self.len {
      self.words[index / 64] |= 1 << (index % 64);
    }
  }

  pub fn set_range(&mut self, range: Range<usize>) {
    for index in range.start..range.end.min(self.len) {
      self.set(index);
    }
  }

  pub fn count_ones(&self) -> usize {
    self.words.iter().map(|word| word.count_ones() as usize).sum()
  }
}

/// A run of unvisited page bytes worth carving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
  pub from: usize,
  pub to: usize,
}

impl Gap {
  pub fn len(&self) -> usize {
    self.to - self.from
  }

  pub fn is_empty(&self) -> bool {
    self.to == self.from
  }
}

/// Which bytes of a page have been explained by a header, a cell or a carved record.
///
/// Bytes are only ever added; carving never revisits an explained byte.
#[derive(Debug, Clone)]
pub struct GapTracker {
  visited: BitSet,
}

impl GapTracker {
  pub fn new(page_len: usize) -> Self {
    Self {
      visited: BitSet::new(page_len),
    }
  }

  pub fn mark(&mut self, range: Range<usize>) {
    self.visited.set_range(range);
  }

  pub fn is_visited(&self, index: usize) -> bool {
    self.visited.get(index)
  }

  pub fn visited_count(&self) -> usize {
    self.visited.count_ones()
  }

  /// Maximal runs of visited bytes, ascending.
  pub fn visited_ranges(&self) -> Vec<Range<usize>> {
    self.runs(true)
  }

  pub fn unvisited_ranges(&self) -> Vec<Range<usize>> {
    self.runs(false)
  }

  fn runs(&self, visited: bool) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = None;
    for index in 0..self.visited.len() {
      match (self.visited.get(index) == visited, start) {
        (true, None) => start = Some(index),
        (false, Some(from)) => {
          runs.push(from..index);
          start = None;
        }
        _ => {}
      }
    }
    if let Some(from) = start {
      runs.push(from..self.visited.len());
    }
    runs
  }

  /// Unvisited runs of at least `min_len` bytes that hold something other than zeros.
  /// All-zero runs are marked visited on the way; runs that are too short are left alone.
  pub fn find_gaps(&mut self, data: &[u8], min_len: usize) -> Vec<Gap> {
    let mut gaps = Vec::new();
    for run in self.unvisited_ranges() {
      let end = run.end.min(data.len());
      if run.start >= end {
        continue;
      }
      if data[run.start..end].iter().all(|&b| b == 0) {
        self.mark(run);
        continue;
      }
      if end - run.start >= min_len {
        gaps.push(Gap {
          from: run.start,
          to: end,
        });
      }
    }
    gaps
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn zero_runs_become_visited() {
    let mut data = vec![0u8; 64];
    data[20..24].copy_from_slice(&[1, 2, 3, 4]);
    data[40] = 9;
    let mut tracker = GapTracker::new(64);
    tracker.mark(0..8);

    let gaps = tracker.find_gaps(&data, 4);
    assert_eq!(gaps, vec![Gap { from: 8, to: 64 }]);

    tracker.mark(20..24);
    let gaps = tracker.find_gaps(&data, 4);
    assert_eq!(gaps, vec![Gap { from: 24, to: 64 }]);
    assert_eq!(tracker.visited_ranges(), vec![0..24]);
  }

  #[test]
  fn short_runs_are_noise() {
    let data = [0, 0, 7, 0, 0, 0, 0, 0];
    let mut tracker = GapTracker::new(data.len());
    tracker.mark(0..2);
    tracker.mark(4..8);
    assert!(tracker.find_gaps(&data, 4).is_empty());
    assert!(!tracker.is_visited(2));
  }

  proptest! {
    #[test]
    fn gaps_never_overlap_visited_bytes(
      marks in proptest::collection::vec((0usize..256, 0usize..64), 0..12),
      data in proptest::collection::vec(any::<u8>(), 256),
    ) {
      let mut tracker = GapTracker::new(256);
      for (start, len) in marks {
        tracker.mark(start..start + len);
      }
      let before = tracker.visited_count();
      let gaps = tracker.find_gaps(&data, 4);
      prop_assert!(tracker.visited_count() >= before);

      let mut last_end = 0;
      for gap in &gaps {
        prop_assert!(gap.from >= last_end);
        prop_assert!(gap.len() >= 4);
        prop_assert!((gap.from..gap.to).all(|i| !tracker.is_visited(i)));
        last_end = gap.to;
      }
      let covered: usize = tracker.visited_ranges().iter().map(|r| r.len()).sum();
      prop_assert_eq!(covered, tracker.visited_count());
    }
  }
}
