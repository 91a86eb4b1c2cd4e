//! Run-length-encoded free-id allocator for extra-file slots.

/// Tracks which slot ids of an extra file are in use, as a run-length
/// encoding of the boolean "used" sequence over the non-negative integers.
///
/// Runs alternate between used (positive) and free (negative) lengths,
/// starting implicitly used at id 0. Trailing free runs are never stored,
/// so an empty run list means no id is used. [`allocate`](Self::allocate)
/// always fills the smallest gap first, which keeps it O(1) amortized: it
/// only ever touches the first one or two runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunLengthIdAllocator {
    runs: Vec<i64>,
}

impl RunLengthIdAllocator {
    pub fn new() -> Self {
        Self { runs: Vec::new() }
    }

    /// Rebuilds an allocator from a persisted run list.
    pub fn from_runs(runs: Vec<i64>) -> Self {
        let mut alloc = Self { runs };
        alloc.trim_trailing_free();
        alloc
    }

    /// The run list for persistence: alternating used(+)/free(-) lengths.
    pub fn runs(&self) -> &[i64] {
        &self.runs
    }

    /// Returns the smallest free id and marks it used.
    pub fn allocate(&mut self) -> u64 {
        if self.runs.is_empty() {
            self.runs.push(1);
            return 0;
        }
        if self.runs[0] > 0 {
            // Head run is used: the smallest free id is right behind it.
            let id = self.runs[0] as u64;
            self.runs[0] += 1;
            if self.runs.len() > 1 {
                // Shrink the following free run; merge on exhaustion.
                self.runs[1] += 1;
                if self.runs[1] == 0 {
                    self.runs.remove(1);
                    if self.runs.len() > 1 {
                        let next_used = self.runs.remove(1);
                        self.runs[0] += next_used;
                    }
                }
            }
            id
        } else {
            // Head run is free: id 0 itself is free.
            self.runs[0] += 1;
            if self.runs[0] == 0 {
                self.runs.remove(0);
                if self.runs.is_empty() {
                    self.runs.push(1);
                } else {
                    self.runs[0] += 1;
                }
            } else {
                self.runs.insert(0, 1);
            }
            0
        }
    }

    /// Marks `id` free. Releasing an id beyond the tracked range or an id
    /// that is already free is a no-op.
    pub fn release(&mut self, id: u64) {
        let mut start = 0u64;
        for i in 0..self.runs.len() {
            let len = self.runs[i].unsigned_abs();
            let end = start + len;
            if id < end {
                if self.runs[i] < 0 {
                    return;
                }
                self.release_in_used_run(i, start, end, id);
                return;
            }
            start = end;
        }
    }

    fn release_in_used_run(&mut self, i: usize, start: u64, end: u64, id: u64) {
        if end - start == 1 {
            // Sole element of its run: the run disappears and its free
            // neighbors (if any) merge across it.
            let prev_free = i > 0;
            let next_free = i + 1 < self.runs.len();
            match (prev_free, next_free) {
                (true, true) => {
                    self.runs[i - 1] += self.runs[i + 1] - 1;
                    self.runs.drain(i..=i + 1);
                }
                (true, false) => {
                    // Last run: drop it and the now-trailing free run.
                    self.runs.truncate(i - 1);
                }
                (false, true) => {
                    self.runs[i + 1] -= 1;
                    self.runs.remove(0);
                }
                (false, false) => {
                    self.runs.clear();
                }
            }
        } else if id == start {
            // First element: shrink from the front.
            self.runs[i] -= 1;
            if i > 0 {
                self.runs[i - 1] -= 1;
            } else {
                self.runs.insert(0, -1);
            }
        } else if id == end - 1 {
            // Last element: shrink from the back.
            self.runs[i] -= 1;
            if i + 1 < self.runs.len() {
                self.runs[i + 1] -= 1;
            }
            // A freed id at the very end of the sequence is not stored.
        } else {
            // Mid-run: split into used / free(1) / used.
            let left = (id - start) as i64;
            let right = (end - 1 - id) as i64;
            self.runs[i] = left;
            self.runs.splice(i + 1..i + 1, [-1, right]);
        }
    }

    /// Number of used ids strictly before `id` (rank).
    ///
    /// Ids beyond the tracked range count every used id.
    pub fn rank(&self, id: u64) -> u64 {
        let mut start = 0u64;
        let mut used = 0u64;
        for &run in &self.runs {
            let len = run.unsigned_abs();
            let end = start + len;
            if id < end {
                if run > 0 {
                    used += id - start;
                }
                return used;
            }
            if run > 0 {
                used += len;
            }
            start = end;
        }
        used
    }

    /// The id of the (n+1)-th used id (select), or `None` if fewer than
    /// `n + 1` ids are used. Inverse of [`rank`](Self::rank).
    pub fn select(&self, n: u64) -> Option<u64> {
        let mut start = 0u64;
        let mut used = 0u64;
        for &run in &self.runs {
            let len = run.unsigned_abs();
            if run > 0 {
                if used + len > n {
                    return Some(start + (n - used));
                }
                used += len;
            }
            start += len;
        }
        None
    }

    pub fn is_used(&self, id: u64) -> bool {
        let mut start = 0u64;
        for &run in &self.runs {
            let end = start + run.unsigned_abs();
            if id < end {
                return run > 0;
            }
            start = end;
        }
        false
    }

    pub fn used_count(&self) -> u64 {
        self.runs.iter().filter(|&&r| r > 0).map(|&r| r as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.used_count() == 0
    }

    /// Compacts the allocator to a single used run of length
    /// [`used_count`](Self::used_count), discarding all holes.
    pub fn defragment(&mut self) {
        let used = self.used_count();
        self.runs.clear();
        if used > 0 {
            self.runs.push(used as i64);
        }
    }

    pub fn clear(&mut self) {
        self.runs.clear();
    }

    fn trim_trailing_free(&mut self) {
        while matches!(self.runs.last(), Some(&r) if r <= 0) {
            self.runs.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_sequentially_from_zero() {
        let mut alloc = RunLengthIdAllocator::new();
        for expected in 0..5u64 {
            assert_eq!(alloc.allocate(), expected);
        }
        assert_eq!(alloc.runs(), &[5]);
        assert_eq!(alloc.used_count(), 5);
    }

    #[test]
    fn release_and_reuse_smallest_gap() {
        let mut alloc = RunLengthIdAllocator::new();
        for _ in 0..6 {
            alloc.allocate();
        }
        alloc.release(4);
        alloc.release(2);
        // Smallest gap first, not most recently released.
        assert_eq!(alloc.allocate(), 2);
        assert_eq!(alloc.allocate(), 4);
        assert_eq!(alloc.allocate(), 6);
    }

    #[test]
    fn release_sole_element_merges_neighbors() {
        let mut alloc = RunLengthIdAllocator::new();
        for _ in 0..5 {
            alloc.allocate();
        }
        alloc.release(1);
        alloc.release(3);
        assert_eq!(alloc.runs(), &[1, -1, 1, -1, 1]);
        // Freeing id 2 merges the two free runs across it.
        alloc.release(2);
        assert_eq!(alloc.runs(), &[1, -3, 1]);
    }

    #[test]
    fn release_first_element_of_head_run() {
        let mut alloc = RunLengthIdAllocator::new();
        for _ in 0..4 {
            alloc.allocate();
        }
        alloc.release(0);
        assert_eq!(alloc.runs(), &[-1, 3]);
        assert!(!alloc.is_used(0));
        assert_eq!(alloc.allocate(), 0);
        assert_eq!(alloc.runs(), &[4]);
    }

    #[test]
    fn release_last_element_trims_trailing_free() {
        let mut alloc = RunLengthIdAllocator::new();
        for _ in 0..4 {
            alloc.allocate();
        }
        alloc.release(3);
        assert_eq!(alloc.runs(), &[3]);
    }

    #[test]
    fn release_mid_run_splits() {
        let mut alloc = RunLengthIdAllocator::new();
        for _ in 0..5 {
            alloc.allocate();
        }
        alloc.release(2);
        assert_eq!(alloc.runs(), &[2, -1, 2]);
        assert!(alloc.is_used(1));
        assert!(!alloc.is_used(2));
        assert!(alloc.is_used(3));
    }

    #[test]
    fn release_is_idempotent_and_range_checked() {
        let mut alloc = RunLengthIdAllocator::new();
        alloc.allocate();
        alloc.allocate();
        alloc.release(1);
        let snapshot = alloc.clone();
        alloc.release(1);
        alloc.release(99);
        assert_eq!(alloc, snapshot);
    }

    #[test]
    fn rank_and_select_are_inverse() {
        let mut alloc = RunLengthIdAllocator::new();
        for _ in 0..10 {
            alloc.allocate();
        }
        for id in [1, 4, 5, 8] {
            alloc.release(id);
        }
        // Used ids: 0, 2, 3, 6, 7, 9.
        let used: Vec<u64> = (0..10).filter(|&id| alloc.is_used(id)).collect();
        assert_eq!(used, vec![0, 2, 3, 6, 7, 9]);
        for (n, &id) in used.iter().enumerate() {
            assert_eq!(alloc.select(n as u64), Some(id));
            assert_eq!(alloc.rank(id), n as u64);
        }
        assert_eq!(alloc.select(used.len() as u64), None);
        assert_eq!(alloc.rank(100), used.len() as u64);
    }

    #[test]
    fn defragment_compacts_to_single_run() {
        let mut alloc = RunLengthIdAllocator::new();
        for _ in 0..8 {
            alloc.allocate();
        }
        alloc.release(1);
        alloc.release(5);
        alloc.release(6);
        assert_eq!(alloc.used_count(), 5);
        alloc.defragment();
        assert_eq!(alloc.runs(), &[5]);
        assert_eq!(alloc.used_count(), 5);
        assert_eq!(alloc.allocate(), 5);
    }

    #[test]
    fn from_runs_round_trip() {
        let mut alloc = RunLengthIdAllocator::new();
        for _ in 0..7 {
            alloc.allocate();
        }
        alloc.release(2);
        alloc.release(3);
        let restored = RunLengthIdAllocator::from_runs(alloc.runs().to_vec());
        assert_eq!(restored, alloc);
        assert_eq!(restored.used_count(), 5);
    }

    #[test]
    fn head_free_run_allocation_cases() {
        // [-2, 3]: free ids 0 and 1.
        let mut alloc = RunLengthIdAllocator::from_runs(vec![-2, 3]);
        assert_eq!(alloc.allocate(), 0);
        assert_eq!(alloc.runs(), &[1, -1, 3]);
        assert_eq!(alloc.allocate(), 1);
        assert_eq!(alloc.runs(), &[5]);
    }

    #[test]
    fn empty_allocator_reports_empty() {
        let mut alloc = RunLengthIdAllocator::new();
        assert!(alloc.is_empty());
        alloc.allocate();
        assert!(!alloc.is_empty());
        alloc.release(0);
        assert!(alloc.is_empty());
        assert_eq!(alloc.runs(), &[] as &[i64]);
    }
}
