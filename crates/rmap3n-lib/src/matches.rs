//! Query match accumulation and sorting
//!
//! During a query, the bucket of every looked-up feature is appended to a
//! flat location list. Each appended bucket is already sorted by
//! (target, window) by construction, so the list is a concatenation of
//! sorted runs whose boundaries are tracked in an offset vector. `sort`
//! merges those runs bottom-up into one globally sorted list, reusing a
//! scratch buffer across queries.

use crate::types::Location;

/// Accumulates per-feature location runs and merge-sorts them
#[derive(Debug, Default)]
pub struct MatchesSorter {
    locs: Vec<Location>,
    offsets: Vec<usize>,
    temp: Vec<Location>,
}

impl MatchesSorter {
    /// Create an empty sorter
    pub fn new() -> Self {
        Self {
            locs: Vec::new(),
            offsets: vec![0],
            temp: Vec::new(),
        }
    }

    /// Append one sorted run of locations
    pub fn append_run(&mut self, run: &[Location]) {
        if run.is_empty() {
            return;
        }
        self.locs.extend_from_slice(run);
        self.offsets.push(self.locs.len());
    }

    /// Reset for the next query; keeps buffer capacity
    pub fn clear(&mut self) {
        self.locs.clear();
        self.offsets.clear();
        self.offsets.push(0);
    }

    /// True if no locations were accumulated
    pub fn is_empty(&self) -> bool {
        self.locs.is_empty()
    }

    /// Number of accumulated locations
    pub fn len(&self) -> usize {
        self.locs.len()
    }

    /// The accumulated locations; sorted by (target, window) after [`sort`](Self::sort)
    pub fn locations(&self) -> &[Location] {
        &self.locs
    }

    /// Merge the accumulated runs into one sorted sequence.
    ///
    /// Iterative bottom-up merge over the offset-delimited runs; each pass
    /// merges pairs of adjacent run groups into the scratch buffer, then
    /// the buffers swap roles. Zero or one runs pass through untouched.
    pub fn sort(&mut self) {
        let num_runs = self.offsets.len() - 1;
        if num_runs < 2 {
            return;
        }
        self.temp.resize(self.locs.len(), Location::default());

        let mut width = 1;
        while width < num_runs {
            let mut i = 0;
            while i < num_runs {
                let begin = self.offsets[i];
                let mid = self.offsets[(i + width).min(num_runs)];
                let end = self.offsets[(i + 2 * width).min(num_runs)];
                merge_into(
                    &self.locs[begin..mid],
                    &self.locs[mid..end],
                    &mut self.temp[begin..end],
                );
                i += 2 * width;
            }
            std::mem::swap(&mut self.locs, &mut self.temp);
            width *= 2;
        }
    }
}

/// Merge two sorted slices into `out` (stable, left side first on ties)
fn merge_into(a: &[Location], b: &[Location], out: &mut [Location]) {
    debug_assert_eq!(a.len() + b.len(), out.len());
    let (mut i, mut j) = (0, 0);
    for slot in out.iter_mut() {
        *slot = if i < a.len() && (j >= b.len() || a[i] <= b[j]) {
            i += 1;
            a[i - 1]
        } else {
            j += 1;
            b[j - 1]
        };
    }
}
