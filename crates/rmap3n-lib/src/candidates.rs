//! Contiguous-window match candidates
//!
//! Processes a sorted location list into per-target candidates: for every
//! target present in the matches, the contiguous window range (bounded in
//! length) with the highest hit count. Candidates are then kept either
//! exhaustively or as a ranked top-k set.

use crate::types::{Location, TargetId, WindowId, NULL_TARGET};

/// Inclusive window index range `[beg, end]`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowRange {
    /// First window of the range
    pub beg: WindowId,
    /// Last window of the range
    pub end: WindowId,
}

impl WindowRange {
    /// Create a range from first and last window
    pub const fn new(first: WindowId, last: WindowId) -> Self {
        Self { beg: first, end: last }
    }

    /// Number of windows in the range
    pub const fn size(&self) -> WindowId {
        self.end - self.beg + 1
    }
}

/// Hit count and window range on a candidate target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchCandidate {
    /// Target id
    pub tgt: TargetId,
    /// Number of feature-hit locations inside the window range
    pub hits: u64,
    /// Contiguous window range containing the hits
    pub pos: WindowRange,
}

impl Default for MatchCandidate {
    fn default() -> Self {
        Self {
            tgt: NULL_TARGET,
            hits: 0,
            pos: WindowRange::default(),
        }
    }
}

/// Candidate generation parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CandidateGenerationRules {
    /// Maximum length of a contiguous window range
    pub max_windows_in_range: WindowId,
    /// Maximum number of candidates to keep (top-k policy only)
    pub max_candidates: usize,
}

impl Default for CandidateGenerationRules {
    fn default() -> Self {
        Self {
            max_windows_in_range: 3,
            max_candidates: usize::MAX,
        }
    }
}

/// Produces all contiguous window ranges of matches that are at most
/// `num_windows` long; the best sub-range per target is handed to
/// `consume`, which returns whether enumeration should continue.
///
/// `matches` must be sorted by target (first) and window (second).
pub fn for_all_contiguous_window_ranges(
    matches: &[Location],
    num_windows: WindowId,
    mut consume: impl FnMut(MatchCandidate) -> bool,
) {
    let mut iter = matches.iter();
    let Some(first) = iter.next() else { return };

    // first entry in list
    let mut hits: u64 = 1;
    let mut cur_best = MatchCandidate {
        tgt: first.tgt,
        hits,
        pos: WindowRange::new(first.win, first.win),
    };
    let mut fst = 0usize;

    // rest of list: look for neighboring windows with the highest total
    // hit count, as long as the windows are in a contiguous range of the
    // same target
    for (offset, lst) in iter.enumerate() {
        let lst_idx = offset + 1;
        if lst.tgt == cur_best.tgt {
            // add the new hit on the right
            hits += 1;
            // subtract hits on the left that fall out of range
            while fst != lst_idx && lst.win - matches[fst].win >= num_windows {
                hits -= 1;
                fst += 1;
            }
            // track best of the local sub-ranges; first maximum wins
            if hits > cur_best.hits {
                cur_best.hits = hits;
                cur_best.pos.beg = matches[fst].win;
                cur_best.pos.end = lst.win;
            }
        } else {
            // end of current target
            if !consume(cur_best) {
                return;
            }
            fst = lst_idx;
            hits = 1;
            cur_best.tgt = lst.tgt;
            cur_best.hits = hits;
            cur_best.pos.beg = lst.win;
            cur_best.pos.end = lst.win;
        }
    }
    consume(cur_best);
}

/// Candidate retention policy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Keep a ranked list of the best candidates, capped at
    /// [`CandidateGenerationRules::max_candidates`]
    #[default]
    BestDistinctTopK,
    /// Keep every candidate, unsorted and uncapped
    DistinctAll,
}

/// Set of match candidates of one query
#[derive(Clone, Debug)]
pub struct Candidates {
    list: Vec<MatchCandidate>,
    policy: SelectionPolicy,
    rules: CandidateGenerationRules,
}

impl Candidates {
    /// Create an empty candidate set
    pub fn new(policy: SelectionPolicy, rules: CandidateGenerationRules) -> Self {
        Self {
            list: Vec::new(),
            policy,
            rules,
        }
    }

    /// Generate candidates from a location list sorted by (target, window)
    pub fn from_matches(
        matches: &[Location],
        policy: SelectionPolicy,
        rules: CandidateGenerationRules,
    ) -> Self {
        let mut cands = Self::new(policy, rules);
        for_all_contiguous_window_ranges(matches, rules.max_windows_in_range, |cand| {
            cands.insert(cand)
        });
        cands
    }

    /// Insert one candidate according to the retention policy.
    /// Always returns `true` (generation is never aborted by retention).
    pub fn insert(&mut self, cand: MatchCandidate) -> bool {
        match self.policy {
            SelectionPolicy::BestDistinctTopK => {
                // insertion point: after all candidates with at least as many
                // hits, so ties keep insertion order
                let i = self.list.partition_point(|c| c.hits >= cand.hits);
                if i != self.list.len() || self.list.len() < self.rules.max_candidates {
                    self.list.insert(i, cand);
                    self.list.truncate(self.rules.max_candidates);
                }
            }
            SelectionPolicy::DistinctAll => self.list.push(cand),
        }
        true
    }

    /// The retained candidates
    pub fn as_slice(&self) -> &[MatchCandidate] {
        &self.list
    }

    /// Mutable access for post-generation filtering
    pub fn as_mut_vec(&mut self) -> &mut Vec<MatchCandidate> {
        &mut self.list
    }

    /// Number of retained candidates
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// True if no candidates were retained
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Iterate over the retained candidates
    pub fn iter(&self) -> std::slice::Iter<'_, MatchCandidate> {
        self.list.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(tgt: u32, win: u32) -> Location {
        Location::new(tgt, win)
    }

    fn collect_candidates(matches: &[Location], w: WindowId) -> Vec<MatchCandidate> {
        let mut out = Vec::new();
        for_all_contiguous_window_ranges(matches, w, |c| {
            out.push(c);
            true
        });
        out
    }

    #[test]
    fn test_empty_matches() {
        assert!(collect_candidates(&[], 5).is_empty());
    }

    #[test]
    fn test_single_location() {
        let cands = collect_candidates(&[loc(3, 7)], 5);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].tgt, 3);
        assert_eq!(cands[0].hits, 1);
        assert_eq!(cands[0].pos, WindowRange::new(7, 7));
    }

    #[test]
    fn test_sliding_window_bound() {
        let matches = [loc(0, 5), loc(0, 7), loc(0, 9), loc(0, 20), loc(1, 3)];
        let cands = collect_candidates(&matches, 5);
        assert_eq!(cands.len(), 2);

        assert_eq!(cands[0].tgt, 0);
        assert_eq!(cands[0].hits, 3);
        assert_eq!(cands[0].pos, WindowRange::new(5, 9));

        assert_eq!(cands[1].tgt, 1);
        assert_eq!(cands[1].hits, 1);
        assert_eq!(cands[1].pos, WindowRange::new(3, 3));
    }

    #[test]
    fn test_one_candidate_per_target() {
        let matches = [
            loc(0, 0),
            loc(0, 1),
            loc(1, 4),
            loc(2, 2),
            loc(2, 3),
            loc(2, 9),
        ];
        let cands = collect_candidates(&matches, 3);
        let tgts: Vec<u32> = cands.iter().map(|c| c.tgt).collect();
        assert_eq!(tgts, vec![0, 1, 2]);
        for c in &cands {
            assert!(c.pos.end - c.pos.beg < 3);
        }
    }

    #[test]
    fn test_window_bound_one_counts_duplicates() {
        // duplicate features in the same window
        let matches = [loc(0, 2), loc(0, 2), loc(0, 2), loc(0, 3)];
        let cands = collect_candidates(&matches, 1);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].hits, 3);
        assert_eq!(cands[0].pos, WindowRange::new(2, 2));
    }

    #[test]
    fn test_first_maximum_wins_ties() {
        // two sub-ranges with 2 hits each; the earlier one must be reported
        let matches = [loc(0, 0), loc(0, 1), loc(0, 10), loc(0, 11)];
        let cands = collect_candidates(&matches, 3);
        assert_eq!(cands[0].hits, 2);
        assert_eq!(cands[0].pos, WindowRange::new(0, 1));
    }

    #[test]
    fn test_consumer_can_abort() {
        let matches = [loc(0, 0), loc(1, 0), loc(2, 0)];
        let mut seen = 0;
        for_all_contiguous_window_ranges(&matches, 3, |_| {
            seen += 1;
            false
        });
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_top_k_insert_order_among_ties() {
        let rules = CandidateGenerationRules {
            max_candidates: 2,
            ..Default::default()
        };
        let mut cands = Candidates::new(SelectionPolicy::BestDistinctTopK, rules);
        for (tgt, hits) in [(0, 5u64), (1, 9), (2, 7), (3, 9), (4, 2)] {
            cands.insert(MatchCandidate {
                tgt,
                hits,
                pos: WindowRange::default(),
            });
        }
        let hits: Vec<u64> = cands.iter().map(|c| c.hits).collect();
        assert_eq!(hits, vec![9, 9]);
        // among equal hit counts the earlier insertion ranks first
        let tgts: Vec<u32> = cands.iter().map(|c| c.tgt).collect();
        assert_eq!(tgts, vec![1, 3]);
    }

    #[test]
    fn test_distinct_all_keeps_everything() {
        let mut cands =
            Candidates::new(SelectionPolicy::DistinctAll, CandidateGenerationRules::default());
        for hits in [5u64, 1, 9] {
            cands.insert(MatchCandidate {
                tgt: 0,
                hits,
                pos: WindowRange::default(),
            });
        }
        let hits: Vec<u64> = cands.iter().map(|c| c.hits).collect();
        assert_eq!(hits, vec![5, 1, 9]);
    }
}
