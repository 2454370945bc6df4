//! Candidate filtering: hit thresholds, relative cutoff, coverage
//!
//! After generation, a query's candidate set is filtered in a fixed order:
//! absolute hit minimum, cutoff relative to the best candidate, coverage
//! threshold, and finally truncation to the configured maximum.

use crate::candidates::MatchCandidate;
use crate::types::{Location, TargetId};

/// Coverage normalization mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CoverageNorm {
    /// Use raw coverage fractions
    None,
    /// Divide by the maximum coverage across the query's candidates
    #[default]
    Max,
}

/// Coverage counting mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CoverageFill {
    /// Count only windows with a direct feature hit
    #[default]
    None,
    /// Count every window inside the candidate's range as covered
    Fill,
}

/// Classification thresholds for one query run
#[derive(Clone, Copy, Debug)]
pub struct ClassificationParams {
    /// Candidates with fewer hits are discarded
    pub hits_min: u64,
    /// Candidates with fewer hits relative to the top candidate are discarded
    pub hits_cutoff: f64,
    /// Candidates on targets with lower coverage are discarded
    pub cov_min: f64,
    /// Maximum number of candidates reported per query
    pub max_candidates: usize,
    /// Coverage normalization
    pub cov_norm: CoverageNorm,
    /// Coverage counting
    pub cov_fill: CoverageFill,
}

impl Default for ClassificationParams {
    fn default() -> Self {
        Self {
            hits_min: 1,
            hits_cutoff: 0.8,
            cov_min: 0.0,
            max_candidates: usize::MAX,
            cov_norm: CoverageNorm::default(),
            cov_fill: CoverageFill::default(),
        }
    }
}

impl ClassificationParams {
    /// Fold percentage-style inputs (values > 1) into fractions
    pub fn normalized(mut self) -> Self {
        if self.cov_min > 1.0 {
            self.cov_min *= 0.01;
        }
        if self.hits_cutoff > 1.0 {
            self.hits_cutoff *= 0.01;
        }
        self
    }
}

/// Number of distinct windows of `cand.tgt` inside `cand.pos` that carry a hit.
///
/// `locations` must be sorted by (target, window).
fn distinct_hit_windows(cand: &MatchCandidate, locations: &[Location]) -> u64 {
    let beg = locations.partition_point(|l| l.tgt < cand.tgt);
    let end = beg + locations[beg..].partition_point(|l| l.tgt == cand.tgt);
    let mut covered = 0u64;
    let mut last = None;
    for l in &locations[beg..end] {
        if l.win < cand.pos.beg || l.win > cand.pos.end {
            continue;
        }
        if last != Some(l.win) {
            covered += 1;
            last = Some(l.win);
        }
    }
    covered
}

/// Coverage of one candidate: hit (or filled) windows over target window count
fn coverage(
    cand: &MatchCandidate,
    locations: &[Location],
    target_windows: u64,
    fill: CoverageFill,
) -> f64 {
    if target_windows == 0 {
        return 0.0;
    }
    let covered = match fill {
        CoverageFill::None => distinct_hit_windows(cand, locations),
        CoverageFill::Fill => cand.pos.size() as u64,
    };
    covered as f64 / target_windows as f64
}

/// Filter a candidate list in place.
///
/// `locations` is the sorted match list the candidates were generated from;
/// `windows_of` returns the window count of a target.
pub fn filter_candidates(
    cands: &mut Vec<MatchCandidate>,
    locations: &[Location],
    windows_of: impl Fn(TargetId) -> u64,
    params: &ClassificationParams,
) {
    // 1. absolute hit threshold
    cands.retain(|c| c.hits >= params.hits_min);
    if cands.is_empty() {
        return;
    }

    // 2. cutoff relative to the top candidate
    if params.hits_cutoff > 0.0 {
        let top = cands.iter().map(|c| c.hits).max().unwrap_or(0);
        let threshold = params.hits_cutoff * top as f64;
        cands.retain(|c| c.hits as f64 >= threshold);
    }

    // 3. coverage threshold
    if params.cov_min > 0.0 {
        let mut covs: Vec<f64> = cands
            .iter()
            .map(|c| coverage(c, locations, windows_of(c.tgt), params.cov_fill))
            .collect();
        if params.cov_norm == CoverageNorm::Max {
            let max = covs.iter().cloned().fold(0.0f64, f64::max);
            if max > 0.0 {
                for c in &mut covs {
                    *c /= max;
                }
            }
        }
        let mut keep = covs.iter().map(|&c| c >= params.cov_min);
        cands.retain(|_| keep.next().unwrap());
    }

    // 4. cap the reported set
    if cands.len() > params.max_candidates {
        cands.sort_by(|a, b| b.hits.cmp(&a.hits));
        cands.truncate(params.max_candidates);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::WindowRange;

    fn cand(tgt: u32, hits: u64, beg: u32, end: u32) -> MatchCandidate {
        MatchCandidate {
            tgt,
            hits,
            pos: WindowRange::new(beg, end),
        }
    }

    fn loc(tgt: u32, win: u32) -> Location {
        Location::new(tgt, win)
    }

    #[test]
    fn test_hits_min() {
        let mut cands = vec![cand(0, 5, 0, 1), cand(1, 2, 0, 1), cand(2, 1, 0, 0)];
        let params = ClassificationParams {
            hits_min: 2,
            hits_cutoff: 0.0,
            ..Default::default()
        };
        filter_candidates(&mut cands, &[], |_| 10, &params);
        assert_eq!(cands.len(), 2);
        assert!(cands.iter().all(|c| c.hits >= 2));
    }

    #[test]
    fn test_cutoff_keeps_only_top_ties_at_one() {
        let mut cands = vec![cand(0, 9, 0, 1), cand(1, 9, 2, 3), cand(2, 8, 0, 1)];
        let params = ClassificationParams {
            hits_min: 0,
            hits_cutoff: 1.0,
            ..Default::default()
        };
        filter_candidates(&mut cands, &[], |_| 10, &params);
        assert_eq!(cands.len(), 2);
        assert!(cands.iter().all(|c| c.hits == 9));
    }

    #[test]
    fn test_relative_cutoff() {
        let mut cands = vec![cand(0, 10, 0, 1), cand(1, 8, 0, 1), cand(2, 7, 0, 1)];
        let params = ClassificationParams {
            hits_min: 0,
            hits_cutoff: 0.8,
            ..Default::default()
        };
        filter_candidates(&mut cands, &[], |_| 10, &params);
        // 8 >= 0.8 * 10 stays, 7 < 8.0 goes
        assert_eq!(cands.len(), 2);
    }

    #[test]
    fn test_coverage_distinct_windows() {
        // windows 2 and 3 hit (window 2 twice), range [2,4]
        let locations = [loc(0, 2), loc(0, 2), loc(0, 3), loc(0, 9), loc(1, 0)];
        let c = cand(0, 3, 2, 4);
        assert_eq!(distinct_hit_windows(&c, &locations), 2);
    }

    #[test]
    fn test_coverage_filtering_with_fill() {
        let locations = [loc(0, 2), loc(0, 4), loc(1, 0)];
        // fill counts the whole range: target 0 covers 3/10, target 1 covers 1/10
        let mut cands = vec![cand(0, 2, 2, 4), cand(1, 1, 0, 0)];
        let params = ClassificationParams {
            hits_min: 0,
            hits_cutoff: 0.0,
            cov_min: 0.5,
            cov_norm: CoverageNorm::Max,
            cov_fill: CoverageFill::Fill,
            ..Default::default()
        };
        filter_candidates(&mut cands, &locations, |_| 10, &params);
        // normalized: 1.0 and 1/3 -> only target 0 survives
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].tgt, 0);
    }

    #[test]
    fn test_coverage_without_norm() {
        let locations = [loc(0, 0), loc(0, 1), loc(1, 5)];
        let mut cands = vec![cand(0, 2, 0, 1), cand(1, 1, 5, 5)];
        let params = ClassificationParams {
            hits_min: 0,
            hits_cutoff: 0.0,
            cov_min: 0.3,
            cov_norm: CoverageNorm::None,
            cov_fill: CoverageFill::None,
            ..Default::default()
        };
        // target 0: 2/4 = 0.5 stays; target 1: 1/4 = 0.25 goes
        filter_candidates(&mut cands, &locations, |_| 4, &params);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].tgt, 0);
    }

    #[test]
    fn test_truncation() {
        let mut cands = vec![cand(0, 1, 0, 0), cand(1, 9, 0, 0), cand(2, 5, 0, 0)];
        let params = ClassificationParams {
            hits_min: 0,
            hits_cutoff: 0.0,
            max_candidates: 2,
            ..Default::default()
        };
        filter_candidates(&mut cands, &[], |_| 1, &params);
        let hits: Vec<u64> = cands.iter().map(|c| c.hits).collect();
        assert_eq!(hits, vec![9, 5]);
    }

    #[test]
    fn test_percentage_folding() {
        let params = ClassificationParams {
            cov_min: 30.0,
            hits_cutoff: 80.0,
            ..Default::default()
        }
        .normalized();
        assert!((params.cov_min - 0.3).abs() < 1e-9);
        assert!((params.hits_cutoff - 0.8).abs() < 1e-9);
    }
}
