//! Windowed bottom-m min-hash sketching with 3N conversion
//!
//! A sketcher slides fixed-length sampling windows over a sequence and maps
//! each window to a sketch: the `sketchlen` smallest distinct canonical
//! k-mer hashes of the (3N-converted) window. Sketches are a pure function
//! of the window bytes and the parameters.

use crate::constants::{
    DEFAULT_KMER_LEN, DEFAULT_SKETCH_LEN, DEFAULT_WINDOW_LEN, MAX_K,
};
use crate::dna::{for_each_canonical_kmer_hash, Conversion};
use crate::types::Feature;

/// A sketch: up to `sketchlen` ascending distinct feature hashes of one window
pub type Sketch = Vec<Feature>;

/// Parameters controlling sequence sketching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SketchingParams {
    /// Number of nucleotides per k-mer
    pub kmerlen: usize,

    /// Number of features (k-mer hashes) retained per sampling window
    pub sketchlen: usize,

    /// Number of letters in each sampling window
    pub winlen: usize,

    /// Distance between window starting positions
    pub winstride: usize,

    /// Nucleotide conversion applied before hashing
    pub conversion: Conversion,
}

impl Default for SketchingParams {
    fn default() -> Self {
        Self {
            kmerlen: DEFAULT_KMER_LEN,
            sketchlen: DEFAULT_SKETCH_LEN,
            winlen: DEFAULT_WINDOW_LEN,
            // default stride covers every k-mer exactly once
            winstride: DEFAULT_WINDOW_LEN - DEFAULT_KMER_LEN + 1,
            conversion: Conversion::default(),
        }
    }
}

impl SketchingParams {
    /// Validate the parameter combination
    pub fn validate(&self) -> Result<(), String> {
        if self.kmerlen < 1 || self.kmerlen > MAX_K {
            return Err(format!(
                "kmerlen must be in range [1, {}], got {}",
                MAX_K, self.kmerlen
            ));
        }
        if self.sketchlen < 1 {
            return Err("sketchlen must be at least 1".into());
        }
        if self.winlen < self.kmerlen {
            return Err(format!(
                "winlen must be at least kmerlen, got winlen={}, kmerlen={}",
                self.winlen, self.kmerlen
            ));
        }
        if self.winstride < 1 {
            return Err("winstride must be at least 1".into());
        }
        Ok(())
    }

    /// Log parameters via tracing
    pub fn print(&self) {
        tracing::info!("Sketching:");
        tracing::info!("  kmerlen   = {}", self.kmerlen);
        tracing::info!("  sketchlen = {}", self.sketchlen);
        tracing::info!("  winlen    = {}", self.winlen);
        tracing::info!("  winstride = {}", self.winstride);
        tracing::info!(
            "  conversion = {} -> {}",
            self.conversion.orig() as char,
            self.conversion.repl() as char
        );
    }
}

/// Maps sequence windows to sketches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sketcher {
    params: SketchingParams,
}

impl Sketcher {
    /// Create a sketcher from validated parameters
    pub fn new(params: SketchingParams) -> Self {
        Self { params }
    }

    /// The sketching parameters
    pub fn params(&self) -> &SketchingParams {
        &self.params
    }

    /// Number of sampling windows of a sequence of length `len`
    ///
    /// Windows start at `0, s, 2s, …`; a window is only emitted if it can
    /// contain at least one whole k-mer, so sequences shorter than `kmerlen`
    /// have no windows.
    pub fn num_windows(&self, len: usize) -> u64 {
        if len < self.params.kmerlen {
            0
        } else {
            (1 + (len - self.params.kmerlen) / self.params.winstride) as u64
        }
    }

    /// Sketch a single window
    ///
    /// Returns the `sketchlen` smallest distinct canonical k-mer hashes in
    /// ascending order. Windows without any valid k-mer yield an empty
    /// sketch.
    pub fn window_sketch(&self, window: &[u8]) -> Sketch {
        let mut hashes: Vec<Feature> = Vec::with_capacity(
            window.len().saturating_sub(self.params.kmerlen) + 1,
        );
        for_each_canonical_kmer_hash(window, self.params.kmerlen, self.params.conversion, |h| {
            hashes.push(h as Feature);
        });
        hashes.sort_unstable();
        hashes.dedup();
        hashes.truncate(self.params.sketchlen);
        hashes
    }

    /// Call `consume` with the sketch of every window of `seq`, in window order
    pub fn for_each_sketch(&self, seq: &[u8], mut consume: impl FnMut(Sketch)) {
        let k = self.params.kmerlen;
        let w = self.params.winlen;
        let s = self.params.winstride;
        if seq.len() < k {
            return;
        }
        let mut beg = 0usize;
        while beg + k <= seq.len() {
            let end = (beg + w).min(seq.len());
            consume(self.window_sketch(&seq[beg..end]));
            beg += s;
        }
    }
}

impl Default for Sketcher {
    fn default() -> Self {
        Self::new(SketchingParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> SketchingParams {
        SketchingParams {
            kmerlen: 4,
            sketchlen: 2,
            winlen: 8,
            winstride: 5,
            conversion: Conversion::new(b'C', b'T'),
        }
    }

    #[test]
    fn test_validate() {
        assert!(SketchingParams::default().validate().is_ok());
        assert!(small_params().validate().is_ok());

        let bad = SketchingParams { kmerlen: 0, ..small_params() };
        assert!(bad.validate().is_err());
        let bad = SketchingParams { winlen: 3, ..small_params() };
        assert!(bad.validate().is_err());
        let bad = SketchingParams { winstride: 0, ..small_params() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_num_windows() {
        let sk = Sketcher::new(small_params());
        assert_eq!(sk.num_windows(0), 0);
        assert_eq!(sk.num_windows(3), 0);
        assert_eq!(sk.num_windows(4), 1);
        assert_eq!(sk.num_windows(8), 1);
        assert_eq!(sk.num_windows(9), 2);
        assert_eq!(sk.num_windows(14), 3);
    }

    #[test]
    fn test_single_window_sequence() {
        // 8 letters, winlen 8, stride 5: exactly one window
        let sk = Sketcher::new(small_params());
        let mut sketches = Vec::new();
        sk.for_each_sketch(b"ACCGTACC", |s| sketches.push(s));
        assert_eq!(sketches.len(), 1);
        assert!(!sketches[0].is_empty());
        assert!(sketches[0].len() <= 2);
    }

    #[test]
    fn test_sketch_is_sorted_and_distinct() {
        let params = SketchingParams { sketchlen: 64, ..small_params() };
        let sk = Sketcher::new(params);
        let sketch = sk.window_sketch(b"ACGGATTACA");
        let mut sorted = sketch.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sketch, sorted);
    }

    #[test]
    fn test_sketch_determinism() {
        let sk = Sketcher::new(small_params());
        assert_eq!(sk.window_sketch(b"ACCGTACC"), sk.window_sketch(b"ACCGTACC"));
    }

    #[test]
    fn test_empty_input_yields_no_sketches() {
        let sk = Sketcher::new(small_params());
        let mut n = 0;
        sk.for_each_sketch(b"", |_| n += 1);
        assert_eq!(n, 0);
        sk.for_each_sketch(b"ACG", |_| n += 1);
        assert_eq!(n, 0);
    }

    #[test]
    fn test_all_invalid_window_yields_empty_sketch() {
        let sk = Sketcher::new(small_params());
        let mut sketches = Vec::new();
        sk.for_each_sketch(b"NNNNNNNN", |s| sketches.push(s));
        assert_eq!(sketches.len(), 1);
        assert!(sketches[0].is_empty());
    }

    #[test]
    fn test_window_count_matches_for_each() {
        let sk = Sketcher::new(small_params());
        let seq = b"ACGTACGTACGTACGTACGTAC"; // 22 letters
        let mut n = 0u64;
        sk.for_each_sketch(seq, |_| n += 1);
        assert_eq!(n, sk.num_windows(seq.len()));
    }
}
