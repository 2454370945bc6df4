//! The sketch database: feature store plus target registry
//!
//! Maps features (min-hash values of reference sequence windows) to
//! locations (window within a target). Targets are added through a
//! pipelined background inserter; once sealed, the database is read-only
//! and safe to query from many threads.
//!
//! Terminology:
//! - target:   reference sequence whose sketches are stored in the DB
//! - query:    sequence (usually short reads) matched against the targets
//! - location: (window id, target id) = "window within a target sequence"
//! - feature:  single hash value of a sketch

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::error::DatabaseError;
use crate::hash_multimap::HashMultimap;
use crate::inserter::{BatchProcessingOptions, SketchInserter, WindowSketch};
use crate::matches::MatchesSorter;
use crate::sketcher::Sketcher;
use crate::types::{TargetId, NULL_TARGET};

/// How much of a database file to load
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Everything needed to run queries
    Sketches,
    /// Target metadata only; skip the feature table
    MetadataOnly,
    /// Sketches plus target sequences re-read from their source files
    Everything,
}

/// Origin of a target sequence
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileSource {
    /// Path of the sequence file
    pub filename: String,
    /// Record index within the file
    pub index: u64,
    /// Number of sampling windows the target produced
    pub windows: u64,
}

/// Reference sequence metadata
#[derive(Clone, Debug, Default)]
pub struct Target {
    name: String,
    source: FileSource,
    // only populated in reread mode
    header: Option<String>,
    seq: Option<Vec<u8>>,
}

impl Target {
    /// The target's registered name (usually its accession)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the sequence came from
    pub fn source(&self) -> &FileSource {
        &self.source
    }

    /// Full header line, if re-read from source
    pub fn header(&self) -> Option<&str> {
        self.header.as_deref()
    }

    /// Sequence data, if re-read from source
    pub fn seq(&self) -> Option<&[u8]> {
        self.seq.as_deref()
    }

    pub(crate) fn from_parts(name: String, source: FileSource) -> Self {
        Self {
            name,
            source,
            header: None,
            seq: None,
        }
    }

    pub(crate) fn set_sequence(&mut self, header: String, seq: Vec<u8>) {
        self.header = Some(header);
        self.seq = Some(seq);
    }
}

/// Summary statistics of the feature-store location lists
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LocationListStatistics {
    /// Number of non-empty buckets
    pub count: u64,
    /// Total number of locations
    pub sum: u64,
    /// Largest bucket
    pub max: u64,
}

impl LocationListStatistics {
    /// Mean bucket size
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }
}

/// Min-hash sketch database over a set of reference sequences
pub struct Database {
    target_sketcher: Sketcher,
    query_sketcher: Sketcher,
    max_locs_per_feature: usize,
    features: HashMultimap,
    targets: Vec<Target>,
    name2tax: BTreeMap<String, TargetId>,
    inserter: Option<SketchInserter>,
}

impl Database {
    /// Create an empty database sketching targets and queries identically
    pub fn new(sketcher: Sketcher) -> Self {
        Self::with_sketchers(sketcher, sketcher)
    }

    /// Create an empty database with separate target and query sketchers
    pub fn with_sketchers(target_sketcher: Sketcher, query_sketcher: Sketcher) -> Self {
        Self {
            target_sketcher,
            query_sketcher,
            max_locs_per_feature: Self::max_supported_locations_per_feature(),
            features: HashMultimap::new(),
            targets: Vec::new(),
            name2tax: BTreeMap::new(),
            inserter: None,
        }
    }

    /// Sketcher applied to reference sequences
    pub fn target_sketcher(&self) -> &Sketcher {
        &self.target_sketcher
    }

    /// Sketcher applied to query sequences
    pub fn query_sketcher(&self) -> &Sketcher {
        &self.query_sketcher
    }

    /// Replace the query sketcher (e.g. with CLI overrides)
    pub fn set_query_sketcher(&mut self, sketcher: Sketcher) {
        self.query_sketcher = sketcher;
    }

    /// Largest location count a bucket can hold
    pub fn max_supported_locations_per_feature() -> usize {
        HashMultimap::max_bucket_size() - 1
    }

    /// Current per-feature location cap
    pub fn max_locations_per_feature(&self) -> usize {
        self.max_locs_per_feature
    }

    /// Tighten the per-feature location cap, pruning existing buckets.
    ///
    /// Returns the number of features whose bucket was shrunk.
    pub fn set_max_locations_per_feature(&mut self, n: usize) -> Result<usize, DatabaseError> {
        self.wait_until_add_target_complete()?;
        let n = n.clamp(1, Self::max_supported_locations_per_feature());
        let mut affected = 0;
        if n < self.max_locs_per_feature {
            for handle in self.features.bucket_handles() {
                if self.features.bucket_size(handle) > n {
                    self.features.shrink(handle, n);
                    affected += 1;
                }
            }
        }
        self.max_locs_per_feature = n;
        Ok(affected)
    }

    /// Erase all features with more than `n` locations.
    ///
    /// Returns the number of erased features.
    pub fn remove_features_with_more_locations_than(
        &mut self,
        n: usize,
    ) -> Result<usize, DatabaseError> {
        self.wait_until_add_target_complete()?;
        let mut removed = 0;
        for handle in self.features.bucket_handles() {
            if self.features.bucket_size(handle) > n {
                self.features.erase(handle);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Erase all features that reached the per-feature location cap
    pub fn remove_overpopulated_features(&mut self) -> Result<usize, DatabaseError> {
        self.remove_features_with_more_locations_than(self.max_locs_per_feature.saturating_sub(1))
    }

    /// Erase all features that occur in more than `max_ambig` different
    /// targets. Returns the number of erased features.
    pub fn remove_ambiguous_features(&mut self, max_ambig: usize) -> Result<usize, DatabaseError> {
        self.wait_until_add_target_complete()?;
        let mut removed = 0;
        for handle in self.features.bucket_handles() {
            // locations are sorted by target, so distinct targets form runs
            let mut distinct = 0usize;
            let mut prev: Option<TargetId> = None;
            for l in self.features.bucket_values(handle) {
                if prev != Some(l.tgt) {
                    distinct += 1;
                    prev = Some(l.tgt);
                }
            }
            if distinct > max_ambig {
                self.features.erase(handle);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Add a reference sequence under `name`.
    ///
    /// Sketches every window of `seq` and queues the features for
    /// insertion; `source.windows` is replaced by the actual window count.
    pub fn add_target(
        &mut self,
        seq: &[u8],
        name: String,
        mut source: FileSource,
    ) -> Result<(), DatabaseError> {
        if self.targets.len() as u64 >= Self::max_target_count() {
            return Err(DatabaseError::TargetLimitExceeded);
        }
        if let Some(inserter) = &self.inserter {
            if !inserter.valid() {
                return Err(DatabaseError::InserterFailed);
            }
        }
        let tgt = self.targets.len() as TargetId;

        if self.inserter.is_none() {
            let store = std::mem::take(&mut self.features);
            self.inserter = Some(SketchInserter::spawn(
                store,
                self.max_locs_per_feature,
                BatchProcessingOptions::default(),
            ));
        }
        let sketcher = self.target_sketcher;
        let inserter = self.inserter.as_mut().expect("inserter just created");

        let mut win = 0u32;
        let mut submit_err = None;
        sketcher.for_each_sketch(seq, |sk| {
            if submit_err.is_none() {
                if let Err(e) = inserter.submit(WindowSketch { tgt, win, sk }) {
                    submit_err = Some(e);
                }
            }
            win += 1;
        });
        if let Some(e) = submit_err {
            return Err(e);
        }

        source.windows = win as u64;
        self.name2tax.entry(name.clone()).or_insert(tgt);
        self.targets.push(Target::from_parts(name, source));
        Ok(())
    }

    /// True if the background inserter died
    pub fn add_target_failed(&self) -> bool {
        matches!(&self.inserter, Some(i) if !i.valid())
    }

    /// Drain the insertion pipeline and join the worker.
    ///
    /// Must be called (or the database dropped) before querying or
    /// serializing; all read-side operations assume a sealed database.
    pub fn wait_until_add_target_complete(&mut self) -> Result<(), DatabaseError> {
        if let Some(inserter) = self.inserter.take() {
            self.features = inserter.finish()?;
        }
        Ok(())
    }

    /// Number of registered targets
    pub fn target_count(&self) -> u64 {
        self.targets.len() as u64
    }

    /// Largest number of targets a database can hold; the id above the
    /// last usable one is the null sentinel
    pub const fn max_target_count() -> u64 {
        TargetId::MAX as u64 - 1
    }

    /// Metadata of one target
    pub fn get_target(&self, id: TargetId) -> Option<&Target> {
        self.targets.get(id as usize)
    }

    /// All targets in id order
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub(crate) fn push_target_record(&mut self, target: Target) {
        let tgt = self.targets.len() as TargetId;
        self.name2tax.entry(target.name().to_string()).or_insert(tgt);
        self.targets.push(target);
    }

    /// Number of windows of one target
    pub fn target_window_count(&self, id: TargetId) -> u64 {
        self.targets
            .get(id as usize)
            .map(|t| t.source.windows)
            .unwrap_or(0)
    }

    /// Find a target by exact name; [`NULL_TARGET`] if absent
    pub fn target_with_name(&self, name: &str) -> TargetId {
        if name.is_empty() {
            return NULL_TARGET;
        }
        self.name2tax.get(name).copied().unwrap_or(NULL_TARGET)
    }

    /// Find a target whose name extends `name` (e.g. a versioned accession
    /// such as `NC_000001.11` for the query `NC_000001`).
    ///
    /// Returns the lexicographically smallest strictly greater name with
    /// `name` as a prefix; [`NULL_TARGET`] if none exists.
    pub fn target_with_similar_name(&self, name: &str) -> TargetId {
        if name.is_empty() {
            return NULL_TARGET;
        }
        match self
            .name2tax
            .range::<str, _>((Bound::Excluded(name), Bound::Unbounded))
            .next()
        {
            Some((key, &id)) if key.starts_with(name) => id,
            _ => NULL_TARGET,
        }
    }

    /// Look up every feature of every query sketch and append the matching
    /// location runs to `res`.
    pub fn accumulate_matches(&self, query: &[u8], res: &mut MatchesSorter) {
        self.query_sketcher.for_each_sketch(query, |sk| {
            for f in sk {
                if let Some(bucket) = self.features.find(f) {
                    res.append_run(self.features.bucket_values(bucket));
                }
            }
        });
    }

    /// Set the feature table's maximum load factor
    pub fn set_max_load_factor(&mut self, f: f32) -> Result<(), DatabaseError> {
        self.wait_until_add_target_complete()?;
        self.features.set_max_load_factor(f);
        Ok(())
    }

    /// The feature table's maximum load factor
    pub fn max_load_factor(&self) -> f32 {
        self.features.max_load_factor()
    }

    /// Number of hash table slots
    pub fn bucket_count(&self) -> u64 {
        self.features.bucket_count() as u64
    }

    /// Number of distinct features
    pub fn feature_count(&self) -> u64 {
        self.features.key_count() as u64
    }

    /// Features whose bucket was emptied by pruning
    pub fn dead_feature_count(&self) -> u64 {
        (self.features.key_count() - self.features.non_empty_bucket_count()) as u64
    }

    /// Total number of stored locations
    pub fn location_count(&self) -> u64 {
        self.features.value_count()
    }

    /// Size statistics over all non-empty location lists
    pub fn location_list_size_statistics(&self) -> LocationListStatistics {
        let mut stats = LocationListStatistics::default();
        for (_, locs) in self.features.buckets() {
            stats.count += 1;
            stats.sum += locs.len() as u64;
            stats.max = stats.max.max(locs.len() as u64);
        }
        stats
    }

    /// Write `feature -> (target, window)...` lines to `out`
    pub fn print_feature_map(&self, out: &mut impl std::io::Write) -> std::io::Result<()> {
        for (key, locs) in self.features.buckets() {
            write!(out, "{key} -> ")?;
            for l in locs {
                write!(out, "({},{})", l.tgt, l.win)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Write `feature -> location count` lines to `out`
    pub fn print_feature_counts(&self, out: &mut impl std::io::Write) -> std::io::Result<()> {
        for (key, locs) in self.features.buckets() {
            writeln!(out, "{key} -> {}", locs.len())?;
        }
        Ok(())
    }

    /// Drop all contents and release feature-store memory
    pub fn clear(&mut self) -> Result<(), DatabaseError> {
        self.wait_until_add_target_complete()?;
        self.features.clear();
        self.targets.clear();
        self.name2tax.clear();
        Ok(())
    }

    /// Drop all contents but keep feature-store memory for reuse
    pub fn clear_without_deallocation(&mut self) -> Result<(), DatabaseError> {
        self.wait_until_add_target_complete()?;
        self.features.clear_without_deallocation();
        self.targets.clear();
        self.name2tax.clear();
        Ok(())
    }

    /// Re-read header and sequence data of every target from its source
    /// file. Each referenced file is opened once and streamed in record
    /// order; records no target points at are skipped.
    pub fn reread_targets<R, F>(&mut self, mut open: F) -> anyhow::Result<()>
    where
        R: crate::reader::SequenceReader,
        F: FnMut(&str) -> anyhow::Result<R>,
    {
        use std::collections::HashMap;

        let mut catalogues: HashMap<String, HashMap<u64, TargetId>> = HashMap::new();
        for (tgt, t) in self.targets.iter().enumerate() {
            catalogues
                .entry(t.source().filename.clone())
                .or_default()
                .insert(t.source().index, tgt as TargetId);
        }
        for (filename, wanted) in catalogues {
            let mut reader = open(&filename)?;
            while reader.has_next() {
                match wanted.get(&reader.index()) {
                    Some(&tgt) => {
                        let rec = reader.next()?;
                        self.targets[tgt as usize].set_sequence(rec.header, rec.data);
                    }
                    None => reader.skip(1)?,
                }
            }
        }
        Ok(())
    }

    pub(crate) fn features(&self) -> &HashMultimap {
        &self.features
    }

    pub(crate) fn features_mut(&mut self) -> &mut HashMultimap {
        &mut self.features
    }

    pub(crate) fn set_max_locations_raw(&mut self, n: usize) {
        self.max_locs_per_feature = n;
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("targets", &self.targets.len())
            .field("features", &self.features)
            .finish()
    }
}
