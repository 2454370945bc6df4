// rmap3n: 3N read mapping
//
// Core of a read mapper for bisulfite-style 3N sequencing data: a
// min-hash-indexed feature store over reference sequence windows,
// contiguous-window candidate generation and hit/coverage filtering.

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod candidates;
pub mod classify;
pub mod constants;
pub mod database;
pub mod dna;
pub mod error;
pub mod hash_multimap;
pub mod hasher;
mod inserter;
pub mod matches;
pub mod query;
pub mod reader;
pub mod serialization;
pub mod sketcher;
pub mod types;

// Re-export common types at crate root
pub use candidates::{
    CandidateGenerationRules, Candidates, MatchCandidate, SelectionPolicy, WindowRange,
};
pub use classify::{ClassificationParams, CoverageFill, CoverageNorm};
pub use database::{Database, FileSource, Scope, Target};
pub use error::DatabaseError;
pub use matches::MatchesSorter;
pub use query::{PairingMode, PerformanceParams, QueryParams};
pub use reader::{FastxSequenceReader, SequenceReader, SequenceRecord};
pub use serialization::{read_database_file, write_database_file};
pub use sketcher::{Sketch, Sketcher, SketchingParams};
pub use types::{Feature, Location, TargetId, WindowId, NULL_TARGET};

/// Version information
pub fn version() -> (u8, u8, u8) {
    constants::VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let (major, minor, patch) = version();
        assert_eq!(major, 0);
        assert_eq!(minor, 1);
        assert_eq!(patch, 0);
    }
}
