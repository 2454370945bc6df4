//! Batched query processing
//!
//! Queries are independent once the database is sealed, so input files are
//! mapped on a rayon thread pool: each task processes a batch of queries
//! with its own match sorter and candidate buffers against the shared
//! read-only database. Results are emitted in input order per file, files
//! in the order given.

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::candidates::{
    CandidateGenerationRules, Candidates, MatchCandidate, SelectionPolicy,
};
use crate::classify::{filter_candidates, ClassificationParams};
use crate::database::Database;
use crate::matches::MatchesSorter;
use crate::reader::{FastxSequenceReader, SequenceReader};
use crate::types::WindowId;

/// How reads pair up into queries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PairingMode {
    /// Every read is its own query
    #[default]
    None,
    /// The n-th reads of two consecutive input files form a pair
    Files,
    /// Consecutive reads (1+2, 3+4, ...) of each file form a pair
    Sequences,
}

/// Performance tuning knobs
#[derive(Clone, Copy, Debug)]
pub struct PerformanceParams {
    /// Worker threads (0 = all available cores)
    pub num_threads: usize,
    /// Queries per thread task
    pub batch_size: usize,
    /// Maximum queries per input file (0 = unlimited)
    pub query_limit: usize,
}

impl Default for PerformanceParams {
    fn default() -> Self {
        Self {
            num_threads: 0,
            batch_size: 4096,
            query_limit: 0,
        }
    }
}

/// All options of one query run
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryParams {
    /// Candidate filtering thresholds
    pub classify: ClassificationParams,
    /// Read pairing mode
    pub pairing: PairingMode,
    /// Maximum insert size of a read pair (widens the candidate window range)
    pub insert_size_max: usize,
    /// Threading and batching
    pub performance: PerformanceParams,
    /// Candidate retention policy
    pub policy: SelectionPolicy,
}

/// One query: a read or a read pair
#[derive(Clone, Debug)]
pub struct Query {
    /// Header of the (first) read
    pub header: String,
    /// First mate
    pub seq: Vec<u8>,
    /// Second mate in paired mode
    pub mate: Option<Vec<u8>>,
}

/// Mapping result of one query
#[derive(Clone, Debug)]
pub struct QueryMapping {
    /// Query header
    pub header: String,
    /// Surviving candidates, best first
    pub candidates: Vec<MatchCandidate>,
}

/// Tally over one `process_queries` run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryStats {
    /// Total queries processed
    pub total: u64,
    /// Queries with at least one surviving candidate
    pub mapped: u64,
}

/// Longest candidate window range for a query of `query_len` letters,
/// derived from the window stride of the database
fn window_limit(db: &Database, query_len: usize, insert_size_max: usize) -> WindowId {
    let stride = db.query_sketcher().params().winstride.max(1);
    (2 + (query_len + insert_size_max) / stride) as WindowId
}

/// Map one query against the database
pub fn map_query(
    db: &Database,
    sorter: &mut MatchesSorter,
    query: &Query,
    params: &QueryParams,
) -> Vec<MatchCandidate> {
    sorter.clear();
    db.accumulate_matches(&query.seq, sorter);
    let mut total_len = query.seq.len();
    if let Some(mate) = &query.mate {
        db.accumulate_matches(mate, sorter);
        total_len += mate.len();
    }
    sorter.sort();

    let rules = CandidateGenerationRules {
        max_windows_in_range: window_limit(db, total_len, params.insert_size_max),
        max_candidates: params.classify.max_candidates,
    };
    let mut cands = Candidates::from_matches(sorter.locations(), params.policy, rules);
    filter_candidates(
        cands.as_mut_vec(),
        sorter.locations(),
        |tgt| db.target_window_count(tgt),
        &params.classify,
    );
    std::mem::take(cands.as_mut_vec())
}

/// Map a slice of queries on a rayon pool, preserving input order
pub fn map_queries(
    db: &Database,
    queries: &[Query],
    params: &QueryParams,
) -> Result<Vec<QueryMapping>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(params.performance.num_threads)
        .build()
        .context("Failed to create query thread pool")?;

    let batch_size = params.performance.batch_size.max(1);
    let mappings = pool.install(|| {
        queries
            .par_chunks(batch_size)
            .flat_map_iter(|chunk| {
                // each task owns its sorter; buffers are reused across the batch
                let mut sorter = MatchesSorter::new();
                chunk
                    .iter()
                    .map(|q| QueryMapping {
                        header: q.header.clone(),
                        candidates: map_query(db, &mut sorter, q, params),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    });
    Ok(mappings)
}

fn read_queries_single(
    reader: &mut dyn SequenceReader,
    pairing: PairingMode,
    limit: usize,
) -> Result<Vec<Query>> {
    let mut queries = Vec::new();
    while reader.has_next() {
        if limit > 0 && queries.len() >= limit {
            break;
        }
        let rec = reader.next()?;
        let mate = if pairing == PairingMode::Sequences && reader.has_next() {
            Some(reader.next()?.data)
        } else {
            None
        };
        queries.push(Query {
            header: rec.header,
            seq: rec.data,
            mate,
        });
    }
    Ok(queries)
}

fn read_queries_paired_files(
    first: &mut dyn SequenceReader,
    second: &mut dyn SequenceReader,
    limit: usize,
) -> Result<Vec<Query>> {
    let mut queries = Vec::new();
    while first.has_next() && second.has_next() {
        if limit > 0 && queries.len() >= limit {
            break;
        }
        let rec = first.next()?;
        let mate = second.next()?;
        queries.push(Query {
            header: rec.header,
            seq: rec.data,
            mate: Some(mate.data),
        });
    }
    Ok(queries)
}

/// Map every query of every input file, feeding results to `sink` in input
/// order per file and in file order across files.
pub fn process_queries(
    db: &Database,
    infiles: &[String],
    params: &QueryParams,
    mut sink: impl FnMut(&QueryMapping),
) -> Result<QueryStats> {
    let mut params = *params;
    let mut infiles: Vec<String> = infiles.to_vec();

    if params.pairing == PairingMode::Files {
        if infiles.len() > 1 {
            // the pairing is defined by filename order, not argument order
            infiles.sort();
        } else {
            tracing::warn!("paired-file mode needs at least two files; pairing disabled");
            params.pairing = PairingMode::None;
        }
    }

    let mut stats = QueryStats::default();
    let limit = params.performance.query_limit;

    let mut emit = |mappings: Vec<QueryMapping>, stats: &mut QueryStats| {
        for m in &mappings {
            stats.total += 1;
            if !m.candidates.is_empty() {
                stats.mapped += 1;
            }
            sink(m);
        }
    };

    if params.pairing == PairingMode::Files {
        let mut pairs = infiles.chunks_exact(2);
        for pair in &mut pairs {
            let mut first = FastxSequenceReader::open(&pair[0])?;
            let mut second = FastxSequenceReader::open(&pair[1])?;
            let queries = read_queries_paired_files(&mut first, &mut second, limit)?;
            emit(map_queries(db, &queries, &params)?, &mut stats);
        }
        for leftover in pairs.remainder() {
            tracing::warn!("odd number of input files; {leftover} is processed unpaired");
            let mut reader = FastxSequenceReader::open(leftover)?;
            let queries = read_queries_single(&mut reader, PairingMode::None, limit)?;
            emit(map_queries(db, &queries, &params)?, &mut stats);
        }
    } else {
        for file in &infiles {
            let mut reader = FastxSequenceReader::open(file)?;
            let queries = read_queries_single(&mut reader, params.pairing, limit)?;
            emit(map_queries(db, &queries, &params)?, &mut stats);
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::FileSource;
    use crate::dna::Conversion;
    use crate::sketcher::{Sketcher, SketchingParams};

    fn test_db() -> Database {
        let sketcher = Sketcher::new(SketchingParams {
            kmerlen: 8,
            sketchlen: 8,
            winlen: 16,
            winstride: 9,
            conversion: Conversion::new(b'C', b'T'),
        });
        let mut db = Database::new(sketcher);
        db.add_target(
            b"ACGGATTACAGGCATCGATCGGATTCCGGAATTCGCGTACGTAGCTAGCT",
            "t0".into(),
            FileSource::default(),
        )
        .unwrap();
        db.add_target(
            b"TTTTGGGGAAAACCCCTTTTGGGGAAAACCCCTTTTGGGGAAAACCCC",
            "t1".into(),
            FileSource::default(),
        )
        .unwrap();
        db.wait_until_add_target_complete().unwrap();
        db
    }

    fn relaxed_params() -> QueryParams {
        QueryParams {
            classify: ClassificationParams {
                hits_min: 1,
                hits_cutoff: 0.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_query_finds_its_origin() {
        let db = test_db();
        let params = relaxed_params();
        let mut sorter = MatchesSorter::new();
        let query = Query {
            header: "q0".into(),
            seq: b"ACGGATTACAGGCATCGATC".to_vec(),
            mate: None,
        };
        let cands = map_query(&db, &mut sorter, &query, &params);
        assert!(!cands.is_empty());
        assert_eq!(cands[0].tgt, 0);
    }

    #[test]
    fn test_garbage_query_maps_nowhere() {
        let db = test_db();
        let params = relaxed_params();
        let mut sorter = MatchesSorter::new();
        let query = Query {
            header: "q0".into(),
            seq: b"NNNNNNNNNNNNNNNNNNNN".to_vec(),
            mate: None,
        };
        let cands = map_query(&db, &mut sorter, &query, &params);
        assert!(cands.is_empty());
    }

    #[test]
    fn test_paired_mates_accumulate_into_one_query() {
        let db = test_db();
        let params = relaxed_params();
        let mut sorter = MatchesSorter::new();

        let single = map_query(
            &db,
            &mut sorter,
            &Query {
                header: "q".into(),
                seq: b"ACGGATTACAGGCATCG".to_vec(),
                mate: None,
            },
            &params,
        );
        let paired = map_query(
            &db,
            &mut sorter,
            &Query {
                header: "q".into(),
                seq: b"ACGGATTACAGGCATCG".to_vec(),
                mate: Some(b"CGTACGTAGCTAGCT".to_vec()),
            },
            &params,
        );
        assert!(!single.is_empty());
        assert!(!paired.is_empty());
        // the mate adds hits on the same target
        assert!(paired[0].hits >= single[0].hits);
    }

    #[test]
    fn test_map_queries_preserves_input_order() {
        let db = test_db();
        let mut params = relaxed_params();
        params.performance.batch_size = 2;
        params.performance.num_threads = 2;

        let queries: Vec<Query> = (0..10)
            .map(|i| Query {
                header: format!("q{i}"),
                seq: b"ACGGATTACAGGCATCGATC".to_vec(),
                mate: None,
            })
            .collect();
        let mappings = map_queries(&db, &queries, &params).unwrap();
        let headers: Vec<&str> = mappings.iter().map(|m| m.header.as_str()).collect();
        let expected: Vec<String> = (0..10).map(|i| format!("q{i}")).collect();
        assert_eq!(headers, expected);
    }
}
