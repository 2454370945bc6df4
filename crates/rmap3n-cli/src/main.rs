use clap::{Args, Parser, Subcommand, ValueEnum};
use rmap3n_lib::{
    ClassificationParams, CoverageFill, CoverageNorm, Database, DatabaseError, FastxSequenceReader,
    FileSource, PairingMode, QueryParams, Scope, SequenceReader, Sketcher, SketchingParams,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

#[derive(Parser)]
#[command(name = "rmap3n")]
#[command(version = "0.1.0")]
#[command(about = "rmap3n: 3N read mapping", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new database of reference sequences
    Build {
        /// Database file name
        database: String,

        /// FASTA or FASTQ files (or directories) containing reference sequences
        #[arg(required = true)]
        inputs: Vec<String>,

        #[command(flatten)]
        sketching: SketchingArgs,

        #[command(flatten)]
        storage: StorageArgs,
    },

    /// Map reads to their most likely reference region of origin
    Query {
        /// Database file name
        database: String,

        /// FASTA or FASTQ files (or directories) containing reads
        inputs: Vec<String>,

        /// Redirect mapping output to a file instead of stdout
        #[arg(long)]
        out: Option<String>,

        /// Pair the n-th reads of two consecutive input files
        #[arg(long = "pair-files", conflicts_with = "pair_seq")]
        pair_files: bool,

        /// Pair consecutive reads (1+2, 3+4, ...) of each file
        #[arg(long = "pair-seq")]
        pair_seq: bool,

        /// Maximum insert size of a read pair
        #[arg(long = "insert-size", default_value_t = 0)]
        insert_size: usize,

        /// Don't list unmapped reads
        #[arg(long = "mapped-only")]
        mapped_only: bool,

        #[command(flatten)]
        classify: ClassifyArgs,

        #[command(flatten)]
        storage: StorageArgs,

        #[command(flatten)]
        performance: PerformanceArgs,
    },

    /// Display (meta-)information stored in a database
    Info {
        /// Database file name; omit to show build properties
        database: Option<String>,

        /// What to show
        #[arg(value_enum)]
        mode: Option<InfoMode>,

        /// Restrict `ref` output to these target names
        target_names: Vec<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum InfoMode {
    /// Reference sequence metadata
    Ref,
    /// Database statistics / hash table properties
    Stat,
    /// Feature map (feature -> list of reference locations)
    Loc,
    /// Feature counts (feature -> number of reference locations)
    Featurecounts,
}

#[derive(Args)]
struct SketchingArgs {
    /// Number of nucleotides in a k-mer
    #[arg(long, default_value_t = rmap3n_lib::constants::DEFAULT_KMER_LEN)]
    kmerlen: usize,

    /// Number of features (k-mer hashes) per sampling window
    #[arg(long, default_value_t = rmap3n_lib::constants::DEFAULT_SKETCH_LEN)]
    sketchlen: usize,

    /// Number of letters in each sampling window
    #[arg(long, default_value_t = rmap3n_lib::constants::DEFAULT_WINDOW_LEN)]
    winlen: usize,

    /// Distance between window starting positions (default: winlen - kmerlen + 1)
    #[arg(long)]
    winstride: Option<usize>,

    /// Nucleotide conversion original -> replacement, e.g. `--conv C T` for BS-seq
    #[arg(long, num_args = 2, value_names = ["ORIG", "REPL"])]
    conv: Option<Vec<char>>,
}

impl SketchingArgs {
    fn to_params(&self) -> anyhow::Result<SketchingParams> {
        let conversion = match &self.conv {
            Some(pair) => rmap3n_lib::dna::Conversion::new(pair[0] as u8, pair[1] as u8),
            None => rmap3n_lib::dna::Conversion::default(),
        };
        let params = SketchingParams {
            kmerlen: self.kmerlen,
            sketchlen: self.sketchlen,
            winlen: self.winlen,
            winstride: self
                .winstride
                .unwrap_or(self.winlen.saturating_sub(self.kmerlen) + 1),
            conversion,
        };
        params.validate().map_err(|e| anyhow::anyhow!(e))?;
        Ok(params)
    }
}

#[derive(Args)]
struct StorageArgs {
    /// Maximum number of reference locations stored per feature
    #[arg(long = "max-locations-per-feature")]
    max_locations_per_feature: Option<usize>,

    /// Remove features that reached the maximum location count
    #[arg(long = "remove-overpopulated-features")]
    remove_overpopulated_features: bool,

    /// Remove features occurring in more than this many reference sequences
    #[arg(long = "max-ambig-per-feature")]
    max_ambig_per_feature: Option<usize>,

    /// Maximum hash table load factor
    #[arg(long = "max-load-factor")]
    max_load_factor: Option<f32>,
}

impl StorageArgs {
    /// Apply post-build / post-load database modifications
    fn apply(&self, db: &mut Database) -> Result<(), DatabaseError> {
        if let Some(f) = self.max_load_factor {
            db.set_max_load_factor(f)?;
        }
        if let Some(n) = self.max_locations_per_feature {
            let affected = db.set_max_locations_per_feature(n)?;
            if affected > 0 {
                info!("Pruned {affected} features to at most {n} locations");
            }
        }
        if let Some(max_ambig) = self.max_ambig_per_feature {
            let removed = db.remove_ambiguous_features(max_ambig)?;
            info!("Removed {removed} ambiguous features (> {max_ambig} targets)");
        }
        if self.remove_overpopulated_features {
            let removed = db.remove_overpopulated_features()?;
            info!("Removed {removed} overpopulated features");
        }
        Ok(())
    }
}

#[derive(Args)]
struct ClassifyArgs {
    /// Discard candidates with fewer hits
    #[arg(long = "hits-min", default_value_t = 1)]
    hits_min: u64,

    /// Discard candidates with fewer hits relative to the top candidate
    #[arg(long = "hits-cutoff", default_value_t = 0.8)]
    hits_cutoff: f64,

    /// Discard candidates on targets with lower coverage
    #[arg(long = "cov-min", default_value_t = 0.0)]
    cov_min: f64,

    /// Maximum number of candidates reported per query (0 = unlimited)
    #[arg(long = "max-cand", default_value_t = 0)]
    max_cand: usize,

    /// Disable max-normalization of the coverage statistic
    #[arg(long = "no-cov-norm")]
    no_cov_norm: bool,

    /// Count every window inside a candidate's range as covered
    #[arg(long = "fill-coverage")]
    fill_coverage: bool,
}

impl ClassifyArgs {
    fn to_params(&self) -> ClassificationParams {
        ClassificationParams {
            hits_min: self.hits_min,
            hits_cutoff: self.hits_cutoff,
            cov_min: self.cov_min,
            max_candidates: if self.max_cand == 0 {
                usize::MAX
            } else {
                self.max_cand
            },
            cov_norm: if self.no_cov_norm {
                CoverageNorm::None
            } else {
                CoverageNorm::Max
            },
            cov_fill: if self.fill_coverage {
                CoverageFill::Fill
            } else {
                CoverageFill::None
            },
        }
        .normalized()
    }
}

#[derive(Args)]
struct PerformanceArgs {
    /// Maximum number of parallel threads (0 = all available cores)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Queries processed per thread task
    #[arg(long = "batch-size", default_value_t = 4096)]
    batch_size: usize,

    /// Map at most this many queries per input file (0 = unlimited)
    #[arg(long = "query-limit", default_value_t = 0)]
    query_limit: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // help and version requests are not errors
            use clap::error::ErrorKind;
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    let result = match cli.command {
        Commands::Build {
            database,
            inputs,
            sketching,
            storage,
        } => build_command(&database, &inputs, &sketching, &storage),
        Commands::Query {
            database,
            inputs,
            out,
            pair_files,
            pair_seq,
            insert_size,
            mapped_only,
            classify,
            storage,
            performance,
        } => query_command(
            &database,
            &inputs,
            out.as_deref(),
            pair_files,
            pair_seq,
            insert_size,
            mapped_only,
            &classify,
            &storage,
            &performance,
        ),
        Commands::Info {
            database,
            mode,
            target_names,
        } => info_command(database.as_deref(), mode, &target_names),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code_of(&e))
        }
    }
}

fn exit_code_of(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<DatabaseError>() {
        Some(db_err) => db_err.exit_code() as u8,
        // everything else at this boundary is an input/output problem
        None => 2,
    }
}

/// Database filename with the conventional extension
fn sanitize_database_name(name: &str) -> String {
    if name.contains(".db") {
        name.to_string()
    } else {
        format!("{name}.db")
    }
}

/// Replace directory arguments with the files they contain
/// (searched at most 10 levels deep)
fn expand_input_files(inputs: &[String]) -> Vec<String> {
    fn collect(path: &Path, depth: usize, out: &mut Vec<String>) {
        if depth > 10 {
            return;
        }
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .map(|rd| rd.filter_map(|e| e.ok().map(|e| e.path())).collect())
                .unwrap_or_default();
            entries.sort();
            for entry in entries {
                collect(&entry, depth + 1, out);
            }
        } else {
            out.push(path.display().to_string());
        }
    }
    let mut files = Vec::new();
    for input in inputs {
        collect(Path::new(input), 0, &mut files);
    }
    files
}

fn build_command(
    database: &str,
    inputs: &[String],
    sketching: &SketchingArgs,
    storage: &StorageArgs,
) -> anyhow::Result<()> {
    let dbfile = sanitize_database_name(database);
    let infiles = expand_input_files(inputs);
    if infiles.is_empty() {
        anyhow::bail!("no reference sequence files provided or found");
    }

    let params = sketching.to_params()?;
    params.print();
    let mut db = Database::new(Sketcher::new(params));

    if let Some(f) = storage.max_load_factor {
        db.set_max_load_factor(f)?;
    }
    if let Some(n) = storage.max_locations_per_feature {
        db.set_max_locations_per_feature(n)?;
    }

    info!("Building database from {} input file(s)", infiles.len());
    for filename in &infiles {
        let mut reader = FastxSequenceReader::open(filename)?;
        while reader.has_next() {
            let index = reader.index();
            let rec = reader.next()?;
            if rec.data.is_empty() {
                continue;
            }
            let name = rec.name().to_string();
            db.add_target(
                &rec.data,
                name,
                FileSource {
                    filename: filename.clone(),
                    index,
                    windows: 0,
                },
            )?;
        }
        info!("  {} done ({} targets total)", filename, db.target_count());
    }
    db.wait_until_add_target_complete()?;

    if let Some(max_ambig) = storage.max_ambig_per_feature {
        let removed = db.remove_ambiguous_features(max_ambig)?;
        info!("Removed {removed} ambiguous features (> {max_ambig} targets)");
    }
    if storage.remove_overpopulated_features {
        let removed = db.remove_overpopulated_features()?;
        info!("Removed {removed} overpopulated features");
    }

    info!(
        "Database: {} targets, {} features, {} locations",
        db.target_count(),
        db.feature_count(),
        db.location_count()
    );
    info!("Writing database to {dbfile}");
    rmap3n_lib::write_database_file(&db, &dbfile)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn query_command(
    database: &str,
    inputs: &[String],
    out: Option<&str>,
    pair_files: bool,
    pair_seq: bool,
    insert_size: usize,
    mapped_only: bool,
    classify: &ClassifyArgs,
    storage: &StorageArgs,
    performance: &PerformanceArgs,
) -> anyhow::Result<()> {
    let dbfile = sanitize_database_name(database);
    let infiles = expand_input_files(inputs);
    if infiles.is_empty() {
        anyhow::bail!("no query sequence files provided or found");
    }

    info!("Loading database {dbfile}");
    let mut db = rmap3n_lib::read_database_file(&dbfile, Scope::Sketches)?;
    storage.apply(&mut db)?;
    info!(
        "Database loaded: {} targets, {} features",
        db.target_count(),
        db.feature_count()
    );

    let params = QueryParams {
        classify: classify.to_params(),
        pairing: if pair_files {
            PairingMode::Files
        } else if pair_seq {
            PairingMode::Sequences
        } else {
            PairingMode::None
        },
        insert_size_max: insert_size,
        performance: rmap3n_lib::PerformanceParams {
            num_threads: performance.threads,
            batch_size: performance.batch_size.max(1),
            query_limit: performance.query_limit,
        },
        policy: Default::default(),
    };

    let mut writer: BufWriter<Box<dyn Write>> = BufWriter::new(match out {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(std::io::stdout()),
    });

    const SEP: &str = "\t|\t";
    let mut write_err = None;
    let stats = rmap3n_lib::query::process_queries(&db, &infiles, &params, |mapping| {
        if write_err.is_some() || (mapped_only && mapping.candidates.is_empty()) {
            return;
        }
        let mut line = mapping.header.clone();
        for cand in &mapping.candidates {
            let name = db
                .get_target(cand.tgt)
                .map(|t| t.name())
                .unwrap_or("<unknown>");
            line.push_str(SEP);
            line.push_str(&format!(
                "{name} [{},{}] {}",
                cand.pos.beg, cand.pos.end, cand.hits
            ));
        }
        if let Err(e) = writeln!(writer, "{line}") {
            write_err = Some(e);
        }
    })?;
    if let Some(e) = write_err {
        return Err(DatabaseError::Io(e).into());
    }
    writer.flush().map_err(DatabaseError::Io)?;

    let pct = if stats.total > 0 {
        100.0 * stats.mapped as f64 / stats.total as f64
    } else {
        0.0
    };
    info!(
        "Mapped {} of {} queries ({:.2}%)",
        stats.mapped, stats.total, pct
    );
    Ok(())
}

fn info_command(
    database: Option<&str>,
    mode: Option<InfoMode>,
    target_names: &[String],
) -> anyhow::Result<()> {
    let Some(database) = database else {
        print_static_properties();
        return Ok(());
    };
    let dbfile = sanitize_database_name(database);

    let scope = match mode {
        Some(InfoMode::Loc) | Some(InfoMode::Featurecounts) | Some(InfoMode::Stat) => {
            Scope::Sketches
        }
        _ => Scope::MetadataOnly,
    };
    let db = rmap3n_lib::read_database_file(&dbfile, scope)?;

    match mode {
        None => {
            print_db_properties(&db);
        }
        Some(InfoMode::Ref) => {
            println!("id\tname\tsource\twindows");
            for (id, t) in db.targets().iter().enumerate() {
                if !target_names.is_empty() && !target_names.iter().any(|n| n == t.name()) {
                    continue;
                }
                println!(
                    "{id}\t{}\t{}:{}\t{}",
                    t.name(),
                    t.source().filename,
                    t.source().index,
                    t.source().windows
                );
            }
        }
        Some(InfoMode::Stat) => {
            print_db_properties(&db);
            let stats = db.location_list_size_statistics();
            println!("buckets (hash table slots): {}", db.bucket_count());
            println!("max load factor:            {}", db.max_load_factor());
            println!("dead features:              {}", db.dead_feature_count());
            println!("location list sizes:");
            println!("  non-empty: {}", stats.count);
            println!("  mean:      {:.2}", stats.mean());
            println!("  max:       {}", stats.max);
        }
        Some(InfoMode::Loc) => {
            let stdout = std::io::stdout();
            let mut lock = BufWriter::new(stdout.lock());
            db.print_feature_map(&mut lock)?;
            lock.flush()?;
        }
        Some(InfoMode::Featurecounts) => {
            let stdout = std::io::stdout();
            let mut lock = BufWriter::new(stdout.lock());
            db.print_feature_counts(&mut lock)?;
            lock.flush()?;
        }
    }
    Ok(())
}

fn print_static_properties() {
    let (major, minor, patch) = rmap3n_lib::version();
    println!("rmap3n {major}.{minor}.{patch}");
    println!("target id:        32 bits");
    println!("window id:        32 bits");
    println!("feature:          32 bits");
    println!("bucket size type: 8 bits");
    println!("max targets:      {}", Database::max_target_count());
    println!(
        "max locations per feature: {}",
        Database::max_supported_locations_per_feature()
    );
}

fn print_db_properties(db: &Database) {
    let p = db.target_sketcher().params();
    println!("sketching: k={} sketchlen={} winlen={} winstride={} conv={}->{}",
        p.kmerlen,
        p.sketchlen,
        p.winlen,
        p.winstride,
        p.conversion.orig() as char,
        p.conversion.repl() as char
    );
    println!("targets:   {}", db.target_count());
    println!("features:  {}", db.feature_count());
    println!("locations: {}", db.location_count());
    println!(
        "max locations per feature: {}",
        db.max_locations_per_feature()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_database_name() {
        assert_eq!(sanitize_database_name("mydb"), "mydb.db");
        assert_eq!(sanitize_database_name("mydb.db"), "mydb.db");
        assert_eq!(sanitize_database_name("a/b/refs"), "a/b/refs.db");
    }

    #[test]
    fn test_expand_input_files_passes_plain_files() {
        let files = expand_input_files(&["/no/such/file.fa".to_string()]);
        assert_eq!(files, vec!["/no/such/file.fa".to_string()]);
    }

    #[test]
    fn test_expand_input_files_recurses_directories() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(dir.path().join("a.fa"), ">x\nACGT\n").unwrap();
        std::fs::write(sub.join("b.fa"), ">y\nACGT\n").unwrap();

        let files = expand_input_files(&[dir.path().display().to_string()]);
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.fa"));
        assert!(files[1].ends_with("b.fa"));
    }
}
