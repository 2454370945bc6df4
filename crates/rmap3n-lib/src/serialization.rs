//! Binary database format
//!
//! Little-endian throughout, fixed integer widths, strings prefixed with a
//! 64-bit length. Layout:
//!
//! ```text
//! u32  DB_VERSION magic
//! target sketcher parameters (kmerlen, sketchlen, winlen, winstride: u64; conv: 2 x u8)
//! query sketcher parameters  (same shape)
//! u64  max locations per feature
//! u64  target count
//!      per target: name, source filename (strings), source index: u64, windows: u64
//! u64  non-empty bucket count
//!      per bucket: key: u32, size: u8, size x location (win: u32, tgt: u32)
//! ```
//!
//! The feature table is not restored slot-for-slot: reading re-inserts
//! every `(key, values)` pair, so the on-disk format stays valid across
//! changes to probing, sizing or load factor.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::constants::DB_VERSION;
use crate::database::{Database, FileSource, Scope, Target};
use crate::dna::Conversion;
use crate::error::DatabaseError;
use crate::reader::FastxSequenceReader;
use crate::sketcher::{Sketcher, SketchingParams};
use crate::types::Location;

fn write_u8(w: &mut impl Write, v: u8) -> std::io::Result<()> {
    w.write_all(&[v])
}

fn write_u32(w: &mut impl Write, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64(w: &mut impl Write, v: u64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_string(w: &mut impl Write, s: &str) -> std::io::Result<()> {
    write_u64(w, s.len() as u64)?;
    w.write_all(s.as_bytes())
}

fn read_u8(r: &mut impl Read) -> Result<u8, DatabaseError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).map_err(truncated)?;
    Ok(buf[0])
}

fn read_u32(r: &mut impl Read) -> Result<u32, DatabaseError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(truncated)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> Result<u64, DatabaseError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(truncated)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_string(r: &mut impl Read) -> Result<String, DatabaseError> {
    let len = read_u64(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(truncated)?;
    String::from_utf8(buf)
        .map_err(|_| DatabaseError::Corrupt("string field is not valid UTF-8".into()))
}

fn truncated(e: std::io::Error) -> DatabaseError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        DatabaseError::Corrupt("unexpected end of file".into())
    } else {
        DatabaseError::Io(e)
    }
}

fn write_sketcher(w: &mut impl Write, sk: &Sketcher) -> std::io::Result<()> {
    let p = sk.params();
    write_u64(w, p.kmerlen as u64)?;
    write_u64(w, p.sketchlen as u64)?;
    write_u64(w, p.winlen as u64)?;
    write_u64(w, p.winstride as u64)?;
    write_u8(w, p.conversion.orig())?;
    write_u8(w, p.conversion.repl())
}

fn read_sketcher(r: &mut impl Read) -> Result<Sketcher, DatabaseError> {
    let kmerlen = read_u64(r)? as usize;
    let sketchlen = read_u64(r)? as usize;
    let winlen = read_u64(r)? as usize;
    let winstride = read_u64(r)? as usize;
    let orig = read_u8(r)?;
    let repl = read_u8(r)?;
    let params = SketchingParams {
        kmerlen,
        sketchlen,
        winlen,
        winstride,
        conversion: Conversion::new(orig, repl),
    };
    params
        .validate()
        .map_err(|e| DatabaseError::Corrupt(format!("invalid sketching parameters: {e}")))?;
    Ok(Sketcher::new(params))
}

/// Write a sealed database to `writer`
pub fn write_database(db: &Database, writer: &mut impl Write) -> Result<(), DatabaseError> {
    write_u32(writer, DB_VERSION)?;
    write_sketcher(writer, db.target_sketcher())?;
    write_sketcher(writer, db.query_sketcher())?;
    write_u64(writer, db.max_locations_per_feature() as u64)?;

    write_u64(writer, db.target_count())?;
    for t in db.targets() {
        write_string(writer, t.name())?;
        write_string(writer, &t.source().filename)?;
        write_u64(writer, t.source().index)?;
        write_u64(writer, t.source().windows)?;
    }

    let features = db.features();
    write_u64(writer, features.non_empty_bucket_count() as u64)?;
    for (key, locs) in features.buckets() {
        write_u32(writer, key)?;
        write_u8(writer, locs.len() as u8)?;
        for l in locs {
            write_u32(writer, l.win)?;
            write_u32(writer, l.tgt)?;
        }
    }
    Ok(())
}

/// Write a sealed database to a file
pub fn write_database_file<P: AsRef<Path>>(db: &Database, path: P) -> Result<(), DatabaseError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_database(db, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Read a database from `reader`
pub fn read_database(reader: &mut impl Read, scope: Scope) -> Result<Database, DatabaseError> {
    let magic = read_u32(reader)?;
    if magic != DB_VERSION {
        return Err(DatabaseError::VersionMismatch {
            found: magic,
            expected: DB_VERSION,
        });
    }
    let target_sketcher = read_sketcher(reader)?;
    let query_sketcher = read_sketcher(reader)?;
    let max_locs = read_u64(reader)? as usize;
    if max_locs == 0 || max_locs > Database::max_supported_locations_per_feature() {
        return Err(DatabaseError::Corrupt(format!(
            "max locations per feature out of range: {max_locs}"
        )));
    }

    let mut db = Database::with_sketchers(target_sketcher, query_sketcher);
    db.set_max_locations_raw(max_locs);

    let target_count = read_u64(reader)?;
    if target_count > Database::max_target_count() {
        return Err(DatabaseError::Corrupt(format!(
            "target count out of range: {target_count}"
        )));
    }
    for _ in 0..target_count {
        let name = read_string(reader)?;
        let filename = read_string(reader)?;
        let index = read_u64(reader)?;
        let windows = read_u64(reader)?;
        db.push_target_record(Target::from_parts(
            name,
            FileSource {
                filename,
                index,
                windows,
            },
        ));
    }

    if scope == Scope::MetadataOnly {
        return Ok(db);
    }

    let bucket_count = read_u64(reader)?;
    for _ in 0..bucket_count {
        let key = read_u32(reader)?;
        let size = read_u8(reader)? as usize;
        for _ in 0..size {
            let win = read_u32(reader)?;
            let tgt = read_u32(reader)?;
            if tgt as u64 >= target_count {
                return Err(DatabaseError::Corrupt(format!(
                    "location references unknown target {tgt}"
                )));
            }
            db.features_mut().insert(key, Location::new(tgt, win));
        }
    }
    Ok(db)
}

/// Read a database from a file; `Scope::Everything` also re-reads the
/// target sequences from their source files.
pub fn read_database_file<P: AsRef<Path>>(
    path: P,
    scope: Scope,
) -> Result<Database, DatabaseError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut db = read_database(&mut reader, scope)?;
    if scope == Scope::Everything {
        db.reread_targets(|p: &str| FastxSequenceReader::open(p))
            .map_err(|e| {
                DatabaseError::Io(std::io::Error::other(format!(
                    "rereading target sequences: {e}"
                )))
            })?;
    }
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketcher::SketchingParams;
    use std::collections::BTreeMap;

    fn small_db() -> Database {
        let sketcher = Sketcher::new(SketchingParams {
            kmerlen: 4,
            sketchlen: 4,
            winlen: 8,
            winstride: 5,
            conversion: Conversion::new(b'C', b'T'),
        });
        let mut db = Database::new(sketcher);
        db.add_target(
            b"ACGTACGTACGTACGT",
            "t0".into(),
            FileSource {
                filename: "ref.fa".into(),
                index: 0,
                windows: 0,
            },
        )
        .unwrap();
        db.add_target(
            b"TTGGCCAATTGGCCAA",
            "t1".into(),
            FileSource {
                filename: "ref.fa".into(),
                index: 1,
                windows: 0,
            },
        )
        .unwrap();
        db.wait_until_add_target_complete().unwrap();
        db
    }

    fn bucket_map(db: &Database) -> BTreeMap<u32, Vec<Location>> {
        db.features()
            .buckets()
            .map(|(k, v)| (k, v.to_vec()))
            .collect()
    }

    #[test]
    fn test_roundtrip() {
        let db = small_db();
        let mut buf = Vec::new();
        write_database(&db, &mut buf).unwrap();

        let restored = read_database(&mut buf.as_slice(), Scope::Sketches).unwrap();

        assert_eq!(restored.target_count(), db.target_count());
        for (a, b) in restored.targets().iter().zip(db.targets()) {
            assert_eq!(a.name(), b.name());
            assert_eq!(a.source(), b.source());
        }
        assert_eq!(restored.query_sketcher(), db.query_sketcher());
        assert_eq!(
            restored.max_locations_per_feature(),
            db.max_locations_per_feature()
        );
        // identical keys and values regardless of table geometry
        assert_eq!(bucket_map(&restored), bucket_map(&db));
    }

    #[test]
    fn test_metadata_only_skips_features() {
        let db = small_db();
        let mut buf = Vec::new();
        write_database(&db, &mut buf).unwrap();

        let restored = read_database(&mut buf.as_slice(), Scope::MetadataOnly).unwrap();
        assert_eq!(restored.target_count(), 2);
        assert_eq!(restored.feature_count(), 0);
        assert_eq!(restored.target_with_name("t1"), 1);
    }

    #[test]
    fn test_version_mismatch_refused() {
        let db = small_db();
        let mut buf = Vec::new();
        write_database(&db, &mut buf).unwrap();
        buf[0] ^= 0xFF;

        match read_database(&mut buf.as_slice(), Scope::Sketches) {
            Err(DatabaseError::VersionMismatch { expected, .. }) => {
                assert_eq!(expected, DB_VERSION);
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let db = small_db();
        let mut buf = Vec::new();
        write_database(&db, &mut buf).unwrap();
        buf.truncate(buf.len() / 2);

        match read_database(&mut buf.as_slice(), Scope::Sketches) {
            Err(DatabaseError::Corrupt(_)) => {}
            other => panic!("expected corrupt, got {other:?}"),
        }
    }

    #[test]
    fn test_file_roundtrip() {
        let db = small_db();
        let file = tempfile::NamedTempFile::new().unwrap();
        write_database_file(&db, file.path()).unwrap();
        let restored = read_database_file(file.path(), Scope::Sketches).unwrap();
        assert_eq!(bucket_map(&restored), bucket_map(&db));
    }
}
