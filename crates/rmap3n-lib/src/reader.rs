//! Sequence input abstraction
//!
//! The core consumes sequences through the [`SequenceReader`] trait and
//! never parses FASTA/FASTQ itself. [`FastxSequenceReader`] is the default
//! implementation, backed by needletail (with transparent gzip
//! decompression).

use anyhow::{Context, Result};
use std::path::Path;

/// One sequence record
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SequenceRecord {
    /// Full header line (without the leading `>` / `@`)
    pub header: String,
    /// Sequence letters
    pub data: Vec<u8>,
}

impl SequenceRecord {
    /// First whitespace-delimited token of the header, used as target name
    pub fn name(&self) -> &str {
        self.header.split_whitespace().next().unwrap_or(&self.header)
    }
}

/// Pull-based sequence source
pub trait SequenceReader {
    /// True if another record is available
    fn has_next(&mut self) -> bool;

    /// Index of the record that [`next`](Self::next) will return
    fn index(&self) -> u64;

    /// Read the next record
    fn next(&mut self) -> Result<SequenceRecord>;

    /// Skip `n` records
    fn skip(&mut self, n: u64) -> Result<()> {
        for _ in 0..n {
            if !self.has_next() {
                break;
            }
            self.next()?;
        }
        Ok(())
    }
}

/// needletail-backed FASTA/FASTQ reader
pub struct FastxSequenceReader {
    reader: Box<dyn needletail::FastxReader>,
    buffered: Option<SequenceRecord>,
    index: u64,
    path: String,
}

impl FastxSequenceReader {
    /// Open a sequence file (may be gzipped)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = needletail::parse_fastx_file(path)
            .with_context(|| format!("Failed to open sequence file: {}", path.display()))?;
        Ok(Self {
            reader,
            buffered: None,
            index: 0,
            path: path.display().to_string(),
        })
    }

    fn fill_buffer(&mut self) -> Result<()> {
        if self.buffered.is_some() {
            return Ok(());
        }
        if let Some(record) = self.reader.next() {
            let record = record
                .with_context(|| format!("Failed to parse sequence record in {}", self.path))?;
            self.buffered = Some(SequenceRecord {
                header: String::from_utf8_lossy(record.id()).into_owned(),
                data: record.seq().into_owned(),
            });
        }
        Ok(())
    }
}

impl SequenceReader for FastxSequenceReader {
    fn has_next(&mut self) -> bool {
        self.fill_buffer().is_ok() && self.buffered.is_some()
    }

    fn index(&self) -> u64 {
        self.index
    }

    fn next(&mut self) -> Result<SequenceRecord> {
        self.fill_buffer()?;
        let record = self
            .buffered
            .take()
            .with_context(|| format!("No more sequences in {}", self.path))?;
        self.index += 1;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_fasta(records: &[(&str, &str)]) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".fa").tempfile().unwrap();
        for (header, seq) in records {
            writeln!(file, ">{header}").unwrap();
            writeln!(file, "{seq}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_read_fasta() {
        let file = write_fasta(&[("seq1 description", "ACGT"), ("seq2", "TGCA")]);
        let mut reader = FastxSequenceReader::open(file.path()).unwrap();

        assert!(reader.has_next());
        assert_eq!(reader.index(), 0);
        let rec = reader.next().unwrap();
        assert_eq!(rec.header, "seq1 description");
        assert_eq!(rec.name(), "seq1");
        assert_eq!(rec.data, b"ACGT");

        assert_eq!(reader.index(), 1);
        let rec = reader.next().unwrap();
        assert_eq!(rec.data, b"TGCA");
        assert!(!reader.has_next());
    }

    #[test]
    fn test_skip() {
        let file = write_fasta(&[("a", "AAAA"), ("b", "CCCC"), ("c", "GGGG")]);
        let mut reader = FastxSequenceReader::open(file.path()).unwrap();
        reader.skip(2).unwrap();
        assert_eq!(reader.index(), 2);
        assert_eq!(reader.next().unwrap().data, b"GGGG");
    }

    #[test]
    fn test_open_missing_file() {
        assert!(FastxSequenceReader::open("/nonexistent/path.fa").is_err());
    }
}
