//! Error types for database construction, querying and (de)serialization

use thiserror::Error;

/// Error type for all database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Underlying read/write/seek failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file's magic number does not match [`DB_VERSION`](crate::constants::DB_VERSION)
    #[error("database version mismatch: found {found}, expected {expected}")]
    VersionMismatch {
        /// Magic number found in the file
        found: u32,
        /// Magic number this build understands
        expected: u32,
    },

    /// Truncated record or inconsistent length field
    #[error("database corrupt: {0}")]
    Corrupt(String),

    /// More reference sequences than the target id type can address
    #[error("target count limit exceeded")]
    TargetLimitExceeded,

    /// The background sketch inserter died; latched until the database is rebuilt
    #[error("sketch inserter failed; no further targets can be added")]
    InserterFailed,
}

impl DatabaseError {
    /// Process exit code associated with this error kind
    pub fn exit_code(&self) -> i32 {
        match self {
            DatabaseError::Io(_) => 2,
            DatabaseError::VersionMismatch { .. } | DatabaseError::Corrupt(_) => 3,
            DatabaseError::TargetLimitExceeded => 4,
            DatabaseError::InserterFailed => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(DatabaseError::TargetLimitExceeded.exit_code(), 4);
        assert_eq!(
            DatabaseError::VersionMismatch { found: 0, expected: 1 }.exit_code(),
            3
        );
        assert_eq!(DatabaseError::Corrupt("x".into()).exit_code(), 3);
    }
}
