//! Constants and default parameters for rmap3n
//!
//! This module is the single source of truth for database format versioning
//! and for the default sketching / storage / classification parameters.

/// Magic number / format version of the binary database files.
///
/// A reader must refuse any file whose leading 32-bit word differs.
pub const DB_VERSION: u32 = 20241004;

/// Version of the tool itself
pub const VERSION: (u8, u8, u8) = (0, 1, 0);

/// Default seed for the deterministic table hasher
pub const DEFAULT_SEED: u64 = 1;

/// Default k-mer length used for sketching
pub const DEFAULT_KMER_LEN: usize = 16;

/// Default number of features retained per window sketch
pub const DEFAULT_SKETCH_LEN: usize = 16;

/// Default sampling window length
pub const DEFAULT_WINDOW_LEN: usize = 127;

/// Default nucleotide conversion for bisulfite-style (3N) data: C -> T
pub const DEFAULT_CONVERSION: (u8, u8) = (b'C', b'T');

/// Default maximum hash table load factor
pub const DEFAULT_MAX_LOAD_FACTOR: f32 = 0.8;

/// Number of window sketches per inserter batch
pub const INSERTER_BATCH_SIZE: usize = 1000;

/// Capacity of the inserter's batch queue
pub const INSERTER_QUEUE_SIZE: usize = 100;

/// Maximum k-mer length; k-mers are packed 2 bits per base into a u64
pub const MAX_K: usize = 32;

/// Check if a k-mer length can be sketched
#[inline]
pub const fn is_valid_k(k: usize) -> bool {
    k >= 1 && k <= MAX_K
}
