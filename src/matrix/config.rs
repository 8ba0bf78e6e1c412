//! Configuration for paged matrices.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How many rows of a [`PagedMatrix`](super::PagedMatrix) are kept in RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MemoryPolicy {
    /// Every row stays resident.
    AllInRam,
    /// Resident rows are derived from a fraction of the available memory.
    #[default]
    AutoDiskBacked,
    /// Exactly one resident row, everything else on disk.
    ForceDiskBacked,
}

/// Configuration for paged matrices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagedMatrixConfig {
    /// Residency policy.
    pub policy: MemoryPolicy,

    /// Fraction of available memory a matrix may use under
    /// [`MemoryPolicy::AutoDiskBacked`].
    pub max_ram_fraction: f64,

    /// Maximum size of one backing temporary file in bytes.
    pub max_file_size: u64,

    /// Directory for temporary files. Uses the system default if None.
    pub temp_dir: Option<PathBuf>,
}

impl Default for PagedMatrixConfig {
    fn default() -> Self {
        Self {
            policy: MemoryPolicy::AutoDiskBacked,
            max_ram_fraction: 0.4,
            max_file_size: 2 * 1024 * 1024 * 1024, // 2GB
            temp_dir: None,
        }
    }
}

impl PagedMatrixConfig {
    /// Create a configuration with the given policy and default limits.
    pub fn with_policy(policy: MemoryPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Set the RAM fraction used by the automatic policy.
    pub fn with_max_ram_fraction(mut self, fraction: f64) -> Self {
        self.max_ram_fraction = fraction;
        self
    }

    /// Set the maximum temporary file size.
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Set the temporary file directory.
    pub fn with_temp_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }
}
