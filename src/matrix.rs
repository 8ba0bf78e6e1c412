//! Out-of-core matrices.
//!
//! A [`PagedMatrix`] stores an arbitrarily large 2D array of plain-old-data
//! elements. A bounded number of rows stay resident in RAM; the rest are
//! spilled to anonymous temporary files and swapped in on demand.
//!
//! # Example
//!
//! ```
//! use segmenta::matrix::{MemoryPolicy, PagedMatrix};
//!
//! # fn main() -> segmenta::error::Result<()> {
//! let mut matrix: PagedMatrix<u32> = PagedMatrix::new();
//! matrix.reset(8, 4, MemoryPolicy::ForceDiskBacked)?;
//!
//! matrix.set(7, 3, 42)?;
//! matrix.row(0)?[1] = 5;
//! assert_eq!(matrix.get(7, 3)?, 42);
//! assert_eq!(matrix.get(0, 1)?, 5);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod memory;
pub mod paged;

pub use config::{MemoryPolicy, PagedMatrixConfig};
pub use memory::available_memory_bytes;
pub use paged::PagedMatrix;
