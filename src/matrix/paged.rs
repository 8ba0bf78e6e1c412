//! Row-paged matrix backed by temporary files.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::mem;

use bytemuck::Pod;
use log::{debug, warn};

use crate::error::{Result, SegmenterError};
use crate::matrix::config::{MemoryPolicy, PagedMatrixConfig};
use crate::matrix::memory::memory_budget;

/// Where a logical row currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowLocation {
    /// Resident in the given RAM slot.
    Ram(usize),
    /// Stored in a backing file at the given byte offset.
    Disk { file: usize, offset: u64 },
}

/// A rows × cols matrix keeping a bounded set of rows in RAM.
///
/// Rows that do not fit are persisted in anonymous temporary files. Fetching a
/// non-resident row swaps it with the row occupying the next RAM slot in
/// round-robin order: the victim is written to the disk slot the requested
/// row vacates, so every row always has exactly one home.
///
/// [`row`](Self::row) borrows the matrix mutably, so a returned row cannot be
/// held across a fetch of another row.
#[derive(Debug)]
pub struct PagedMatrix<T: Pod> {
    rows: usize,
    cols: usize,
    /// RAM-resident row buffers.
    slots: Vec<Vec<T>>,
    /// Logical row held by each RAM slot.
    slot_rows: Vec<usize>,
    /// Location of every logical row.
    locations: Vec<RowLocation>,
    /// Backing temporary files, deleted when dropped.
    files: Vec<File>,
    /// Spare row buffer exchanged with a slot on every swap.
    swap_buffer: Vec<T>,
    /// Round-robin eviction cursor.
    next_victim: usize,
    /// Set after an I/O failure; cleared by `reset`.
    poisoned: bool,
    config: PagedMatrixConfig,
}

impl<T: Pod> Default for PagedMatrix<T> {
    fn default() -> Self {
        Self::with_config(PagedMatrixConfig::default())
    }
}

impl<T: Pod> PagedMatrix<T> {
    /// Create an empty matrix with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty matrix with the given configuration.
    pub fn with_config(config: PagedMatrixConfig) -> Self {
        PagedMatrix {
            rows: 0,
            cols: 0,
            slots: Vec::new(),
            slot_rows: Vec::new(),
            locations: Vec::new(),
            files: Vec::new(),
            swap_buffer: Vec::new(),
            next_victim: 0,
            poisoned: false,
            config,
        }
    }

    /// Reallocate the matrix with the given shape and residency policy.
    ///
    /// All previous content is discarded; every element starts zeroed.
    pub fn reset(&mut self, rows: usize, cols: usize, policy: MemoryPolicy) -> Result<()> {
        self.config.policy = policy;
        self.allocate(rows, cols)
    }

    /// Reallocate the matrix with the given shape and a new configuration.
    pub fn reset_with(
        &mut self,
        rows: usize,
        cols: usize,
        config: PagedMatrixConfig,
    ) -> Result<()> {
        self.config = config;
        self.allocate(rows, cols)
    }

    fn allocate(&mut self, rows: usize, cols: usize) -> Result<()> {
        self.clear();

        if rows == 0 || cols == 0 {
            self.rows = rows;
            self.cols = cols;
            return Ok(());
        }

        let row_bytes = (cols * mem::size_of::<T>()).max(1) as u64;
        let resident = match self.config.policy {
            MemoryPolicy::AllInRam => rows,
            MemoryPolicy::ForceDiskBacked => 1,
            MemoryPolicy::AutoDiskBacked => {
                let budget = memory_budget(self.config.max_ram_fraction);
                (budget / row_bytes).clamp(1, rows as u64) as usize
            }
        };

        let disk_rows = rows - resident;
        let rows_per_file = (self.config.max_file_size / row_bytes).max(1) as usize;

        if disk_rows > 0 {
            let file_count = disk_rows.div_ceil(rows_per_file);
            let mut files = Vec::with_capacity(file_count);
            for index in 0..file_count {
                let rows_in_file = rows_per_file.min(disk_rows - index * rows_per_file);
                let file = self.create_backing_file()?;
                file.set_len(rows_in_file as u64 * row_bytes).map_err(|e| {
                    SegmenterError::resource(format!("Failed to size temporary file: {e}"))
                })?;
                files.push(file);
            }
            self.files = files;
            self.swap_buffer = vec![T::zeroed(); cols];

            debug!(
                "paged matrix {rows}x{cols}: {resident} resident rows, {disk_rows} rows in {file_count} temp files"
            );
        }

        self.slots = (0..resident).map(|_| vec![T::zeroed(); cols]).collect();
        self.slot_rows = (0..resident).collect();
        self.locations = (0..rows)
            .map(|row| {
                if row < resident {
                    RowLocation::Ram(row)
                } else {
                    let index = row - resident;
                    RowLocation::Disk {
                        file: index / rows_per_file,
                        offset: (index % rows_per_file) as u64 * row_bytes,
                    }
                }
            })
            .collect();
        self.rows = rows;
        self.cols = cols;

        Ok(())
    }

    fn create_backing_file(&self) -> Result<File> {
        let file = match &self.config.temp_dir {
            Some(dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        };
        file.map_err(|e| SegmenterError::resource(format!("Failed to create temporary file: {e}")))
    }

    /// Release all RAM and delete all temporary files.
    pub fn clear(&mut self) {
        self.rows = 0;
        self.cols = 0;
        self.slots.clear();
        self.slot_rows.clear();
        self.locations.clear();
        self.files.clear();
        self.swap_buffer = Vec::new();
        self.next_victim = 0;
        self.poisoned = false;
    }

    /// Number of logical rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of rows held in RAM.
    pub fn resident_rows(&self) -> usize {
        self.slots.len()
    }

    /// Whether any row lives on disk.
    pub fn is_disk_backed(&self) -> bool {
        !self.files.is_empty()
    }

    /// Get a mutable view of a row, swapping it in from disk if needed.
    pub fn row(&mut self, index: usize) -> Result<&mut [T]> {
        if self.poisoned {
            return Err(SegmenterError::resource(
                "paged matrix is unusable after an I/O failure; reset it first",
            ));
        }
        if index >= self.rows {
            return Err(SegmenterError::out_of_bounds(format!(
                "row {index} of {}",
                self.rows
            )));
        }

        let slot = match self.locations[index] {
            RowLocation::Ram(slot) => slot,
            RowLocation::Disk { file, offset } => self.swap_in(index, file, offset)?,
        };

        Ok(&mut self.slots[slot])
    }

    fn swap_in(&mut self, index: usize, file: usize, offset: u64) -> Result<usize> {
        let slot = self.next_victim;
        let victim = self.slot_rows[slot];

        if let Err(e) = self.exchange(slot, file, offset) {
            warn!("paged matrix swap of row {index} failed: {e}");
            self.poisoned = true;
            return Err(e.into());
        }

        self.locations[victim] = RowLocation::Disk { file, offset };
        self.locations[index] = RowLocation::Ram(slot);
        self.slot_rows[slot] = index;
        self.next_victim = (slot + 1) % self.slots.len();

        Ok(slot)
    }

    fn exchange(&mut self, slot: usize, file: usize, offset: u64) -> io::Result<()> {
        let handle = &mut self.files[file];

        handle.seek(SeekFrom::Start(offset))?;
        handle.read_exact(bytemuck::cast_slice_mut(&mut self.swap_buffer[..]))?;
        handle.seek(SeekFrom::Start(offset))?;
        handle.write_all(bytemuck::cast_slice(&self.slots[slot][..]))?;

        mem::swap(&mut self.slots[slot], &mut self.swap_buffer);
        Ok(())
    }

    /// Read one element.
    pub fn get(&mut self, line: usize, col: usize) -> Result<T> {
        let cols = self.cols;
        let row = self.row(line)?;
        row.get(col)
            .copied()
            .ok_or_else(|| SegmenterError::out_of_bounds(format!("column {col} of {cols}")))
    }

    /// Write one element.
    pub fn set(&mut self, line: usize, col: usize, value: T) -> Result<()> {
        let cols = self.cols;
        let row = self.row(line)?;
        match row.get_mut(col) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(SegmenterError::out_of_bounds(format!(
                "column {col} of {cols}"
            ))),
        }
    }

    /// Set every element to `value`.
    pub fn fill(&mut self, value: T) -> Result<()> {
        for line in 0..self.rows {
            self.row(line)?.fill(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell_value(row: usize, col: usize) -> u32 {
        (row * 1000 + col) as u32
    }

    fn write_pattern(matrix: &mut PagedMatrix<u32>) {
        for r in 0..matrix.rows() {
            let row = matrix.row(r).unwrap();
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = cell_value(r, c);
            }
        }
    }

    fn check_pattern(matrix: &mut PagedMatrix<u32>) {
        for r in 0..matrix.rows() {
            for c in 0..matrix.cols() {
                assert_eq!(matrix.get(r, c).unwrap(), cell_value(r, c));
            }
        }
    }

    #[test]
    fn test_all_in_ram() {
        let mut matrix = PagedMatrix::new();
        matrix.reset(10, 7, MemoryPolicy::AllInRam).unwrap();

        assert_eq!(matrix.resident_rows(), 10);
        assert!(!matrix.is_disk_backed());

        write_pattern(&mut matrix);
        check_pattern(&mut matrix);
    }

    #[test]
    fn test_force_disk_backed_round_trip() {
        let mut matrix = PagedMatrix::new();
        matrix.reset(25, 13, MemoryPolicy::ForceDiskBacked).unwrap();

        assert_eq!(matrix.resident_rows(), 1);
        assert!(matrix.is_disk_backed());

        write_pattern(&mut matrix);
        check_pattern(&mut matrix);

        // Reverse order exercises a different eviction sequence.
        for r in (0..25).rev() {
            assert_eq!(matrix.get(r, 12).unwrap(), cell_value(r, 12));
        }
    }

    #[test]
    fn test_multiple_backing_files() {
        // Each file holds two rows of 4 bytes * 3 cols.
        let config = PagedMatrixConfig::with_policy(MemoryPolicy::ForceDiskBacked)
            .with_max_file_size(24);
        let mut matrix = PagedMatrix::with_config(config.clone());
        matrix.reset_with(9, 3, config).unwrap();

        assert_eq!(matrix.files.len(), 4);

        write_pattern(&mut matrix);
        check_pattern(&mut matrix);
    }

    #[test]
    fn test_auto_policy_with_zero_budget_keeps_one_row() {
        let config =
            PagedMatrixConfig::with_policy(MemoryPolicy::AutoDiskBacked).with_max_ram_fraction(0.0);
        let mut matrix: PagedMatrix<f64> = PagedMatrix::new();
        matrix.reset_with(6, 2, config).unwrap();

        assert_eq!(matrix.resident_rows(), 1);

        for r in 0..6 {
            matrix.set(r, 1, r as f64 * 0.5).unwrap();
        }
        for r in 0..6 {
            assert_eq!(matrix.get(r, 1).unwrap(), r as f64 * 0.5);
            assert_eq!(matrix.get(r, 0).unwrap(), 0.0);
        }
    }

    #[test]
    fn test_out_of_bounds() {
        let mut matrix: PagedMatrix<u32> = PagedMatrix::new();
        matrix.reset(2, 2, MemoryPolicy::AllInRam).unwrap();

        assert!(matrix.row(2).is_err());
        assert!(matrix.get(0, 2).is_err());
        assert!(matrix.set(1, 5, 1).is_err());
    }

    #[test]
    fn test_reset_discards_content() {
        let mut matrix = PagedMatrix::new();
        matrix.reset(4, 4, MemoryPolicy::ForceDiskBacked).unwrap();
        write_pattern(&mut matrix);

        matrix.reset(3, 5, MemoryPolicy::AllInRam).unwrap();
        assert_eq!(matrix.rows(), 3);
        assert_eq!(matrix.cols(), 5);
        for r in 0..3 {
            assert!(matrix.row(r).unwrap().iter().all(|&v| v == 0));
        }

        matrix.clear();
        assert_eq!(matrix.rows(), 0);
        assert!(matrix.row(0).is_err());
    }

    #[test]
    fn test_fill() {
        let mut matrix = PagedMatrix::new();
        matrix.reset(5, 3, MemoryPolicy::ForceDiskBacked).unwrap();
        matrix.fill(9u32).unwrap();

        for r in 0..5 {
            assert_eq!(matrix.row(r).unwrap().to_vec(), vec![9, 9, 9]);
        }
    }

    #[test]
    fn test_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = PagedMatrixConfig::with_policy(MemoryPolicy::ForceDiskBacked)
            .with_temp_dir(dir.path());
        let mut matrix = PagedMatrix::with_config(config);
        matrix.reset(4, 2, MemoryPolicy::ForceDiskBacked).unwrap();

        write_pattern(&mut matrix);
        check_pattern(&mut matrix);
    }

    #[test]
    fn test_missing_temp_dir_fails() {
        let config = PagedMatrixConfig::with_policy(MemoryPolicy::ForceDiskBacked)
            .with_temp_dir("/nonexistent/segmenta/tmp");
        let mut matrix: PagedMatrix<u32> = PagedMatrix::with_config(config);

        assert!(matrix.reset(4, 2, MemoryPolicy::ForceDiskBacked).is_err());
    }
}
