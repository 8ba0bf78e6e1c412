//! Integration tests for out-of-core matrices.

use segmenta::error::Result;
use segmenta::matrix::{MemoryPolicy, PagedMatrix, PagedMatrixConfig};

fn cell_value(row: usize, col: usize) -> u64 {
    (row as u64) * 1_000_003 + col as u64 * 31 + 7
}

fn write_then_read(matrix: &mut PagedMatrix<u64>) -> Result<()> {
    for row in 0..matrix.rows() {
        for (col, cell) in matrix.row(row)?.iter_mut().enumerate() {
            *cell = cell_value(row, col);
        }
    }

    // Read back in reverse to force swaps in the other direction.
    for row in (0..matrix.rows()).rev() {
        for col in 0..matrix.cols() {
            assert_eq!(matrix.get(row, col)?, cell_value(row, col));
        }
    }
    Ok(())
}

#[test]
fn test_round_trip_all_policies() -> Result<()> {
    for policy in [
        MemoryPolicy::AllInRam,
        MemoryPolicy::ForceDiskBacked,
        MemoryPolicy::AutoDiskBacked,
    ] {
        for (rows, cols) in [(1, 1), (3, 17), (40, 5)] {
            let mut matrix = PagedMatrix::new();
            matrix.reset(rows, cols, policy)?;
            write_then_read(&mut matrix)?;
        }
    }
    Ok(())
}

#[test]
fn test_round_trip_beyond_ram_budget() -> Result<()> {
    // A zero RAM fraction leaves a single resident row.
    let config = PagedMatrixConfig::with_policy(MemoryPolicy::AutoDiskBacked)
        .with_max_ram_fraction(0.0)
        .with_max_file_size(256);
    let mut matrix = PagedMatrix::with_config(config.clone());
    matrix.reset_with(64, 9, config)?;

    assert_eq!(matrix.resident_rows(), 1);
    assert!(matrix.is_disk_backed());
    write_then_read(&mut matrix)
}

#[test]
fn test_interleaved_row_access() -> Result<()> {
    let mut matrix: PagedMatrix<u32> = PagedMatrix::new();
    matrix.reset(10, 4, MemoryPolicy::ForceDiskBacked)?;

    for step in 0..50u32 {
        let row = (step as usize * 7) % 10;
        let cell = &mut matrix.row(row)?[step as usize % 4];
        *cell += step;
    }

    let mut total = 0u64;
    for row in 0..10 {
        total += matrix.row(row)?.iter().map(|&v| v as u64).sum::<u64>();
    }
    assert_eq!(total, (0..50u64).sum::<u64>());
    Ok(())
}

#[test]
fn test_temp_dir_backing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = PagedMatrixConfig::with_policy(MemoryPolicy::ForceDiskBacked)
        .with_temp_dir(dir.path());
    let mut matrix = PagedMatrix::with_config(config);
    matrix.reset(12, 3, MemoryPolicy::ForceDiskBacked)?;

    write_then_read(&mut matrix)?;
    matrix.clear();
    assert_eq!(matrix.rows(), 0);
    Ok(())
}
