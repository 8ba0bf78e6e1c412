//! Physical memory probing.

use sysinfo::System;

/// Bytes of memory currently available to new allocations.
///
/// Falls back to free memory on platforms where the available figure is not
/// reported.
pub fn available_memory_bytes() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();

    match sys.available_memory() {
        0 => sys.free_memory(),
        available => available,
    }
}

/// Bytes available for a budget expressed as a fraction of available memory.
pub fn memory_budget(fraction: f64) -> u64 {
    if fraction <= 0.0 {
        return 0;
    }
    (available_memory_bytes() as f64 * fraction.min(1.0)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_bounds() {
        assert_eq!(memory_budget(0.0), 0);
        assert_eq!(memory_budget(-1.0), 0);
    }
}
