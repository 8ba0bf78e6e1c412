//! Progress reporting and cooperative cancellation.

/// Receives progress updates from the driver thread.
///
/// `report` gets a monotonically increasing step count and the total number of
/// steps. Returning `false` from `is_active` cancels the run.
pub trait ProgressSink {
    fn report(&mut self, step: usize, total: usize);

    fn is_active(&self) -> bool {
        true
    }
}

/// Sink that ignores every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _step: usize, _total: usize) {}
}

impl<F> ProgressSink for F
where
    F: FnMut(usize, usize),
{
    fn report(&mut self, step: usize, total: usize) {
        self(step, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = |step: usize, total: usize| seen.push((step, total));
            sink.report(1, 3);
            sink.report(2, 3);
            assert!(sink.is_active());
        }
        assert_eq!(seen, vec![(1, 3), (2, 3)]);
    }

    #[test]
    fn test_no_progress() {
        let mut sink = NoProgress;
        sink.report(5, 10);
        assert!(sink.is_active());
    }
}
