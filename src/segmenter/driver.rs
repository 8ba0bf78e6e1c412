//! Block-parallel segmentation driver.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ahash::AHashSet;
use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use rayon::ThreadPoolBuilder;

use crate::error::{Result, SegmenterError};
use crate::matrix::memory::memory_budget;
use crate::matrix::{MemoryPolicy, PagedMatrix};
use crate::raster::{BandNormalization, Raster};
use crate::region_growing::{EngineParams, EngineState, RegionGrowingEngine};
use crate::segment::{INVALID_SEGMENT_ID, SegmentId, SegmentIdAllocator};
use crate::segmenter::blocks::{Block, BlockLayout, Rect};
use crate::segmenter::components::split_disconnected;
use crate::segmenter::config::SegmenterConfig;
use crate::segmenter::progress::ProgressSink;
use crate::segmenter::stitch::IdUnion;
use crate::strategy::create_strategy;

/// Summary of a segmentation run.
#[derive(Debug, Clone, Default)]
pub struct SegmentationReport {
    /// Blocks in the layout.
    pub blocks: usize,
    /// Blocks whose result was written to the output.
    pub blocks_completed: usize,
    /// Segments in the output.
    pub segments: usize,
    /// Merges performed inside blocks.
    pub merges: usize,
    /// Merges performed across block seams.
    pub stitched_merges: usize,
    /// The run was cancelled before finishing.
    pub aborted: bool,
    pub elapsed: Duration,
}

/// Segments a raster into regions of similar pixels.
///
/// The raster is split into blocks that are segmented independently on a
/// worker pool; segments straddling block seams are stitched together
/// afterwards.
///
/// ```
/// use segmenta::prelude::*;
///
/// let input = MemoryRaster::from_fn(4, 4, 1, |col, _, _| if col < 2 { 10.0 } else { 200.0 });
/// let mut output = MemoryRaster::new(4, 4, 1);
///
/// let config = SegmenterConfig::default()
///     .with_min_segment_size(1)
///     .with_similarity_threshold(0.1);
/// let driver = SegmenterDriver::new(config).unwrap();
/// let report = driver.segment(&input, &mut output, &mut NoProgress).unwrap();
///
/// assert_eq!(report.segments, 2);
/// ```
#[derive(Debug)]
pub struct SegmenterDriver {
    config: SegmenterConfig,
    abort: Arc<AtomicBool>,
}

/// State shared by the workers of one run.
struct SharedState<'a, 'o> {
    input: Mutex<&'a dyn Raster>,
    output: Mutex<&'a mut (dyn Raster + 'o)>,
    allocator: &'a SegmentIdAllocator,
    normalization: &'a BandNormalization,
    config: &'a SegmenterConfig,
    /// The driver's user-facing abort flag.
    abort: &'a AtomicBool,
    /// Raised on user abort, cancelled progress or the first block error.
    stop: AtomicBool,
    board: Mutex<BlockBoard>,
    block_done: Condvar,
}

impl SharedState<'_, '_> {
    /// Whether workers should stop picking up blocks. Mirrors the user abort
    /// flag into the run-local stop flag.
    fn should_stop(&self) -> bool {
        if self.abort.load(Ordering::SeqCst) {
            self.stop.store(true, Ordering::SeqCst);
        }
        self.stop.load(Ordering::SeqCst)
    }
}

/// Bookkeeping guarded by the general mutex.
#[derive(Default)]
struct BlockBoard {
    running: usize,
    /// Blocks picked up and finished, committed or not.
    finished: usize,
    completed: usize,
    merges: usize,
    workers_exited: usize,
    error: Option<SegmenterError>,
}

#[derive(Debug, Default)]
struct BlockSummary {
    completed: usize,
    merges: usize,
    aborted: bool,
}

impl SegmenterDriver {
    /// Create a driver, rejecting invalid settings up front.
    pub fn new(config: SegmenterConfig) -> Result<Self> {
        config.validate_parameters()?;
        create_strategy(&config)?;
        Ok(SegmenterDriver {
            config,
            abort: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Flag that cancels the run when raised. It stays raised until
    /// [`reset_abort`](Self::reset_abort).
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn reset_abort(&self) {
        self.abort.store(false, Ordering::SeqCst);
    }

    fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Segment `input` and write one segment ID per pixel into band 0 of
    /// `output`. No-data pixels get ID 0.
    ///
    /// A cancelled run returns a report with `aborted` set; blocks finished
    /// before the cancellation keep their output.
    pub fn segment(
        &self,
        input: &dyn Raster,
        output: &mut dyn Raster,
        progress: &mut dyn ProgressSink,
    ) -> Result<SegmentationReport> {
        let start = Instant::now();
        self.validate_rasters(input, output)?;

        let mut report = SegmentationReport::default();
        if self.is_aborted() {
            warn!("segmentation aborted before start");
            report.aborted = true;
            report.elapsed = start.elapsed();
            return Ok(report);
        }

        let normalization = BandNormalization::compute(input, &self.config.bands_to_use)?;
        let layout = self.layout_for(input)?;
        let strips = if self.config.enable_block_merging {
            layout.seam_strips()
        } else {
            Vec::new()
        };
        let total_steps = layout.len() + strips.len();
        report.blocks = layout.len();
        info!(
            "segmenting {}x{} raster in {} blocks of {}x{} (overlap {}), {} seam strips",
            input.cols(),
            input.rows(),
            layout.len(),
            layout.block_width,
            layout.block_height,
            layout.overlap,
            strips.len()
        );

        let allocator = SegmentIdAllocator::new();
        let summary = self.process_blocks(
            input,
            output,
            &layout,
            &normalization,
            &allocator,
            progress,
            total_steps,
        )?;
        report.blocks_completed = summary.completed;
        report.merges = summary.merges;
        report.aborted = summary.aborted;

        if !report.aborted && !strips.is_empty() {
            let (merges, aborted) = self.stitch_seams(
                input,
                output,
                &strips,
                &normalization,
                &allocator,
                progress,
                layout.len(),
                total_steps,
            )?;
            report.stitched_merges = merges;
            report.aborted = aborted;
        }

        report.segments = allocator.live_count();
        report.elapsed = start.elapsed();
        info!(
            "segmentation finished: {} segments, {} merges, {} stitched, aborted: {}, {:?}",
            report.segments, report.merges, report.stitched_merges, report.aborted, report.elapsed
        );
        Ok(report)
    }

    fn validate_rasters(&self, input: &dyn Raster, output: &dyn Raster) -> Result<()> {
        if input.rows() == 0 || input.cols() == 0 {
            return Err(SegmenterError::config("Input raster is empty"));
        }
        self.config.validate(input.bands())?;
        if output.rows() != input.rows() || output.cols() != input.cols() {
            return Err(SegmenterError::raster(format!(
                "Output raster {}x{} does not match input {}x{}",
                output.cols(),
                output.rows(),
                input.cols(),
                input.rows()
            )));
        }
        if output.bands() == 0 {
            return Err(SegmenterError::raster("Output raster has no bands"));
        }
        Ok(())
    }

    fn layout_for(&self, input: &dyn Raster) -> Result<BlockLayout> {
        let (cols, rows) = (input.cols(), input.rows());
        if !self.config.enable_block_processing {
            return Ok(BlockLayout::single(cols, rows));
        }

        let strategy = create_strategy(&self.config)?;
        let max_pixels = if self.config.max_block_size > 0 {
            self.config.max_block_size
        } else {
            let bands = self.config.bands_to_use.len();
            let per_pixel = strategy.mem_usage_estimation(bands, 1).max(1) as u64;
            let threads = self.config.effective_threads().max(1) as u64;
            let budget = memory_budget(self.config.max_memory_fraction) / threads;
            (budget / per_pixel).max(1) as usize
        };

        Ok(BlockLayout::compute(
            cols,
            rows,
            max_pixels,
            self.config.block_overlap_percent,
            strategy.optimal_blocks_overlap_size(),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn process_blocks(
        &self,
        input: &dyn Raster,
        output: &mut dyn Raster,
        layout: &BlockLayout,
        normalization: &BandNormalization,
        allocator: &SegmentIdAllocator,
        progress: &mut dyn ProgressSink,
        total_steps: usize,
    ) -> Result<BlockSummary> {
        let workers = self.config.effective_threads().min(layout.len()).max(1);
        let (sender, receiver) = crossbeam_channel::unbounded();
        for block in layout.blocks() {
            sender
                .send(*block)
                .map_err(|e| SegmenterError::internal(format!("Failed to queue block: {e}")))?;
        }
        drop(sender);

        let shared = SharedState {
            input: Mutex::new(input),
            output: Mutex::new(output),
            allocator,
            normalization,
            config: &self.config,
            abort: &self.abort,
            stop: AtomicBool::new(false),
            board: Mutex::new(BlockBoard::default()),
            block_done: Condvar::new(),
        };

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("segmenter-block-{i}"))
            .build()
            .map_err(|e| SegmenterError::internal(format!("Failed to create thread pool: {e}")))?;

        debug!("dispatching {} blocks to {} workers", layout.len(), workers);
        pool.in_place_scope(|scope| {
            for worker in 0..workers {
                let shared = &shared;
                let receiver = receiver.clone();
                scope.spawn(move |_| run_worker(worker, shared, receiver));
            }
            self.wait_for_workers(&shared, workers, progress, total_steps)
        })
    }

    /// Block the calling thread until every worker exits, forwarding
    /// progress and cancellation in the meantime.
    fn wait_for_workers(
        &self,
        shared: &SharedState<'_, '_>,
        workers: usize,
        progress: &mut dyn ProgressSink,
        total_steps: usize,
    ) -> Result<BlockSummary> {
        let mut board = shared.board.lock();
        let mut reported = None;

        while board.workers_exited < workers {
            let finished = board.finished;
            let active = MutexGuard::unlocked(&mut board, || {
                if reported != Some(finished) {
                    progress.report(finished, total_steps);
                    reported = Some(finished);
                }
                progress.is_active()
            });

            if (!active || self.is_aborted()) && !shared.stop.swap(true, Ordering::SeqCst) {
                warn!("segmentation cancelled with {} blocks running", board.running);
            }
            if board.workers_exited < workers {
                shared.block_done.wait_for(&mut board, Duration::from_millis(50));
            }
        }

        if let Some(error) = board.error.take() {
            return Err(error);
        }
        let summary = BlockSummary {
            completed: board.completed,
            merges: board.merges,
            aborted: shared.stop.load(Ordering::SeqCst),
        };
        let finished = board.finished;
        drop(board);
        progress.report(finished, total_steps);
        Ok(summary)
    }

    /// Re-grow segments inside strips around the block seams and relabel the
    /// output with the merged IDs.
    ///
    /// Returns the number of seam merges and whether the run was cancelled.
    #[allow(clippy::too_many_arguments)]
    fn stitch_seams(
        &self,
        input: &dyn Raster,
        output: &mut dyn Raster,
        strips: &[Rect],
        normalization: &BandNormalization,
        allocator: &SegmentIdAllocator,
        progress: &mut dyn ProgressSink,
        steps_done: usize,
        total_steps: usize,
    ) -> Result<(usize, bool)> {
        let params = EngineParams::from_config(&self.config).with_min_segment_size(1);
        let mut engine = RegionGrowingEngine::new(params, create_strategy(&self.config)?);
        let mut pixels = PagedMatrix::with_config(self.config.matrix.clone());
        let mut ids = PagedMatrix::with_config(self.config.matrix.clone());
        let mut raw = Vec::new();
        let mut union = IdUnion::new();
        let bands = self.config.bands_to_use.len();
        let mut merges = 0;
        let mut aborted = false;

        for (i, strip) in strips.iter().enumerate() {
            if self.is_aborted() || !progress.is_active() {
                aborted = true;
                break;
            }

            load_window(
                input,
                normalization,
                *strip,
                &mut pixels,
                self.config.matrix.policy,
                &mut raw,
            )?;
            ids.reset(strip.height, strip.width, self.config.matrix.policy)?;
            for y in 0..strip.height {
                let row = ids.row(y)?;
                for (x, id) in row.iter_mut().enumerate() {
                    let value = output.value(strip.x + x, strip.y + y, 0)? as SegmentId;
                    *id = if value == INVALID_SEGMENT_ID {
                        INVALID_SEGMENT_ID
                    } else {
                        union.find(value)
                    };
                }
            }

            engine.seed_from_partition(&mut pixels, &mut ids, bands)?;
            let outcome = engine.grow(&mut ids, allocator, &self.abort)?;
            // Absorbed IDs are already released, so even an aborted strip's
            // merges must reach the relabel.
            merges += union.union_all(&outcome.merge_log);
            if outcome.state == EngineState::Aborted {
                aborted = true;
                break;
            }
            progress.report(steps_done + i + 1, total_steps);
        }

        if !union.is_empty() {
            for row in 0..output.rows() {
                for col in 0..output.cols() {
                    let id = output.value(col, row, 0)? as SegmentId;
                    if id == INVALID_SEGMENT_ID {
                        continue;
                    }
                    let root = union.find(id);
                    if root != id {
                        output.set_value(col, row, 0, root as f64)?;
                    }
                }
            }
        }
        debug!("stitched {} seam strips with {} merges", strips.len(), merges);
        Ok((merges, aborted))
    }
}

/// Read `window` of the input into `pixels`, normalized and band-interleaved.
fn load_window(
    input: &dyn Raster,
    normalization: &BandNormalization,
    window: Rect,
    pixels: &mut PagedMatrix<f64>,
    policy: MemoryPolicy,
    raw: &mut Vec<f64>,
) -> Result<()> {
    let bands = normalization.bands();
    pixels.reset(window.height, window.width * bands.len(), policy)?;
    raw.resize(bands.len(), 0.0);

    for y in 0..window.height {
        let row = pixels.row(y)?;
        for (x, out) in row.chunks_exact_mut(bands.len()).enumerate() {
            for (slot, &band) in raw.iter_mut().zip(bands) {
                *slot = input.value(window.x + x, window.y + y, band)?;
            }
            normalization.normalize(input, raw, out);
        }
    }
    Ok(())
}

/// Per-worker resources, reused across the blocks a worker processes.
struct BlockWorker {
    engine: RegionGrowingEngine,
    pixels: PagedMatrix<f64>,
    ids: PagedMatrix<SegmentId>,
    raw: Vec<f64>,
    /// Core labels of the current block, row-major.
    core_ids: Vec<SegmentId>,
}

impl BlockWorker {
    fn new(config: &SegmenterConfig) -> Result<Self> {
        let strategy = create_strategy(config)?;
        Ok(BlockWorker {
            engine: RegionGrowingEngine::new(EngineParams::from_config(config), strategy),
            pixels: PagedMatrix::with_config(config.matrix.clone()),
            ids: PagedMatrix::with_config(config.matrix.clone()),
            raw: Vec::new(),
            core_ids: Vec::new(),
        })
    }

    /// Segment one block and commit its core. Returns the merge count; an
    /// aborted block is reported as a cancellation error and commits nothing.
    fn process(&mut self, block: &Block, shared: &SharedState<'_, '_>) -> Result<usize> {
        let window = block.extended;
        let policy = shared.config.matrix.policy;
        let bands = shared.config.bands_to_use.len();

        {
            let input = shared.input.lock();
            load_window(
                *input,
                shared.normalization,
                window,
                &mut self.pixels,
                policy,
                &mut self.raw,
            )?;
        }
        self.ids.reset(window.height, window.width, policy)?;

        self.engine
            .seed_from_pixels(&mut self.pixels, &mut self.ids, bands, shared.allocator)?;
        let outcome = self
            .engine
            .grow(&mut self.ids, shared.allocator, &shared.stop)?;
        if outcome.state == EngineState::Aborted {
            shared.allocator.release_many(&self.engine.active_ids());
            return Err(SegmenterError::cancelled(format!(
                "block {} aborted after {} iterations",
                block.index, outcome.iterations
            )));
        }

        // Segments joined only through the margin fall apart in the core.
        let core = block.core;
        self.core_ids.clear();
        for y in core.y..core.y_bound() {
            let row = self.ids.row(y - window.y)?;
            self.core_ids
                .extend_from_slice(&row[core.x - window.x..core.x_bound() - window.x]);
        }
        let split = split_disconnected(
            &mut self.core_ids,
            core.width,
            core.height,
            shared.allocator,
        )?;

        let in_core: AHashSet<SegmentId> = self.core_ids.iter().copied().collect();
        {
            let mut output = shared.output.lock();
            for (y, row) in self.core_ids.chunks_exact(core.width).enumerate() {
                for (x, &id) in row.iter().enumerate() {
                    output.set_value(core.x + x, core.y + y, 0, id as f64)?;
                }
            }
        }

        let margin_only: Vec<SegmentId> = self
            .engine
            .active_ids()
            .into_iter()
            .filter(|id| !in_core.contains(id))
            .collect();
        shared.allocator.release_many(&margin_only);

        debug!(
            "block {} committed: {} merges, {} segments, {} split, {} margin-only released",
            block.index,
            outcome.merges,
            outcome.active_segments,
            split,
            margin_only.len()
        );
        Ok(outcome.merges)
    }
}

fn run_worker(worker: usize, shared: &SharedState<'_, '_>, receiver: Receiver<Block>) {
    match BlockWorker::new(shared.config) {
        Ok(mut context) => {
            while let Ok(block) = receiver.recv() {
                if shared.should_stop() {
                    break;
                }
                shared.board.lock().running += 1;

                let attempt = AssertUnwindSafe(|| context.process(&block, shared));
                let result = panic::catch_unwind(attempt).unwrap_or_else(|payload| {
                    Err(SegmenterError::ThreadJoin(format!(
                        "worker {worker} panicked on block {}: {}",
                        block.index,
                        panic_message(payload.as_ref())
                    )))
                });

                let mut board = shared.board.lock();
                board.running -= 1;
                board.finished += 1;
                match result {
                    Ok(merges) => {
                        board.completed += 1;
                        board.merges += merges;
                    }
                    Err(error) if error.is_cancelled() => {
                        debug!("{error}");
                    }
                    Err(error) => {
                        warn!("block {} failed: {}", block.index, error);
                        if board.error.is_none() {
                            board.error = Some(error);
                        }
                        shared.stop.store(true, Ordering::SeqCst);
                    }
                }
                drop(board);
                shared.block_done.notify_all();
            }
        }
        Err(error) => {
            let mut board = shared.board.lock();
            if board.error.is_none() {
                board.error = Some(error);
            }
            shared.stop.store(true, Ordering::SeqCst);
        }
    }

    shared.board.lock().workers_exited += 1;
    shared.block_done.notify_all();
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::MemoryRaster;
    use crate::segmenter::progress::NoProgress;

    fn two_tone(rows: usize, cols: usize, boundary: usize) -> MemoryRaster {
        MemoryRaster::from_fn(rows, cols, 1, move |col, _, _| {
            if col < boundary { 10.0 } else { 200.0 }
        })
    }

    fn config() -> SegmenterConfig {
        SegmenterConfig::default()
            .with_min_segment_size(1)
            .with_similarity_threshold(0.1)
    }

    #[test]
    fn test_single_block_two_regions() {
        let input = two_tone(4, 6, 3);
        let mut output = MemoryRaster::new(4, 6, 1);
        let driver = SegmenterDriver::new(config().with_block_processing(false, 0)).unwrap();

        let report = driver.segment(&input, &mut output, &mut NoProgress).unwrap();

        assert_eq!(report.blocks, 1);
        assert_eq!(report.blocks_completed, 1);
        assert_eq!(report.segments, 2);
        assert!(!report.aborted);
        let ids = output.band_values(0);
        assert!(ids.iter().all(|&id| id > 0.0));
        assert_ne!(ids[0], ids[5]);
    }

    #[test]
    fn test_output_shape_mismatch() {
        let input = two_tone(4, 4, 2);
        let mut output = MemoryRaster::new(3, 4, 1);
        let driver = SegmenterDriver::new(config()).unwrap();

        let result = driver.segment(&input, &mut output, &mut NoProgress);
        assert!(matches!(result, Err(SegmenterError::Raster(_))));
    }

    #[test]
    fn test_invalid_band_rejected_before_processing() {
        let input = two_tone(2, 2, 1);
        let mut output = MemoryRaster::new(2, 2, 1);
        let driver = SegmenterDriver::new(config().with_bands(vec![3])).unwrap();

        let result = driver.segment(&input, &mut output, &mut NoProgress);
        assert!(matches!(result, Err(SegmenterError::Config(_))));
        assert!(output.band_values(0).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_invalid_config_rejected_by_new() {
        assert!(SegmenterDriver::new(config().with_similarity_threshold(2.0)).is_err());
    }

    #[test]
    fn test_abort_before_start_leaves_output_untouched() {
        let input = two_tone(4, 4, 2);
        let mut output = MemoryRaster::new(4, 4, 1);
        let driver = SegmenterDriver::new(config()).unwrap();
        driver.abort_handle().store(true, Ordering::SeqCst);

        let report = driver.segment(&input, &mut output, &mut NoProgress).unwrap();

        assert!(report.aborted);
        assert_eq!(report.blocks_completed, 0);
        assert!(output.band_values(0).iter().all(|&v| v == 0.0));

        driver.reset_abort();
        let report = driver.segment(&input, &mut output, &mut NoProgress).unwrap();
        assert!(!report.aborted);
    }

    #[test]
    fn test_progress_reaches_total() {
        let input = two_tone(8, 8, 4);
        let mut output = MemoryRaster::new(8, 8, 1);
        let driver = SegmenterDriver::new(config().with_block_processing(true, 16)).unwrap();
        let mut steps = Vec::new();

        let report = driver
            .segment(&input, &mut output, &mut |step: usize, total: usize| {
                steps.push((step, total))
            })
            .unwrap();

        let (last, total) = *steps.last().unwrap();
        assert_eq!(last, total);
        assert!(steps.windows(2).all(|pair| pair[0].0 <= pair[1].0));
        assert_eq!(report.blocks, 4);
        assert_eq!(report.segments, 2);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
