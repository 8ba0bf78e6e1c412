//! Iterative best-fit region growing over one raster window.

use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashMap;
use log::{debug, trace};

use crate::error::{Result, SegmenterError};
use crate::matrix::PagedMatrix;
use crate::region_growing::params::EngineParams;
use crate::segment::{
    INVALID_SEGMENT_ID, SegmentHandle, SegmentId, SegmentIdAllocator, SegmentPool,
};
use crate::strategy::{DissimilarityStrategy, MergePreview, SegmentSeed};

/// Lifecycle of an engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing seeded yet.
    Empty,
    Seeded,
    Growing,
    /// A full pass at the ceiling threshold merged nothing, or a single
    /// segment is left.
    Converged,
    IterationCapReached,
    /// The abort flag was raised between iterations.
    Aborted,
}

/// Summary of a [`RegionGrowingEngine::grow`] call.
#[derive(Debug, Clone)]
pub struct GrowthOutcome {
    pub state: EngineState,
    pub iterations: u16,
    pub merges: usize,
    pub active_segments: usize,
    /// Threshold of the last growth pass.
    pub final_threshold: f64,
    /// `(survivor_id, absorbed_id)` for every merge, in order.
    pub merge_log: Vec<(SegmentId, SegmentId)>,
}

/// How one merge pass picks its candidates.
#[derive(Debug, Clone, Copy)]
struct PassRules {
    iteration: u16,
    threshold: f64,
    /// Only segments below this size look for a neighbor.
    size_limit: Option<usize>,
    mutual_best_fit: bool,
    same_iteration_merges: bool,
}

/// Region-growing engine for one window.
///
/// Owns its segment pool and strategy; the pixel and ID matrices are borrowed
/// per call so the caller can keep reusing them across blocks.
///
/// Pixel matrices are laid out band-interleaved: `rows × (cols · bands)`, with
/// `NaN` marking no-data. ID matrices are `rows × cols`.
#[derive(Debug)]
pub struct RegionGrowingEngine {
    params: EngineParams,
    strategy: Box<dyn DissimilarityStrategy>,
    pool: SegmentPool,
    handles: AHashMap<SegmentId, SegmentHandle>,
    state: EngineState,
    preview: MergePreview,
    candidate: MergePreview,
    neighbor_scratch: Vec<SegmentHandle>,
}

impl RegionGrowingEngine {
    pub fn new(params: EngineParams, strategy: Box<dyn DissimilarityStrategy>) -> Self {
        let features = strategy.feature_vector_size();
        Self {
            params,
            strategy,
            pool: SegmentPool::new(),
            handles: AHashMap::new(),
            state: EngineState::Empty,
            preview: MergePreview::new(features),
            candidate: MergePreview::new(features),
            neighbor_scratch: Vec::new(),
        }
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    pub fn set_params(&mut self, params: EngineParams) {
        self.params = params;
    }

    pub fn strategy(&self) -> &dyn DissimilarityStrategy {
        self.strategy.as_ref()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn pool(&self) -> &SegmentPool {
        &self.pool
    }

    /// Handle of the active segment carrying `id`.
    pub fn handle_of(&self, id: SegmentId) -> Option<SegmentHandle> {
        self.handles.get(&id).copied()
    }

    pub fn active_count(&self) -> usize {
        self.pool.active_count()
    }

    /// IDs of all active segments, in active-list order.
    pub fn active_ids(&self) -> Vec<SegmentId> {
        self.pool
            .active_iter()
            .map(|handle| self.pool.segment(handle).id)
            .collect()
    }

    fn check_shapes(
        pixels: &PagedMatrix<f64>,
        ids: &PagedMatrix<SegmentId>,
        bands: usize,
    ) -> Result<()> {
        if bands == 0 {
            return Err(SegmenterError::config("At least one band is required"));
        }
        if pixels.rows() != ids.rows() || pixels.cols() != ids.cols() * bands {
            return Err(SegmenterError::internal(format!(
                "pixel matrix {}x{} does not match id matrix {}x{} with {} bands",
                pixels.rows(),
                pixels.cols(),
                ids.rows(),
                ids.cols(),
                bands
            )));
        }
        Ok(())
    }

    fn prepare(&mut self, capacity: usize) {
        self.pool
            .initialize(capacity, self.strategy.feature_vector_size());
        self.handles.clear();
        self.state = EngineState::Empty;
    }

    fn connect(&mut self, a: SegmentHandle, b: SegmentHandle) {
        self.pool.segment_mut(a).neighbors.insert(b);
        self.pool.segment_mut(b).neighbors.insert(a);
    }

    /// Seed one segment per valid pixel.
    ///
    /// No-data pixels get [`INVALID_SEGMENT_ID`] and no segment. IDs are taken
    /// from `allocator` in one batch; running out is an allocation error.
    pub fn seed_from_pixels(
        &mut self,
        pixels: &mut PagedMatrix<f64>,
        ids: &mut PagedMatrix<SegmentId>,
        bands: usize,
        allocator: &SegmentIdAllocator,
    ) -> Result<()> {
        Self::check_shapes(pixels, ids, bands)?;
        let (rows, cols) = (ids.rows(), ids.cols());
        self.prepare(rows * cols);

        let mut valid = 0usize;
        for y in 0..rows {
            valid += pixels
                .row(y)?
                .chunks_exact(bands)
                .filter(|values| values.iter().all(|v| !v.is_nan()))
                .count();
        }
        let mut fresh = allocator
            .acquire_many(valid)
            .ok_or_else(|| {
                SegmenterError::allocation(format!("Unable to acquire {valid} segment ids"))
            })?
            .into_iter();

        let mut seed = SegmentSeed::new(bands);
        let mut previous: Vec<Option<SegmentHandle>> = vec![None; cols];
        let mut current: Vec<Option<SegmentHandle>> = vec![None; cols];

        for y in 0..rows {
            let pixel_row = pixels.row(y)?;
            let id_row = ids.row(y)?;

            for x in 0..cols {
                let values = &pixel_row[x * bands..(x + 1) * bands];
                if values.iter().any(|v| v.is_nan()) {
                    id_row[x] = INVALID_SEGMENT_ID;
                    current[x] = None;
                    continue;
                }

                let handle = self
                    .pool
                    .next_segment()
                    .ok_or_else(|| SegmenterError::internal("segment pool exhausted"))?;
                let id = fresh
                    .next()
                    .ok_or_else(|| SegmenterError::internal("segment id batch exhausted"))?;

                seed.set_pixel(x, y, values);
                let (segment, features) = self.pool.parts_mut(handle);
                segment.id = id;
                segment.size = 1;
                segment.bbox = seed.bbox;
                self.strategy.initialize_segment(&seed, features);
                self.pool.link_active(handle);
                self.handles.insert(id, handle);

                id_row[x] = id;
                current[x] = Some(handle);
                if let Some(left) = x.checked_sub(1).and_then(|left| current[left]) {
                    self.connect(handle, left);
                }
                if let Some(up) = previous[x] {
                    self.connect(handle, up);
                }
            }
            std::mem::swap(&mut previous, &mut current);
        }

        self.state = EngineState::Seeded;
        debug!(
            "seeded {} segments from a {}x{} window ({} no-data pixels)",
            self.pool.active_count(),
            cols,
            rows,
            rows * cols - valid
        );
        Ok(())
    }

    /// Seed one segment per distinct non-zero ID already present in `ids`.
    ///
    /// Each ID is expected to label a connected region; features and edge
    /// lengths are aggregated from every pixel carrying it.
    pub fn seed_from_partition(
        &mut self,
        pixels: &mut PagedMatrix<f64>,
        ids: &mut PagedMatrix<SegmentId>,
        bands: usize,
    ) -> Result<()> {
        Self::check_shapes(pixels, ids, bands)?;
        let (rows, cols) = (ids.rows(), ids.cols());
        self.prepare(rows * cols);

        let mut seeds: Vec<SegmentSeed> = Vec::new();
        let mut previous: Vec<SegmentId> = vec![INVALID_SEGMENT_ID; cols];

        for y in 0..rows {
            let pixel_row = pixels.row(y)?;
            let id_row = ids.row(y)?;

            for x in 0..cols {
                let id = id_row[x];
                let up = previous[x];

                // Bottom side of the pixel above.
                if up != INVALID_SEGMENT_ID && up != id {
                    if let Some(&handle) = self.handles.get(&up) {
                        seeds[handle.index()].edge_length += 1.0;
                    }
                }
                if id == INVALID_SEGMENT_ID {
                    continue;
                }

                let values = &pixel_row[x * bands..(x + 1) * bands];
                let handle = match self.handles.get(&id) {
                    Some(&handle) => {
                        seeds[handle.index()].add_pixel(x, y, values);
                        handle
                    }
                    None => {
                        let handle = self
                            .pool
                            .next_segment()
                            .ok_or_else(|| SegmenterError::internal("segment pool exhausted"))?;
                        let mut seed = SegmentSeed::new(bands);
                        seed.set_pixel(x, y, values);
                        seed.edge_length = 0.0;
                        seeds.push(seed);
                        self.pool.segment_mut(handle).id = id;
                        self.handles.insert(id, handle);
                        handle
                    }
                };

                let left = if x > 0 { id_row[x - 1] } else { INVALID_SEGMENT_ID };
                let right = if x + 1 < cols { id_row[x + 1] } else { INVALID_SEGMENT_ID };
                let sides = [left, right, up]
                    .iter()
                    .filter(|&&other| other != id)
                    .count();
                seeds[handle.index()].edge_length += sides as f64;

                for other in [left, up] {
                    if other != id && other != INVALID_SEGMENT_ID {
                        if let Some(&other) = self.handles.get(&other) {
                            self.connect(handle, other);
                        }
                    }
                }
            }
            previous.copy_from_slice(id_row);
        }
        // Bottom sides of the last row.
        for id in previous {
            if let Some(&handle) = self.handles.get(&id) {
                seeds[handle.index()].edge_length += 1.0;
            }
        }

        for (index, seed) in seeds.iter().enumerate() {
            let handle = SegmentHandle::from_index(index);
            let (segment, features) = self.pool.parts_mut(handle);
            segment.size = seed.size;
            segment.bbox = seed.bbox;
            self.strategy.initialize_segment(seed, features);
            self.pool.link_active(handle);
        }

        self.state = EngineState::Seeded;
        debug!(
            "seeded {} segments from an existing {}x{} partition",
            self.pool.active_count(),
            cols,
            rows
        );
        Ok(())
    }

    /// Run region growing to completion.
    ///
    /// `abort` is polled between iterations. An aborted outcome leaves `ids`
    /// consistent with the pool but only partially grown; callers must not
    /// commit it.
    pub fn grow(
        &mut self,
        ids: &mut PagedMatrix<SegmentId>,
        allocator: &SegmentIdAllocator,
        abort: &AtomicBool,
    ) -> Result<GrowthOutcome> {
        if self.state != EngineState::Seeded {
            return Err(SegmenterError::internal(format!(
                "cannot grow an engine in state {:?}",
                self.state
            )));
        }
        self.state = EngineState::Growing;

        let mut outcome = GrowthOutcome {
            state: EngineState::Growing,
            iterations: 0,
            merges: 0,
            active_segments: self.pool.active_count(),
            final_threshold: self.params.threshold_at(1),
            merge_log: Vec::new(),
        };
        let mut level = 1u32;

        let state = loop {
            if abort.load(Ordering::Relaxed) {
                break EngineState::Aborted;
            }
            if self.pool.active_count() <= 1 {
                break EngineState::Converged;
            }
            if outcome.iterations >= self.params.max_iterations {
                break EngineState::IterationCapReached;
            }
            outcome.iterations += 1;

            let threshold = self.params.threshold_at(level);
            outcome.final_threshold = threshold;
            let rules = PassRules {
                iteration: outcome.iterations,
                threshold,
                size_limit: None,
                mutual_best_fit: self.params.enable_mutual_best_fit,
                same_iteration_merges: self.params.enable_same_iteration_merges,
            };
            let merges = self.merge_pass(ids, allocator, rules, &mut outcome.merge_log)?;
            outcome.merges += merges;
            trace!(
                "iteration {} threshold {:.6}: {} merges, {} active",
                outcome.iterations,
                threshold,
                merges,
                self.pool.active_count()
            );

            if merges == 0 {
                if level >= self.params.escalation_levels() {
                    break EngineState::Converged;
                }
                level += 1;
            }
        };

        let state = if state == EngineState::Converged && self.params.min_segment_size > 1 {
            self.eliminate_small_segments(ids, allocator, abort, &mut outcome)?
        } else {
            state
        };

        self.state = state;
        outcome.state = state;
        outcome.active_segments = self.pool.active_count();
        debug!(
            "region growing finished as {:?} after {} iterations: {} merges, {} segments",
            state, outcome.iterations, outcome.merges, outcome.active_segments
        );
        Ok(outcome)
    }

    /// Merge every segment below the minimum size into its best neighbor,
    /// ignoring the threshold, until nothing changes.
    fn eliminate_small_segments(
        &mut self,
        ids: &mut PagedMatrix<SegmentId>,
        allocator: &SegmentIdAllocator,
        abort: &AtomicBool,
        outcome: &mut GrowthOutcome,
    ) -> Result<EngineState> {
        loop {
            if abort.load(Ordering::Relaxed) {
                return Ok(EngineState::Aborted);
            }
            if self.pool.active_count() <= 1 {
                return Ok(EngineState::Converged);
            }
            if outcome.iterations >= self.params.max_iterations {
                return Ok(EngineState::IterationCapReached);
            }
            outcome.iterations += 1;

            let rules = PassRules {
                iteration: outcome.iterations,
                threshold: f64::INFINITY,
                size_limit: Some(self.params.min_segment_size),
                mutual_best_fit: false,
                same_iteration_merges: true,
            };
            let merges = self.merge_pass(ids, allocator, rules, &mut outcome.merge_log)?;
            outcome.merges += merges;
            if merges == 0 {
                return Ok(EngineState::Converged);
            }
        }
    }

    fn merge_pass(
        &mut self,
        ids: &mut PagedMatrix<SegmentId>,
        allocator: &SegmentIdAllocator,
        rules: PassRules,
        log: &mut Vec<(SegmentId, SegmentId)>,
    ) -> Result<usize> {
        self.strategy.refresh_global_state(&self.pool);

        let mut merges = 0;
        let mut cursor = self.pool.active_head();
        while let Some(current) = cursor {
            let segment = self.pool.segment(current);
            let eligible = (rules.same_iteration_merges
                || segment.merge_iteration != rules.iteration)
                && rules.size_limit.is_none_or(|limit| segment.size < limit);

            if eligible {
                if let Some(neighbor) = self.accept_candidate(ids, current, &rules)? {
                    self.merge(ids, allocator, current, neighbor, rules.iteration, log)?;
                    merges += 1;
                }
            }
            cursor = self.pool.next_active(current);
        }
        Ok(merges)
    }

    /// The neighbor `current` should absorb under `rules`, with its merge
    /// preview left in `self.candidate`.
    fn accept_candidate(
        &mut self,
        ids: &mut PagedMatrix<SegmentId>,
        current: SegmentHandle,
        rules: &PassRules,
    ) -> Result<Option<SegmentHandle>> {
        let Some((neighbor, score)) = self.best_neighbor(ids, current, true)? else {
            return Ok(None);
        };
        if score > rules.threshold {
            return Ok(None);
        }
        if !rules.same_iteration_merges
            && self.pool.segment(neighbor).merge_iteration == rules.iteration
        {
            return Ok(None);
        }
        if rules.mutual_best_fit {
            let reciprocal = self.best_neighbor(ids, neighbor, false)?;
            if reciprocal.map(|(back, _)| back) != Some(current) {
                return Ok(None);
            }
        }
        Ok(Some(neighbor))
    }

    /// Lowest-dissimilarity neighbor of `handle`; ties go to the lower
    /// handle, i.e. the segment seeded first in raster order.
    ///
    /// Segment IDs depend on the allocator's history and must not decide
    /// ties. With `keep_preview`, the winning merge preview is copied into
    /// `self.candidate`.
    fn best_neighbor(
        &mut self,
        ids: &mut PagedMatrix<SegmentId>,
        handle: SegmentHandle,
        keep_preview: bool,
    ) -> Result<Option<(SegmentHandle, f64)>> {
        let mut best: Option<(SegmentHandle, f64)> = None;

        for neighbor in self.pool.segment(handle).neighbors.iter() {
            let score =
                self.strategy
                    .dissimilarity(ids, &self.pool, handle, neighbor, &mut self.preview)?;

            let better = match best {
                None => true,
                Some((best_handle, best_score)) => {
                    score < best_score || (score == best_score && neighbor < best_handle)
                }
            };
            if better {
                best = Some((neighbor, score));
                if keep_preview {
                    self.candidate.copy_from(&self.preview);
                }
            }
        }
        Ok(best)
    }

    /// Merge `absorbed` into `survivor` using the preview in `self.candidate`.
    fn merge(
        &mut self,
        ids: &mut PagedMatrix<SegmentId>,
        allocator: &SegmentIdAllocator,
        survivor: SegmentHandle,
        absorbed: SegmentHandle,
        iteration: u16,
        log: &mut Vec<(SegmentId, SegmentId)>,
    ) -> Result<()> {
        let survivor_id = self.pool.segment(survivor).id;
        let absorbed_id = self.pool.segment(absorbed).id;
        let bbox = self.pool.segment(absorbed).bbox;

        for y in bbox.y_start..bbox.y_bound {
            for id in &mut ids.row(y)?[bbox.x_start..bbox.x_bound] {
                if *id == absorbed_id {
                    *id = survivor_id;
                }
            }
        }

        self.strategy
            .merge_into(&mut self.pool, survivor, absorbed, &self.candidate);

        self.neighbor_scratch.clear();
        self.neighbor_scratch
            .extend(self.pool.segment(absorbed).neighbors.iter());
        for &neighbor in &self.neighbor_scratch {
            self.pool.segment_mut(neighbor).neighbors.remove(absorbed);
            if neighbor != survivor {
                self.pool.segment_mut(neighbor).neighbors.insert(survivor);
                self.pool.segment_mut(survivor).neighbors.insert(neighbor);
            }
        }

        self.pool.segment_mut(survivor).merge_iteration = iteration;
        self.pool.unlink_active(absorbed);
        self.pool.segment_mut(absorbed).retire();
        self.handles.remove(&absorbed_id);
        allocator.release(absorbed_id);
        log.push((survivor_id, absorbed_id));
        Ok(())
    }
}
