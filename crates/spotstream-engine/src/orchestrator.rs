//! Batch-driven run orchestration with memory-pressure interventions.
//!
//! The orchestrator pulls batches of frame indices sized by the adaptive
//! sizer, streams each frame through the loader and the measurement engine,
//! and intervenes between batches: shrinking or growing the batch, forcing a
//! collection, or pausing with backoff when usage turns critical.

use crate::batch::AdaptiveBatchSizer;
use crate::measure::{MeasurementEngine, MeasurementResult};
use crate::memory::MemoryProbe;
use crate::pool::{BufferPool, CursorPool};
use crate::source::{FrameSource, LoadError};
use rayon::prelude::*;
use serde::Serialize;
use spotstream_core::{
    CompressedMask, ConfigViolation, EngineConfig, MaskCache, Plane, Result, SchedulingMode,
    Spot, SpotDescriptor, SpotError,
};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cooperative cancellation handle, polled at the start of every per-frame
/// step and at every batch boundary. A series write is never partially
/// applied.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Observer for run progress; the engine never assumes a particular UI.
///
/// Exactly one of the terminal notifications fires per run: `completed` for
/// a full run, `cancelled` for a cooperative stop with partial series, and
/// `failed` for an abort.
pub trait ProgressSink: Send {
    fn progress(&mut self, _message: &str, _current_frame: usize, _total_frames: usize) {}
    fn completed(&mut self) {}
    fn cancelled(&mut self, _last_good_frame: Option<usize>) {}
    fn failed(&mut self, _reason: &str) {}
}

/// Sink that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {}

/// Lifecycle state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Initializing,
    Running,
    Paused,
    Draining,
    Completed,
    Aborted,
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RunStatus {
    /// Every frame index was visited; skipped frames keep default entries.
    Completed,
    /// The run stopped on a fatal condition, e.g. a frame failing allocation
    /// twice in a row.
    Aborted(String),
    /// Cancelled cooperatively; series written so far are intact.
    PartiallyCompleted { last_good_frame: Option<usize> },
}

/// Summary returned by [`BatchOrchestrator::run`], with enough detail to
/// resume or re-run from a specific frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub frames_processed: usize,
    pub skipped_frames: Vec<usize>,
    pub pause_events: u32,
    pub final_batch_size: usize,
}

/// Spots with populated series plus the run summary.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub spots: Vec<Spot>,
    pub report: RunReport,
}

/// Advisory host callback invoked when the engine requests a collection.
/// The engine's own contribution is draining its pools; the host may or may
/// not honor the request further.
pub type CollectionHook = Box<dyn FnMut() + Send>;

/// Why one frame could not be measured.
enum FrameFailure {
    Load(LoadError),
    Allocation(String),
    Transform(String),
    Cancelled,
}

impl FrameFailure {
    fn is_allocation(&self) -> bool {
        match self {
            Self::Allocation(_) => true,
            Self::Load(e) => e.is_allocation(),
            _ => false,
        }
    }

    fn reason(&self) -> String {
        match self {
            Self::Load(e) => e.to_string(),
            Self::Allocation(r) | Self::Transform(r) => r.clone(),
            Self::Cancelled => "cancelled".into(),
        }
    }
}

impl From<SpotError> for FrameFailure {
    fn from(err: SpotError) -> Self {
        match err {
            SpotError::Allocation(r) => Self::Allocation(r),
            other => Self::Transform(other.to_string()),
        }
    }
}

/// How a batch ended.
enum BatchOutcome {
    Done,
    Cancelled { at: usize },
    AllocationAbort { frame: usize, reason: String },
}

/// The top-level driver for one measurement run.
pub struct BatchOrchestrator<S, P> {
    config: EngineConfig,
    source: S,
    probe: P,
    state: RunState,
    collection_hook: Option<CollectionHook>,
}

impl<S: FrameSource, P: MemoryProbe> BatchOrchestrator<S, P> {
    pub fn new(config: EngineConfig, source: S, probe: P) -> Self {
        Self {
            config,
            source,
            probe,
            state: RunState::Idle,
            collection_hook: None,
        }
    }

    /// Install an advisory collection callback.
    pub fn with_collection_hook(mut self, hook: CollectionHook) -> Self {
        self.collection_hook = Some(hook);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Process `range` against `descriptors`, returning populated spots and
    /// a run report.
    ///
    /// Configuration errors fail fast before any frame is processed. Per-
    /// frame failures never abort the run; cancellation and repeated
    /// allocation failure end it with a partial or aborted status while
    /// keeping every series entry written so far.
    pub fn run(
        &mut self,
        range: Range<usize>,
        descriptors: &[SpotDescriptor],
        progress: &mut dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        self.state = RunState::Initializing;
        if let Err(e) = self.validate(&range, descriptors) {
            self.state = RunState::Aborted;
            progress.failed(&e.to_string());
            return Err(e);
        }

        let total = range.end - range.start;
        let (cache, masks) = match build_masks(descriptors) {
            Ok(built) => built,
            Err(e) => {
                self.state = RunState::Aborted;
                progress.failed(&e.to_string());
                return Err(e);
            }
        };
        let mut spots: Vec<Spot> = descriptors.iter().map(|d| Spot::new(d, total)).collect();

        let engine = MeasurementEngine::new(self.config.thresholds.clone());
        let mut sizer = AdaptiveBatchSizer::new(self.config.batch.clone());
        let initial = self.probe.sample();
        sizer.initialize(total, initial.available_mb());

        let workers = match self.config.mode {
            SchedulingMode::Sequential => 1,
            SchedulingMode::ParallelBatch => num_cpus::get().max(1),
        };
        let buffers = BufferPool::new(workers * 2);
        let cursors = CursorPool::new(workers);

        info!(
            frames = total,
            spots = spots.len(),
            masks = cache.len(),
            mode = ?self.config.mode,
            batch = sizer.current(),
            "run initialized"
        );

        let ctx = BatchCtx {
            source: &self.source,
            engine: &engine,
            masks: &masks,
            buffers: &buffers,
            cursors: &cursors,
            series_offset: range.start,
        };

        self.state = RunState::Running;
        let mut next = range.start;
        let mut batches: u64 = 0;
        let mut pause_events = 0u32;
        let mut frames_processed = 0usize;
        let mut last_good: Option<usize> = None;
        let mut skipped: Vec<usize> = Vec::new();
        let mut status = RunStatus::Completed;

        'run: while next < range.end {
            if cancel.is_cancelled() {
                status = RunStatus::PartiallyCompleted {
                    last_good_frame: last_good,
                };
                break 'run;
            }

            let batch_len = sizer.current().min(range.end - next).max(1);
            let batch = next..next + batch_len;
            let outcome = match self.config.mode {
                SchedulingMode::Sequential => ctx.run_sequential(
                    batch.clone(),
                    &mut spots,
                    &mut sizer,
                    &mut self.collection_hook,
                    cancel,
                    &mut skipped,
                    &mut frames_processed,
                    &mut last_good,
                ),
                SchedulingMode::ParallelBatch => ctx.run_parallel(
                    batch.clone(),
                    &mut spots,
                    &mut sizer,
                    &mut self.collection_hook,
                    cancel,
                    &mut skipped,
                    &mut frames_processed,
                    &mut last_good,
                ),
            };
            next = batch.end;
            batches += 1;

            match outcome {
                BatchOutcome::Done => {}
                BatchOutcome::Cancelled { at } => {
                    debug!(frame = at, "cancellation observed");
                    status = RunStatus::PartiallyCompleted {
                        last_good_frame: last_good,
                    };
                    break 'run;
                }
                BatchOutcome::AllocationAbort { frame, reason } => {
                    status = RunStatus::Aborted(format!(
                        "frame {frame} failed allocation twice: {reason}"
                    ));
                    break 'run;
                }
            }

            progress.progress(
                &format!("processed batch {batches}"),
                next - range.start,
                total,
            );

            let sample = self.probe.sample();
            sizer.update(sample.usage_percent());
            if let Some(every) = self.config.collect_every_batches {
                if every > 0 && batches % u64::from(every) == 0 {
                    request_collection(&buffers, &cursors, &mut self.collection_hook);
                }
            }

            if sample.usage_percent() > self.config.critical_usage_percent && next < range.end {
                self.state = RunState::Paused;
                pause_events += 1;
                warn!(
                    usage = sample.usage_percent(),
                    critical = self.config.critical_usage_percent,
                    "memory pressure critical, pausing"
                );
                let mut backoff = self.config.pause_backoff;
                loop {
                    if cancel.is_cancelled() {
                        status = RunStatus::PartiallyCompleted {
                            last_good_frame: last_good,
                        };
                        break 'run;
                    }
                    thread::sleep(backoff);
                    let resampled = self.probe.sample();
                    if resampled.usage_percent() <= self.config.resume_usage_percent {
                        debug!(usage = resampled.usage_percent(), "pressure dropped, resuming");
                        break;
                    }
                    backoff = cap_backoff(backoff * 2, self.config.pause_backoff);
                }
                self.state = RunState::Running;
            }
        }

        // Drain pooled buffers and masks eagerly before declaring the end.
        self.state = RunState::Draining;
        buffers.drain();
        cursors.drain();
        drop(masks);
        drop(cache);

        let report = RunReport {
            status: status.clone(),
            frames_processed,
            skipped_frames: skipped,
            pause_events,
            final_batch_size: sizer.current(),
        };

        match &status {
            RunStatus::Completed => {
                self.state = RunState::Completed;
                progress.completed();
                info!(frames = frames_processed, "run completed");
            }
            RunStatus::PartiallyCompleted { last_good_frame } => {
                self.state = RunState::Aborted;
                progress.cancelled(*last_good_frame);
                info!(frames = frames_processed, "run cancelled, partial results kept");
            }
            RunStatus::Aborted(reason) => {
                self.state = RunState::Aborted;
                progress.failed(reason);
                warn!(reason, "run aborted");
            }
        }

        Ok(RunOutcome { spots, report })
    }

    /// Fail fast on invalid inputs, reporting every violation at once.
    fn validate(&self, range: &Range<usize>, descriptors: &[SpotDescriptor]) -> Result<()> {
        self.config.validate()?;
        let mut violations = Vec::new();
        if range.end <= range.start {
            violations.push(ConfigViolation::new(
                "frame_range",
                format!("degenerate range {}..{}", range.start, range.end),
            ));
        }
        if descriptors.is_empty() {
            violations.push(ConfigViolation::new("spots", "at least one spot is required"));
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(SpotError::Config(violations))
        }
    }
}

/// Compress every descriptor's region exactly once and resolve the per-spot
/// mask list the measurement loop iterates.
fn build_masks(
    descriptors: &[SpotDescriptor],
) -> Result<(MaskCache, Vec<Arc<CompressedMask>>)> {
    let mut cache = MaskCache::new();
    let mut violations = Vec::new();
    for descriptor in descriptors {
        if let Err(e) = cache.insert(descriptor.mask_key(), &descriptor.points) {
            violations.push(ConfigViolation::new("spots.mask", e.to_string()));
        }
    }
    if !violations.is_empty() {
        return Err(SpotError::Config(violations));
    }
    let masks = descriptors
        .iter()
        .map(|d| {
            cache
                .get(&d.mask_key())
                .cloned()
                .ok_or_else(|| SpotError::Internal(format!("mask missing for spot {:?}", d.id)))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((cache, masks))
}

fn request_collection(buffers: &BufferPool, cursors: &CursorPool, hook: &mut Option<CollectionHook>) {
    buffers.drain();
    cursors.drain();
    if let Some(hook) = hook.as_mut() {
        hook();
    }
    debug!("collection requested");
}

fn cap_backoff(candidate: Duration, base: Duration) -> Duration {
    candidate.min(base * 8)
}

/// Shared per-batch context; everything here is read-only during a batch.
struct BatchCtx<'a, S> {
    source: &'a S,
    engine: &'a MeasurementEngine,
    masks: &'a [Arc<CompressedMask>],
    buffers: &'a BufferPool,
    cursors: &'a CursorPool,
    series_offset: usize,
}

impl<S: FrameSource> BatchCtx<'_, S> {
    /// Load, transform, and measure one frame against every mask. The frame
    /// is dropped before this function returns, so at most one decoded frame
    /// is live per worker.
    fn measure_frame(&self, index: usize) -> std::result::Result<Vec<MeasurementResult>, FrameFailure> {
        let frame = self.source.load(index).map_err(FrameFailure::Load)?;
        let thresholds = self.engine.thresholds();

        let mut area_buf = self.buffers.take();
        if let Err(e) = thresholds.spot_transform.fill(&frame, &mut area_buf) {
            self.buffers.give(area_buf);
            return Err(e.into());
        }
        let area = Plane::from_data(area_buf, frame.width, frame.height);

        let mut presence_buf = self.buffers.take();
        if let Err(e) = thresholds.fly_transform.fill(&frame, &mut presence_buf) {
            self.buffers.give(presence_buf);
            self.buffers.give(area.into_data());
            return Err(e.into());
        }
        let presence = Plane::from_data(presence_buf, frame.width, frame.height);

        drop(frame);

        let mut cursor = self.cursors.take();
        let results = self
            .masks
            .iter()
            .map(|mask| self.engine.measure(&area, &presence, mask, &mut cursor))
            .collect();
        self.cursors.give(cursor);
        self.buffers.give(area.into_data());
        self.buffers.give(presence.into_data());
        Ok(results)
    }

    /// Write one frame's results into every spot's series.
    fn apply_frame(&self, spots: &mut [Spot], index: usize, results: &[MeasurementResult]) {
        let at = index - self.series_offset;
        for (spot, result) in spots.iter_mut().zip(results) {
            MeasurementEngine::apply(result, spot, at);
        }
    }

    /// Shrink, collect, and retry once after an allocation failure.
    fn retry_after_allocation(
        &self,
        index: usize,
        failure: &FrameFailure,
        sizer: &mut AdaptiveBatchSizer,
        hook: &mut Option<CollectionHook>,
    ) -> std::result::Result<Vec<MeasurementResult>, FrameFailure> {
        warn!(
            frame = index,
            reason = failure.reason(),
            "allocation failure, shrinking and retrying once"
        );
        sizer.force_shrink();
        request_collection(self.buffers, self.cursors, hook);
        self.measure_frame(index)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_sequential(
        &self,
        batch: Range<usize>,
        spots: &mut [Spot],
        sizer: &mut AdaptiveBatchSizer,
        hook: &mut Option<CollectionHook>,
        cancel: &CancelToken,
        skipped: &mut Vec<usize>,
        frames_processed: &mut usize,
        last_good: &mut Option<usize>,
    ) -> BatchOutcome {
        for index in batch {
            if cancel.is_cancelled() {
                return BatchOutcome::Cancelled { at: index };
            }
            let results = match self.measure_frame(index) {
                Ok(results) => Ok(results),
                Err(f) if f.is_allocation() => self.retry_after_allocation(index, &f, sizer, hook),
                Err(f) => Err(f),
            };
            match results {
                Ok(results) => {
                    self.apply_frame(spots, index, &results);
                    *frames_processed += 1;
                    *last_good = Some(index);
                }
                Err(f) if f.is_allocation() => {
                    return BatchOutcome::AllocationAbort {
                        frame: index,
                        reason: f.reason(),
                    };
                }
                Err(f) => {
                    warn!(frame = index, reason = f.reason(), "frame skipped");
                    skipped.push(index);
                }
            }
        }
        BatchOutcome::Done
    }

    #[allow(clippy::too_many_arguments)]
    fn run_parallel(
        &self,
        batch: Range<usize>,
        spots: &mut [Spot],
        sizer: &mut AdaptiveBatchSizer,
        hook: &mut Option<CollectionHook>,
        cancel: &CancelToken,
        skipped: &mut Vec<usize>,
        frames_processed: &mut usize,
        last_good: &mut Option<usize>,
    ) -> BatchOutcome {
        // Workers measure concurrently; the join barrier is the collect.
        // Series writes happen afterwards in frame order, so no per-index
        // locking is needed.
        let measured: Vec<(usize, std::result::Result<Vec<MeasurementResult>, FrameFailure>)> =
            batch
                .into_par_iter()
                .map(|index| {
                    if cancel.is_cancelled() {
                        return (index, Err(FrameFailure::Cancelled));
                    }
                    (index, self.measure_frame(index))
                })
                .collect();

        for (index, result) in measured {
            let result = match result {
                Err(f) if f.is_allocation() => self.retry_after_allocation(index, &f, sizer, hook),
                other => other,
            };
            match result {
                Ok(results) => {
                    self.apply_frame(spots, index, &results);
                    *frames_processed += 1;
                    *last_good = Some(index);
                }
                Err(FrameFailure::Cancelled) => {
                    return BatchOutcome::Cancelled { at: index };
                }
                Err(f) if f.is_allocation() => {
                    return BatchOutcome::AllocationAbort {
                        frame: index,
                        reason: f.reason(),
                    };
                }
                Err(f) => {
                    warn!(frame = index, reason = f.reason(), "frame skipped");
                    skipped.push(index);
                }
            }
        }
        BatchOutcome::Done
    }
}
