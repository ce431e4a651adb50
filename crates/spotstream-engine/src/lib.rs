//! Spotstream Engine - adaptive, memory-bounded streaming measurement
//!
//! Walks a large, usually disk-resident sequence of video frames, measures
//! pixel statistics inside thousands of small region masks per frame, and
//! accumulates per-spot time series while keeping peak memory bounded.
//!
//! Data flows one direction:
//! `BatchOrchestrator -> FrameSource -> transforms -> MeasurementEngine ->
//! per-spot series`. Memory samples feed both the adaptive batch sizer and
//! the orchestrator's intervention policy.

pub mod batch;
pub mod measure;
pub mod memory;
pub mod orchestrator;
pub mod pool;
pub mod source;

pub use batch::AdaptiveBatchSizer;
pub use measure::{MeasurementEngine, MeasurementResult};
pub use memory::{MemoryProbe, MemorySample, SystemMemoryProbe};
pub use orchestrator::{
    BatchOrchestrator, CancelToken, CollectionHook, NullProgress, ProgressSink, RunOutcome,
    RunReport, RunState, RunStatus,
};
pub use pool::{BufferPool, CursorPool, PlaneCursor};
pub use source::{FileFrameSource, FrameSource, LoadError};
