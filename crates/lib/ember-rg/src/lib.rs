//! Per-frame render graph: declare passes and the transient resources they
//! touch, compile into cull/alias/barrier schedules, execute on the device.

mod handle;
mod graph;
mod pass;
mod compile;
mod context;
mod execute;
mod executor;
mod barrier_batcher;

pub use handle::{BufferHandle, RenderTargetHandle};
pub use graph::{FrameGraph, PassKind};
pub use pass::PassBuilder;
pub use compile::{CompiledFrameGraph, GraphSurvivors, PlannedBarrier};
pub use context::{DrawCall, FrameGraphContext, LoadOp, RenderTargetBinding, MAX_COLOR_TARGETS};
pub use execute::{ExecutionParams, TransientHeaps};
pub use executor::{GraphExecutor, GraphExecutorDesc};
pub use barrier_batcher::ResourceBarrierBatcher;
