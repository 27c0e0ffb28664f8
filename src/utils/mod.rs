//! Loop scaffolding shared by the real-time components:
//! deadline pacing, per-loop counters and the snapshot logging path.

pub mod metrics;
pub mod recorder;
pub mod scheduler;
