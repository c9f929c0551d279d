//! Gallery job execution -- one task per admitted job.
//!
//! Split into focused submodules:
//! - [`context`] - Queued job description and per-job shared state
//! - [`orchestration`] - Top-level job lifecycle
//! - [`fetch`] - Page fetching with retries and progress feeding
//! - [`finalization`] - Conversion, history write and result delivery

mod context;
mod fetch;
mod finalization;
mod orchestration;

pub(crate) use context::{JobContext, JobSource, QueuedJob};
pub(crate) use finalization::{abandoned_result, deliver_cancelled};
pub(crate) use orchestration::run_job;
