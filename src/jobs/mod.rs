//! Asynchronous jobs: one document per job, observed through snapshots.
//!
//! ```text
//! submit ──▶ queued ──permit──▶ processing ──▶ completed (progress 100)
//!                                   │
//!                                   └────────▶ failed (error message)
//! ```

pub mod manager;
pub mod store;

pub use manager::JobManager;
pub use store::{Job, JobResult, JobStatus, JobStore, JobView};
