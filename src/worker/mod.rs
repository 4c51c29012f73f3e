//! Model run execution.
//!
//! - [`WorkerPool`]: fixed set of workers draining the job queue, plus the
//!   supervisor that replaces dead workers
//! - [`ExecutionUnit`]: the pluggable per-run operation; [`InferenceExecutor`]
//!   fetches prepared input remotely and spawns the model process
//! - [`OutputLayout`]: picks the output directory, resolving name collisions
//! - [`list_artifacts`]: finished output folders available to clients
//!
//! # Run flow
//!
//! 1. Worker dequeues a run and marks it `processing`
//! 2. The layout picks an output directory
//! 3. The execution unit runs in its own task; errors and panics become a
//!    `failed` record
//! 4. The active-run slot and queue acknowledgement are released, and the
//!    record is handed to the reaper for delayed removal

pub mod catalog;
pub mod executor;
pub mod layout;
pub mod pool;

pub use catalog::{list_artifacts, ArtifactEntry};
pub use executor::{ExecutionUnit, InferenceExecutor};
pub use layout::{CollisionAwareLayout, OutputLayout, OutputTarget};
pub use pool::{WorkerContext, WorkerPool, INTERNAL_ERROR_MESSAGE, REMOTE_ERROR_MESSAGE};
