//! Run bookkeeping: parameters and lifecycle records, the status store, the
//! FIFO feeding the workers, and the front door that ties them together.

pub mod admission;
pub mod denylist;
pub mod job;
pub mod queue;
pub mod store;

pub use admission::{Admission, RunStatus, SubmitReceipt};
pub use denylist::{Denylist, MissingDataList, StaticDenylist};
pub use job::{ArtifactLocation, JobParams, JobRecord, JobResult, JobStatus, Lake};
pub use queue::{JobQueue, QueuedJob};
pub use store::{StatusSnapshot, StatusStore};
