pub mod error;
pub mod job;
pub mod poll;
pub mod protocol;
pub mod scheduler;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::ErrorCode;
pub use job::{EventLog, Job, JobError, JobEvent, JobHandle, JobId, JobObserver, JobOptions, JobState};
pub use protocol::{CommandChannel, CommandSender, DirectoryEntry, FrameHandler, Request};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use worker::{BackendRegistry, BackendResolver, Worker, WorkerIdentity, WorkerPool};
