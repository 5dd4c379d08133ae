//! Job system: model, storage, scheduling, and administration.

pub mod admin;
pub mod job;
pub mod memory;
pub mod postgres;
pub mod processor;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use admin::{BulkReport, JobAdmin};
pub use job::{
    AffiliatePayload, CommentPayload, Job, JobKind, JobLogEntry, JobPriority, JobStatus, LogLevel, NewJob,
    PostPayload, StatusPatch,
};
pub use memory::MemoryJobStore;
pub use postgres::PostgresJobStore;
pub use processor::{DeletionHandler, JobProcessor};
pub use registry::{ProcessorRegistry, SharedProcessorRegistry};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use store::{BulkSelection, JobFilter, JobStore, StoreError, StoreResult};
