//! Background job processing: priority queues, retry with exponential
//! backoff, and a dead-letter queue.
//!
//! ## Components
//!
//! - [`Job`]: wire format shared with producers
//! - [`HandlerRegistry`]: job type → [`JobHandler`]
//! - [`JobExecutor`]: one attempt plus the retry / dead-letter decision
//! - [`DispatcherPool`]: N concurrent loops popping from the queue store

pub mod dispatcher;
pub mod executor;
pub mod handlers;
pub mod registry;
pub mod types;

pub use dispatcher::{ActiveJobGuard, ActiveJobs, DispatcherConfig, DispatcherPool, ShutdownSignal};
pub use executor::{DispatchError, JobExecutor, Outcome};
pub use registry::{HandlerRegistry, JobError, JobHandler, RegistryError};
pub use types::{ClaimedJob, DeadLetterRecord, Job, JobType, UndecodableRecord};
