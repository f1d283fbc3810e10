//! Infrastructure layer: Postgres, the queue store, and the job system.

pub mod db;
pub mod jobs;
pub mod queue;
