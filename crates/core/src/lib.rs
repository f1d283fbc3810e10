//! `tillpoint-core` — identifiers and errors shared by every Tillpoint crate.
//!
//! Pure domain primitives; no I/O lives here.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{OutletId, ReportId, TenantId, UserId};
