//! Audit trail for the rebound proxy.
//!
//! Writes one markdown file per request under the configured log folder,
//! plus separate error logs with rotation. Filenames carry a sequential
//! number that is contiguous per folder across both kinds; the number
//! generator is the single piece of shared mutable state between
//! concurrent request workers and is guarded accordingly.
//!
//! Nothing in here is allowed to fail a request: every I/O error is
//! reported via `tracing::error!` and swallowed.

pub mod error_log;
pub mod request_log;
pub mod sequence;

pub use error_log::ErrorLogger;
pub use request_log::{RequestAudit, RequestLogger};
pub use sequence::SequenceAllocator;
