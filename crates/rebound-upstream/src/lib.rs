//! Upstream HTTP client for the rebound proxy.
//!
//! Issues the actual call to the configured target, applies the header
//! policy (defaults < forwarded-minus-deny-list < configured API key),
//! and hands raw response data back to the engine. It never raises on a
//! non-2xx status; only genuine transport failures are errors.

pub mod client;
pub mod headers;

pub use client::{UpstreamClient, UpstreamError};
pub use headers::{sanitize_headers_for_logging, should_forward};
