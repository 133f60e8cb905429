//! rebound: a retrying single-hop forwarding proxy for OpenAI-compatible chat APIs.
//!
//! The proxy sits between a chat client and one upstream chat-completion
//! API. It accepts OpenAI-style requests, applies configured transforms,
//! forwards to the target, and classifies every upstream response:
//! retryable failures back off and retry, permanent failures are relayed
//! verbatim, hard-stop matches abort immediately, and blank/refused
//! completions get a bounded number of extra chances. Every attempt lands
//! in a sequenced audit trail.
//!
//! This crate is the HTTP surface and wiring; the decision logic lives in
//! `rebound-engine`.

pub mod forward;
pub mod models;
pub mod server;
pub mod state;

pub use server::serve;
pub use state::AppState;
