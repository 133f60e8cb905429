//! Pure content transforms for the rebound proxy.
//!
//! Everything here is a stateless function over immutable inputs: regex
//! replacement over message/response content, and extraction of the
//! optional chat-metadata block clients may embed in a message. No I/O,
//! no retry-affecting decisions.

pub mod metadata;
pub mod rules;

pub use metadata::{
    chat_context, extract_from_messages, parse_chat_name, sanitize_for_filesystem, strip_metadata,
    ChatContext,
};
pub use rules::{apply_rules, process_messages, process_response, TransformRule};
