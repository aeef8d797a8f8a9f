//! Core primitives shared by the session model and the network layer.
//!
//! Unlike the teacher's `core/`, nothing here needs to be deterministic or
//! cross-platform reproducible — ids, tokens, and sanitization all draw on
//! real randomness and the host's notion of wall-clock time.

pub mod id;
pub mod sanitize;
pub mod token;

pub use id::generate_session_id;
pub use sanitize::sanitize_name;
pub use token::{generate_reconnect_token, tokens_equal};
