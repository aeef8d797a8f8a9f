//! Network Layer
//!
//! WebSocket transport and wire protocol. This layer is intentionally thin:
//! it parses frames, rate-limits, and hands everything else to
//! [`dispatcher`], which holds the session lock for the actual mutation.
//! No game logic lives here.

pub mod dispatcher;
pub mod protocol;
pub mod ratelimit;
pub mod server;

pub use dispatcher::{dispatch, FeedbackStore};
pub use protocol::{ClientMessage, ErrorPayload, FeedbackEntry, ServerMessage, WireSettings};
pub use ratelimit::RateLimiter;
pub use server::{GameServerError, ServerConfig};
