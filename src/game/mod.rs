//! Session state and coordination logic.
//!
//! - `state`: session/player data model
//! - `ops`: mutating operations, authorization, validation
//! - `tick`: per-tick clock advancement
//! - `events`: internal events produced by ops/tick

pub mod events;
pub mod ops;
pub mod state;
pub mod tick;

pub use events::GameEvent;
pub use state::{Mode, Player, Session, Settings, Status, TargetingState, TimeoutResolution};
