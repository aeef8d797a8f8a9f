//! Crate-wide error catalog.
//!
//! `ErrorKind` is the closed catalog from the protocol's error contract;
//! `CoreError` wraps it with the context needed for logging while keeping
//! `Display` equal to the literal wire string clients expect.

use thiserror::Error;

/// The closed set of error kinds the coordination engine can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Settings failed validation bounds (§6).
    InvalidSettings,
    /// No session exists for the given id, or it is tombstoned.
    GameNotFound,
    /// `playerId` is out of `[1, playerCount]`.
    InvalidPlayerId,
    /// Reconnect token mismatch or expired.
    InvalidToken,
    /// Caller is not authorized for the requested operation.
    NotAuthorized,
    /// Sliding-window rate limit tripped.
    RateLimitExceeded,
    /// Per-session lock could not be acquired within 5s.
    LockTimeout,
    /// Store's optimistic update exhausted its retry budget.
    OptimisticLockFailed,
    /// A subscriber's outbound buffer exceeded 1 MiB.
    BufferOverflow,
    /// Id reservation failed after the attempt budget.
    IdAllocationExhausted,
    /// The `type` field did not match any known message shape.
    InvalidMessageType,
    /// The inbound frame was not valid JSON.
    InvalidJson,
    /// The `type` field was valid JSON but not in the closed registry.
    UnknownMessageType,
    /// A target id referenced a player that doesn't exist or is ineligible.
    InvalidTarget,
    /// The operation is not valid for the session's current state.
    WrongStateForOp,
    /// Anything else; should be rare and always logged with `error!`.
    Internal,
}

impl ErrorKind {
    /// Metric label for this kind, used by the `errors_total{kind=...}` counter.
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorKind::InvalidSettings => "invalid_settings",
            ErrorKind::GameNotFound => "game_not_found",
            ErrorKind::InvalidPlayerId => "invalid_player_id",
            ErrorKind::InvalidToken => "invalid_token",
            ErrorKind::NotAuthorized => "not_authorized",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::LockTimeout => "lock_timeout",
            ErrorKind::OptimisticLockFailed => "optimistic_lock_failed",
            ErrorKind::BufferOverflow => "buffer_overflow",
            ErrorKind::IdAllocationExhausted => "id_allocation_exhausted",
            ErrorKind::InvalidMessageType => "invalid_message_type",
            ErrorKind::InvalidJson => "invalid_json",
            ErrorKind::UnknownMessageType => "unknown_message_type",
            ErrorKind::InvalidTarget => "invalid_target",
            ErrorKind::WrongStateForOp => "wrong_state_for_op",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Crate-wide error type. `Display` yields the exact user-visible string
/// from §7 where one is specified; callers send this straight into an
/// `error` reply's `message` field.
#[derive(Debug, Error)]
pub enum CoreError {
    /// `"Invalid settings"`.
    #[error("Invalid settings")]
    InvalidSettings,

    /// `"Game not found"`.
    #[error("Game not found")]
    GameNotFound,

    /// `"Invalid player ID"`.
    #[error("Invalid player ID")]
    InvalidPlayerId,

    /// `"Invalid token"`.
    #[error("Invalid token")]
    InvalidToken,

    /// `"Not authorized to {verb}"`.
    #[error("Not authorized to {verb}")]
    NotAuthorized {
        /// The verb phrase naming the rejected action, e.g. `"reset the game"`.
        verb: &'static str,
    },

    /// `"Rate limit exceeded"`.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// `"Failed to create game"` — id space exhausted.
    #[error("Failed to create game")]
    IdAllocationExhausted,

    /// `"Player already claimed"`.
    #[error("Player already claimed")]
    PlayerAlreadyClaimed,

    /// `"Game is not running"`.
    #[error("Game is not running")]
    GameNotRunning,

    /// `"No targets selected"`.
    #[error("No targets selected")]
    NoTargetsSelected,

    /// `"Cannot change targets now"`.
    #[error("Cannot change targets now")]
    CannotChangeTargetsNow,

    /// `"You must claim a player to {verb}"`.
    #[error("You must claim a player to {verb}")]
    MustClaimToAct {
        /// Verb phrase for the gated action, e.g. `"do that"`.
        verb: &'static str,
    },

    /// Lock acquisition exceeded 5s.
    #[error("lock_timeout")]
    LockTimeout,

    /// Store optimistic update exhausted its retries.
    #[error("optimistic_lock_failed")]
    OptimisticLockFailed,

    /// Outbound buffer exceeded 1 MiB; subscriber is being evicted.
    #[error("buffer_overflow")]
    BufferOverflow,

    /// `"Unknown message type"`.
    #[error("Unknown message type")]
    UnknownMessageType,

    /// Frame failed to parse as JSON.
    #[error("invalid_json: {0}")]
    InvalidJson(String),

    /// A referenced target id doesn't exist or is ineligible.
    #[error("invalid_target")]
    InvalidTarget,

    /// Operation not valid for the session's current state, where §7 names
    /// no specific literal for the case (the ones it does name have their
    /// own variants above).
    #[error("{0}")]
    WrongState(String),

    /// The literal string from the reset-authorization end-to-end scenario
    /// (§8 scenario 2), distinct from the generic `Not authorized to …`
    /// phrasing the rest of §7 uses.
    #[error("Only the game owner can reset")]
    OnlyOwnerCanReset,

    /// Store is unreachable; reads degrade to cache, mutation is refused.
    #[error("internal: store unavailable")]
    StoreUnavailable,

    /// Anything unexpected. Always logged with full context before
    /// being collapsed to this variant for the wire.
    #[error("internal")]
    Internal,
}

impl CoreError {
    /// Map to the closed error-kind catalog, for metrics and logging.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidSettings => ErrorKind::InvalidSettings,
            CoreError::GameNotFound => ErrorKind::GameNotFound,
            CoreError::InvalidPlayerId => ErrorKind::InvalidPlayerId,
            CoreError::InvalidToken => ErrorKind::InvalidToken,
            CoreError::NotAuthorized { .. } => ErrorKind::NotAuthorized,
            CoreError::RateLimitExceeded => ErrorKind::RateLimitExceeded,
            CoreError::IdAllocationExhausted => ErrorKind::IdAllocationExhausted,
            CoreError::PlayerAlreadyClaimed => ErrorKind::WrongStateForOp,
            CoreError::GameNotRunning => ErrorKind::WrongStateForOp,
            CoreError::NoTargetsSelected => ErrorKind::WrongStateForOp,
            CoreError::CannotChangeTargetsNow => ErrorKind::WrongStateForOp,
            CoreError::MustClaimToAct { .. } => ErrorKind::NotAuthorized,
            CoreError::LockTimeout => ErrorKind::LockTimeout,
            CoreError::OptimisticLockFailed => ErrorKind::OptimisticLockFailed,
            CoreError::BufferOverflow => ErrorKind::BufferOverflow,
            CoreError::UnknownMessageType => ErrorKind::UnknownMessageType,
            CoreError::InvalidJson(_) => ErrorKind::InvalidJson,
            CoreError::InvalidTarget => ErrorKind::InvalidTarget,
            CoreError::WrongState(_) => ErrorKind::WrongStateForOp,
            CoreError::OnlyOwnerCanReset => ErrorKind::NotAuthorized,
            CoreError::StoreUnavailable => ErrorKind::Internal,
            CoreError::Internal => ErrorKind::Internal,
        }
    }

    /// The exact string to place in an `error` reply's `message` field.
    pub fn wire_message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_messages_match_the_literal_catalog() {
        assert_eq!(CoreError::InvalidSettings.wire_message(), "Invalid settings");
        assert_eq!(CoreError::GameNotFound.wire_message(), "Game not found");
        assert_eq!(CoreError::InvalidPlayerId.wire_message(), "Invalid player ID");
        assert_eq!(CoreError::InvalidToken.wire_message(), "Invalid token");
        assert_eq!(CoreError::RateLimitExceeded.wire_message(), "Rate limit exceeded");
        assert_eq!(CoreError::IdAllocationExhausted.wire_message(), "Failed to create game");
        assert_eq!(CoreError::PlayerAlreadyClaimed.wire_message(), "Player already claimed");
        assert_eq!(CoreError::GameNotRunning.wire_message(), "Game is not running");
        assert_eq!(CoreError::NoTargetsSelected.wire_message(), "No targets selected");
        assert_eq!(CoreError::CannotChangeTargetsNow.wire_message(), "Cannot change targets now");
        assert_eq!(
            CoreError::NotAuthorized { verb: "reset the game" }.wire_message(),
            "Not authorized to reset the game"
        );
        assert_eq!(
            CoreError::MustClaimToAct { verb: "do that" }.wire_message(),
            "You must claim a player to do that"
        );
    }

    #[test]
    fn kind_label_is_stable() {
        assert_eq!(ErrorKind::GameNotFound.as_label(), "game_not_found");
        assert_eq!(ErrorKind::LockTimeout.as_label(), "lock_timeout");
    }
}
