//! Wire protocol (§6): inbound/outbound message shapes over the WebSocket
//! transport. JSON only — no binary path, since the whole contract here is
//! a small closed registry of human-inspectable messages, not a
//! high-frequency simulation stream.

use serde::{Deserialize, Serialize};

use crate::game::state::{Mode, Settings, TimeoutResolution};

/// Envelope every inbound frame must match: `{"type": ..., "data": ...}`.
/// `data` is validated per-variant below; a `type` outside this closed
/// registry is rejected with `unknown_message_type` before `data` is even
/// looked at.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Create a new session.
    Create {
        /// Requested display name.
        name: String,
        /// Requested mode name (`casual`, `campaign`, or any custom value).
        mode: String,
        /// Initial settings; bounds validated per §6 before use.
        settings: WireSettings,
    },
    /// Attach to an existing session, becoming its owner if none is set.
    Join {
        /// Target session id.
        game_id: String,
    },
    /// `start`.
    Start,
    /// `pause`/`resume` toggle.
    Pause,
    /// `reset`.
    Reset,
    /// `switchPlayer(next)`.
    Switch {
        /// The player to make active.
        next: u8,
    },
    /// `claim(playerId, controllerId)`. `controllerId` is taken from the
    /// connection's identity, not the payload.
    Claim {
        /// Slot to claim.
        player_id: u8,
    },
    /// `unclaim(controllerId)`.
    Unclaim,
    /// `reconnect(playerId, token, newControllerId)`.
    Reconnect {
        /// Slot to reattach to.
        player_id: u8,
        /// The previously issued reconnect token.
        token: String,
    },
    /// `updatePlayer`.
    UpdatePlayer {
        /// Target slot.
        player_id: u8,
        /// New name, if changing.
        name: Option<String>,
        /// New color, if changing.
        color: Option<String>,
        /// New life total, if changing.
        life: Option<i32>,
        /// New drunk counter, if changing.
        drunk_counter: Option<u32>,
        /// New generic counter, if changing.
        generic_counter: Option<u32>,
    },
    /// `addPenalty(playerId, drunkDelta)`.
    AddPenalty {
        /// Target slot.
        player_id: u8,
        /// Amount to add to `drunkCounter`.
        amount: u32,
    },
    /// `eliminate(playerId)`.
    Eliminate {
        /// Target slot.
        player_id: u8,
    },
    /// `updateSettings`.
    UpdateSettings {
        /// New settings; `playerCount` must match the session's current value.
        settings: WireSettings,
    },
    /// `endGame`.
    EndGame,
    /// `renameGame(name)`.
    RenameGame {
        /// New display name.
        name: String,
    },
    /// `interrupt(playerId)`.
    Interrupt {
        /// Player raising the interrupt.
        player_id: u8,
    },
    /// `passPriority`.
    PassPriority,
    /// `randomStartPlayer`.
    RandomStartPlayer,
    /// `rollDice(sides)`.
    RollDice {
        /// Number of sides, `[2, 100]`.
        sides: u8,
    },
    /// `rollPlayOrder`.
    RollPlayOrder,
    /// `adminRevive(playerId)`.
    AdminRevive {
        /// Target slot.
        player_id: u8,
    },
    /// `adminKick(playerId)`.
    AdminKick {
        /// Target slot.
        player_id: u8,
    },
    /// `adminAddTime(playerId, minutes)`.
    AdminAddTime {
        /// Target slot.
        player_id: u8,
        /// Minutes to add, `[1, 60]`.
        minutes: u32,
    },
    /// `timeoutChoice(playerId, resolution)`.
    TimeoutChoice {
        /// The player whose timeout is being resolved.
        player_id: u8,
        /// The chosen resolution.
        resolution: TimeoutResolution,
    },
    /// `toggleTarget(playerId)`.
    ToggleTarget {
        /// Player to toggle in/out of the target set.
        player_id: u8,
    },
    /// `confirmTargets`.
    ConfirmTargets,
    /// `passTargetPriority(pid)`.
    PassTargetPriority {
        /// Must equal the current `activePlayer`.
        pid: u8,
    },
    /// `cancelTargeting`.
    CancelTargeting,
    /// Submit a new feedback entry.
    Feedback {
        /// Free-form feedback body.
        text: String,
    },
    /// Request the stored feedback list.
    LoadFeedbacks,
    /// Edit a previously submitted feedback entry.
    UpdateFeedback {
        /// Id of the entry to edit.
        id: String,
        /// New body.
        text: String,
    },
    /// Delete a feedback entry.
    DeleteFeedback {
        /// Id of the entry to delete.
        id: String,
    },
}

/// Wire shape of [`Settings`], validated at the protocol boundary before
/// being converted to the internal type (§6 "Validation bounds").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSettings {
    /// `[2, 8]`.
    pub player_count: u8,
    /// Milliseconds, `(0, 86_400_000]`.
    pub initial_time_ms: i64,
    /// 1-10 positive ms values, ascending.
    pub warning_thresholds_ms: Vec<i64>,
    /// Whether any unclaimed controller may `start`.
    pub anyone_may_start: bool,
    /// Whether any controller may `switchPlayer` onto an unclaimed slot.
    pub anyone_may_switch_when_unclaimed: bool,
    /// Default resolution applied when a mode doesn't collect a manual choice.
    pub default_timeout_resolution: TimeoutResolution,
}

impl WireSettings {
    /// Validate bounds from §6 and convert to the internal [`Settings`].
    pub fn into_settings(self) -> Result<Settings, crate::error::CoreError> {
        if !(2..=8).contains(&self.player_count) {
            return Err(crate::error::CoreError::InvalidSettings);
        }
        if self.initial_time_ms <= 0 || self.initial_time_ms > 86_400_000 {
            return Err(crate::error::CoreError::InvalidSettings);
        }
        if self.warning_thresholds_ms.is_empty() || self.warning_thresholds_ms.len() > 10 {
            return Err(crate::error::CoreError::InvalidSettings);
        }
        if self.warning_thresholds_ms.iter().any(|&t| t <= 0) {
            return Err(crate::error::CoreError::InvalidSettings);
        }
        Ok(Settings {
            player_count: self.player_count,
            initial_time_ms: self.initial_time_ms,
            warning_thresholds_ms: self.warning_thresholds_ms,
            anyone_may_start: self.anyone_may_start,
            anyone_may_switch_when_unclaimed: self.anyone_may_switch_when_unclaimed,
            default_timeout_resolution: self.default_timeout_resolution,
        })
    }
}

/// Parse a wire-supplied mode string into the internal [`Mode`].
pub fn parse_mode(name: &str) -> Mode {
    Mode::from_wire(name)
}

/// Messages sent from server to client (§6 "Wire protocol — outbound").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Sent once per connection, assigning its controller id.
    ClientId {
        /// Opaque controller id for this connection.
        client_id: String,
    },
    /// Full session snapshot, sent after every state-visible mutation.
    State {
        /// The session's current state.
        state: crate::game::state::Session,
    },
    /// Per-tick time update.
    Tick {
        /// `(player id, time remaining ms)` pairs.
        times: Vec<(u8, i64)>,
    },
    /// A warning threshold was crossed.
    Warning {
        /// The player whose timer crossed the threshold.
        player_id: u8,
        /// The threshold crossed, ms.
        threshold_ms: i64,
    },
    /// A player's timer reached zero.
    Timeout {
        /// The player whose timer expired.
        player_id: u8,
    },
    /// A slot was claimed.
    Claimed {
        /// The claimed slot.
        player_id: u8,
        /// The controller that claimed it.
        controller_id: String,
        /// The fresh reconnect token. `None` on the broadcast copy everyone
        /// else receives; `Some` only on the private reply sent back to the
        /// claimer itself (§8 secrecy invariant).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    /// A controller reattached to a previously claimed slot.
    Reconnected {
        /// The slot that was reattached.
        player_id: u8,
        /// The controller now attached to it.
        controller_id: String,
        /// The fresh reconnect token, rotated on every reconnect. `None` on
        /// the broadcast copy; `Some` only on the private reply to the
        /// reconnecting controller.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    /// A single-shot error reply. `error.data.message` carries the
    /// catalog string (§7).
    Error(ErrorPayload),
    /// The game ended.
    GameEnded,
    /// The session's name changed.
    GameRenamed {
        /// The new name.
        name: String,
    },
    /// A random start player was selected.
    RandomPlayerSelected {
        /// The selected player.
        player_id: u8,
    },
    /// A die was rolled.
    DiceRolled {
        /// Sides on the rolled die.
        sides: u8,
        /// Result, `[1, sides]`.
        result: u8,
    },
    /// Play order was randomized.
    PlayOrderRolled {
        /// The new order, by player id.
        order: Vec<u8>,
    },
    /// A player was forcibly removed.
    Kicked {
        /// The removed player.
        player_id: u8,
    },
    /// A target set changed while still `selecting`.
    TargetingUpdated {
        /// Targets currently selected.
        targeted_players: Vec<u8>,
    },
    /// Targeting entered `resolving`.
    TargetingStarted {
        /// Remaining targets awaiting priority, head first.
        awaiting_priority: Vec<u8>,
        /// The player holding priority.
        active_player: u8,
    },
    /// Targeting/priority completed; control returned to the original player.
    TargetingComplete {
        /// Player targeting returned control to.
        active_player: u8,
    },
    /// Targeting was cancelled.
    TargetingCanceled,
    /// Priority passed within targeting resolution.
    PriorityPassed {
        /// Remaining targets awaiting priority, head first.
        awaiting_priority: Vec<u8>,
        /// The player now holding priority.
        active_player: u8,
    },
    /// A feedback entry was recorded.
    FeedbackSubmitted {
        /// The stored entry's id.
        id: String,
    },
    /// The current feedback list.
    FeedbackList {
        /// Entries, most recent first.
        entries: Vec<FeedbackEntry>,
    },
    /// A feedback entry was edited.
    FeedbackUpdated {
        /// The edited entry's id.
        id: String,
    },
    /// A feedback entry was deleted.
    FeedbackDeleted {
        /// The deleted entry's id.
        id: String,
    },
}

/// `error.data` payload (§6/§7): a short message from a finite catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable message, drawn from the catalog in §7.
    pub message: String,
    /// Machine-readable kind, for client-side branching.
    pub kind: &'static str,
}

/// One stored feedback entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    /// Opaque id.
    pub id: String,
    /// Submitting controller id.
    pub controller_id: String,
    /// Body text.
    pub text: String,
    /// Submission wall-clock time, ms.
    pub created_at: i64,
}

impl ServerMessage {
    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ClientMessage {
    /// Parse an inbound frame. Malformed JSON or an unrecognized `type`
    /// both surface through this single entry point; the dispatcher
    /// distinguishes the two cases by the serde error contents only when
    /// logging, since both map to user-facing errors from §7.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_settings() -> WireSettings {
        WireSettings {
            player_count: 2,
            initial_time_ms: 600_000,
            warning_thresholds_ms: vec![60_000, 30_000],
            anyone_may_start: true,
            anyone_may_switch_when_unclaimed: true,
            default_timeout_resolution: TimeoutResolution::LoseLives,
        }
    }

    #[test]
    fn create_message_round_trips_through_json() {
        let msg = ClientMessage::Create {
            name: "Table 1".to_string(),
            mode: "casual".to_string(),
            settings: sample_settings(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed = ClientMessage::from_json(&json).unwrap();
        match parsed {
            ClientMessage::Create { name, mode, .. } => {
                assert_eq!(name, "Table 1");
                assert_eq!(mode, "casual");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let err = ClientMessage::from_json(r#"{"type":"doesNotExist","data":{}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn settings_out_of_bounds_player_count_is_rejected() {
        let mut settings = sample_settings();
        settings.player_count = 1;
        assert!(settings.into_settings().is_err());
    }

    #[test]
    fn settings_excess_time_is_rejected() {
        let mut settings = sample_settings();
        settings.initial_time_ms = 86_400_001;
        assert!(settings.into_settings().is_err());
    }

    #[test]
    fn settings_within_bounds_convert_cleanly() {
        let settings = sample_settings();
        let converted = settings.into_settings().unwrap();
        assert_eq!(converted.player_count, 2);
    }

    #[test]
    fn mode_from_wire_recognizes_named_modes() {
        assert_eq!(parse_mode("casual"), Mode::Casual);
        assert_eq!(parse_mode("campaign"), Mode::Campaign);
        assert_eq!(parse_mode("draft"), Mode::Custom("draft".to_string()));
    }
}
