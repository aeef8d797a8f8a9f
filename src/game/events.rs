//! Internal session events.
//!
//! Operations in [`crate::game::ops`] and the [`crate::game::tick`] engine
//! return these; [`crate::network::dispatcher`] maps each to the matching
//! outbound wire message (§6) and hands it to the [`crate::bus::FanOutBus`].

use serde::{Deserialize, Serialize};

use crate::game::state::TimeoutResolution;

/// Something that happened to a session as the result of an accepted
/// mutation or a tick. One inbound message or tick can produce several.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum GameEvent {
    /// Per-tick time decrement, carrying a compact per-player time map.
    Tick {
        /// `(player id, time remaining ms)` pairs, in player order.
        times: Vec<(u8, i64)>,
    },

    /// The active player's remaining time crossed a warning threshold
    /// downward.
    Warning {
        /// The player whose timer crossed the threshold.
        player_id: u8,
        /// The threshold crossed, in ms.
        threshold_ms: i64,
    },

    /// The active player's timer reached zero.
    Timeout {
        /// The player whose timer expired.
        player_id: u8,
    },

    /// A player slot was claimed. The token itself travels out-of-band,
    /// directly to the claimer — never through this event.
    Claimed {
        /// The claimed slot.
        player_id: u8,
        /// The controller that now holds it.
        controller_id: String,
    },

    /// A controller reconnected to a previously claimed slot. As with
    /// `Claimed`, the new token is delivered only to the reconnecting
    /// controller, not carried on this event.
    Reconnected {
        /// The slot that was reattached.
        player_id: u8,
        /// The controller now attached to it.
        controller_id: String,
    },

    /// Targeting/priority entered `resolving`.
    TargetingStarted {
        /// Remaining targets awaiting priority, head first.
        awaiting_priority: Vec<u8>,
        /// The player now holding priority.
        active_player: u8,
    },

    /// A target's selections changed while still `selecting`.
    TargetingUpdated {
        /// Targets currently selected, in selection order.
        targeted_players: Vec<u8>,
    },

    /// Priority passed to the next awaiting target.
    PriorityPassed {
        /// Remaining targets awaiting priority, head first.
        awaiting_priority: Vec<u8>,
        /// The player now holding priority.
        active_player: u8,
    },

    /// Priority queue drained; control returned to the original player.
    TargetingComplete {
        /// The player targeting returned control to.
        active_player: u8,
    },

    /// Targeting was cancelled before completion.
    TargetingCanceled,

    /// The interrupt queue gained an entry.
    InterruptRaised {
        /// The player who raised the interrupt.
        player_id: u8,
    },

    /// Priority passed within the interrupt queue.
    InterruptPriorityPassed {
        /// Remaining interrupters, head first.
        interrupting_players: Vec<u8>,
    },

    /// A timeout was resolved by the controller's (or mode default's) choice.
    TimeoutResolved {
        /// The player whose timeout was resolved.
        player_id: u8,
        /// The resolution applied.
        resolution: TimeoutResolution,
    },

    /// The game ended (explicit `endGame`, or terminal elimination state).
    GameEnded,

    /// The session's display name changed.
    GameRenamed {
        /// The new name.
        name: String,
    },

    /// A random starting player was selected.
    RandomPlayerSelected {
        /// The selected player.
        player_id: u8,
    },

    /// A die was rolled.
    DiceRolled {
        /// Number of sides on the die rolled.
        sides: u8,
        /// The result, in `[1, sides]`.
        result: u8,
    },

    /// Play order was randomized.
    PlayOrderRolled {
        /// The new play order, by player id.
        order: Vec<u8>,
    },

    /// A player was forcibly removed by a pseudo-admin action.
    Kicked {
        /// The player that was kicked.
        player_id: u8,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_round_trip_through_json() {
        let event = GameEvent::TargetingStarted {
            awaiting_priority: vec![2, 3],
            active_player: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: GameEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            GameEvent::TargetingStarted { awaiting_priority, active_player } => {
                assert_eq!(awaiting_priority, vec![2, 3]);
                assert_eq!(active_player, 2);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
