//! Session and player state (§3).
//!
//! Everything here is plain data: serializable as-is, no behavior, no
//! back-pointers (a `Player` never points to its `Session`; callers pass
//! both, per §9 "Cyclic/back references"). This is exactly what the Store
//! persists; [`crate::cache`] wraps it but does not change its shape.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds, the unit every timestamp and
/// duration in the session model is expressed in.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

/// Session run state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Created, not yet started.
    Waiting,
    /// Ticking; exactly one player's timer decrements.
    Running,
    /// Ticking suspended; resumes where it left off.
    Paused,
    /// Terminal; no further mutation accepted except read access.
    Finished,
}

/// Session mode. `Custom` carries any mode name a client supplies that
/// isn't one of the two named defaults, keeping the registry open at the
/// wire boundary while staying a closed Rust enum internally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Default mode: no special timeout/admin behavior.
    Casual,
    /// Long-running game across several sittings.
    Campaign,
    /// Anything else a client names.
    Custom(String),
}

impl Mode {
    /// Parse a wire-supplied mode name.
    pub fn from_wire(name: &str) -> Self {
        match name {
            "casual" => Mode::Casual,
            "campaign" => Mode::Campaign,
            other => Mode::Custom(other.to_string()),
        }
    }
}

/// Targeting/priority sub-state-machine state (§3 invariant 6, §4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetingState {
    /// No targeting in progress.
    None,
    /// Active player is choosing targets.
    Selecting,
    /// Targets are being asked, in order, whether to act first.
    Resolving,
}

/// Closed enum of timeout resolutions a controller (or the mode default)
/// may choose (§4.4 "Timeout resolution").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutResolution {
    /// Subtract from `life`.
    LoseLives,
    /// Add to `drunkCounter`.
    GainDrunk,
    /// Eliminate the player.
    Die,
}

/// Session-wide settings (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Number of player slots, fixed for the session's life (§3 invariant 1).
    pub player_count: u8,
    /// Starting `timeRemaining` for every player, in ms.
    pub initial_time_ms: i64,
    /// Ordered ascending thresholds (ms) that emit a `warning` when crossed
    /// downward.
    pub warning_thresholds_ms: Vec<i64>,
    /// Whether any unclaimed controller may `start` the game.
    pub anyone_may_start: bool,
    /// Whether any controller may `switchPlayer` when the target slot is
    /// unclaimed (in addition to the active player's controller and owner).
    pub anyone_may_switch_when_unclaimed: bool,
    /// Resolution applied automatically for modes that don't collect a
    /// manual timeout choice.
    pub default_timeout_resolution: TimeoutResolution,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            player_count: 2,
            initial_time_ms: 10 * 60 * 1000,
            warning_thresholds_ms: vec![60_000, 30_000, 10_000],
            anyone_may_start: true,
            anyone_may_switch_when_unclaimed: true,
            default_timeout_resolution: TimeoutResolution::LoseLives,
        }
    }
}

/// One player slot (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Player {
    /// Slot id, in `[1, playerCount]`.
    pub id: u8,
    /// Display name, already sanitized per [`crate::core::sanitize`].
    pub name: String,
    /// Display color, an opaque client-chosen string (hex code, name, ...).
    pub color: String,
    /// Time remaining on this slot's clock, ms. Never negative.
    pub time_remaining_ms: i64,
    /// Life total, `[-999, 9999]`.
    pub life: i32,
    /// Drink-counter-style counter, `[0, 999]`.
    pub drunk_counter: u32,
    /// Freeform mode-specific counter, `[0, 999]`.
    pub generic_counter: u32,
    /// Whether this slot has been eliminated.
    pub is_eliminated: bool,
    /// Controller id currently holding this slot, if any.
    pub claimed_by: Option<String>,
    /// Reconnect secret for the current claim, if any (§4.9).
    pub reconnect_token: Option<String>,
    /// Expiry of `reconnect_token`, ms since epoch.
    pub token_expiry: Option<i64>,
    /// Whether this slot has an unresolved timeout.
    pub timeout_pending: bool,
}

impl Player {
    /// Construct a fresh, unclaimed slot at session creation/reset time.
    pub fn new(id: u8, initial_time_ms: i64) -> Self {
        Self {
            id,
            name: format!("Player {id}"),
            color: String::new(),
            time_remaining_ms: initial_time_ms,
            life: 0,
            drunk_counter: 0,
            generic_counter: 0,
            is_eliminated: false,
            claimed_by: None,
            reconnect_token: None,
            token_expiry: None,
            timeout_pending: false,
        }
    }

    /// Whether `token` is valid (matches and unexpired) for this slot right
    /// now, per §4.9's constant-time comparison contract.
    pub fn token_is_valid(&self, token: &str, now: i64) -> bool {
        match (&self.reconnect_token, self.token_expiry) {
            (Some(stored), Some(expiry)) => {
                crate::core::token::tokens_equal(stored, token) && now < expiry
            }
            _ => false,
        }
    }
}

/// One coordination session (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    /// Six-character id (§3/§6).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Session mode.
    pub mode: Mode,
    /// Run state.
    pub status: Status,
    /// First controller to attach; immutable once set except on restore
    /// (§3 invariant 8).
    pub owner_id: Option<String>,
    /// Creation wall-clock time, ms.
    pub created_at: i64,
    /// Monotonic last-mutation wall-clock time, ms (§3 invariant 7).
    pub last_activity: i64,
    /// Player slots, fixed length for the session's life.
    pub players: Vec<Player>,
    /// The slot whose timer is decrementing, if any.
    pub active_player: Option<u8>,
    /// Session-wide settings.
    pub settings: Settings,
    /// Targeting sub-state.
    pub targeting_state: TargetingState,
    /// Targets selected, in selection order.
    pub targeted_players: Vec<u8>,
    /// Targets still awaiting priority, head-first.
    pub awaiting_priority: VecDeque<u8>,
    /// The active player before targeting began; restored when targeting
    /// completes.
    pub original_active_player: Option<u8>,
    /// Out-of-turn interrupt priority queue, independent of targeting.
    pub interrupting_players: VecDeque<u8>,
    /// Tombstone flag; `true` means this session will never mutate again
    /// and reconnects should see a definite not-found (§4.8).
    pub is_closed: bool,
}

impl Session {
    /// Construct a new session in `waiting` with `playerCount` fresh,
    /// unclaimed slots.
    pub fn new(id: String, name: String, mode: Mode, settings: Settings) -> Self {
        let now = now_ms();
        let players = (1..=settings.player_count)
            .map(|pid| Player::new(pid, settings.initial_time_ms))
            .collect();
        Self {
            id,
            name,
            mode,
            status: Status::Waiting,
            owner_id: None,
            created_at: now,
            last_activity: now,
            players,
            active_player: None,
            settings,
            targeting_state: TargetingState::None,
            targeted_players: Vec::new(),
            awaiting_priority: VecDeque::new(),
            original_active_player: None,
            interrupting_players: VecDeque::new(),
            is_closed: false,
        }
    }

    /// Bump `lastActivity` to at least `now`, preserving monotonicity
    /// (§3 invariant 7) even under clock skew between calls.
    pub fn touch(&mut self) {
        let now = now_ms();
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    /// Look up a player slot by id.
    pub fn player(&self, id: u8) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    /// Mutable lookup of a player slot by id.
    pub fn player_mut(&mut self, id: u8) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    /// Whether `id` is a valid slot id for this session.
    pub fn is_valid_player_id(&self, id: u8) -> bool {
        id >= 1 && id <= self.settings.player_count
    }

    /// The controller holding `id`'s slot, if claimed.
    pub fn controller_of(&self, id: u8) -> Option<&str> {
        self.player(id).and_then(|p| p.claimed_by.as_deref())
    }

    /// Every slot id claimed by `controller_id`, in player order. Invariant
    /// 3 (§3) bounds this to at most one element.
    pub fn slots_claimed_by(&self, controller_id: &str) -> Vec<u8> {
        self.players
            .iter()
            .filter(|p| p.claimed_by.as_deref() == Some(controller_id))
            .map(|p| p.id)
            .collect()
    }

    /// Whether `controller_id` holds any claim in this session at all
    /// (the "pseudo-admin" authorization predicate, §4.4).
    pub fn has_any_claim(&self, controller_id: &str) -> bool {
        self.players.iter().any(|p| p.claimed_by.as_deref() == Some(controller_id))
    }

    /// Next player after `from`, skipping eliminated slots, circular over
    /// `players`; `None` if every other slot is eliminated (§4.4
    /// "Next-active selection").
    pub fn find_next_active(&self, from: u8) -> Option<u8> {
        let n = self.players.len();
        if n == 0 {
            return None;
        }
        let start_idx = self.players.iter().position(|p| p.id == from)?;
        for offset in 1..=n {
            let idx = (start_idx + offset) % n;
            let candidate = &self.players[idx];
            if candidate.id != from && !candidate.is_eliminated {
                return Some(candidate.id);
            }
        }
        None
    }

    /// First non-eliminated player, in slot order; used to seed
    /// `activePlayer` on `start`.
    pub fn first_eligible(&self) -> Option<u8> {
        self.players.iter().find(|p| !p.is_eliminated).map(|p| p.id)
    }

    /// Debug-only invariant check over §3's numbered invariants 1-3, 6.
    /// Invariants 4/5/7/8 are enforced by construction at each mutation
    /// site instead of re-derivable from a snapshot.
    #[cfg(debug_assertions)]
    pub fn check_invariants(&self) {
        debug_assert_eq!(self.players.len(), self.settings.player_count as usize);
        if let Some(active) = self.active_player {
            let p = self.player(active).expect("activePlayer names a real slot");
            debug_assert!(!p.is_eliminated, "activePlayer must not be eliminated");
        }
        let mut seen = std::collections::HashSet::new();
        for p in &self.players {
            if let Some(c) = &p.claimed_by {
                debug_assert!(seen.insert(c.clone()), "controller {c} claims more than one slot");
            }
        }
        match self.targeting_state {
            TargetingState::Selecting => {
                debug_assert!(!self.targeted_players.is_empty() || self.targeted_players.is_empty());
            }
            TargetingState::Resolving => {
                debug_assert!(self.original_active_player.is_some());
            }
            TargetingState::None => {
                debug_assert!(self.targeted_players.is_empty());
                debug_assert!(self.awaiting_priority.is_empty());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(player_count: u8) -> Session {
        let settings = Settings { player_count, ..Settings::default() };
        Session::new("ABCDEF".to_string(), "Test".to_string(), Mode::Casual, settings)
    }

    #[test]
    fn new_session_has_fixed_player_count() {
        let s = session(4);
        assert_eq!(s.players.len(), 4);
        assert_eq!(s.players[0].id, 1);
        assert_eq!(s.players[3].id, 4);
    }

    #[test]
    fn find_next_active_skips_eliminated() {
        let mut s = session(4);
        s.player_mut(2).unwrap().is_eliminated = true;
        s.player_mut(3).unwrap().is_eliminated = true;
        assert_eq!(s.find_next_active(1), Some(4));
    }

    #[test]
    fn find_next_active_returns_none_when_all_others_eliminated() {
        let mut s = session(3);
        s.player_mut(2).unwrap().is_eliminated = true;
        s.player_mut(3).unwrap().is_eliminated = true;
        assert_eq!(s.find_next_active(1), None);
    }

    #[test]
    fn slots_claimed_by_is_bounded_to_one() {
        let mut s = session(3);
        s.player_mut(1).unwrap().claimed_by = Some("ctrl-a".to_string());
        assert_eq!(s.slots_claimed_by("ctrl-a"), vec![1]);
        assert_eq!(s.slots_claimed_by("ctrl-b"), Vec::<u8>::new());
    }

    #[test]
    fn serialization_round_trips() {
        let s = session(3);
        let json = serde_json::to_string(&s).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, s.id);
        assert_eq!(back.players.len(), s.players.len());
    }
}
