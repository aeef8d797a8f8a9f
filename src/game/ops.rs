//! Session mutating operations and authorization (§4.4).
//!
//! Every function here takes `&mut Session` plus a `controller_id` and
//! returns [`OpResult`]: the events to broadcast, and — for `claim` and
//! `reconnect` only — the freshly minted token, which must be delivered to
//! the caller alone (§4.9). Callers (the dispatcher, via
//! [`crate::lock::SessionLockTable`]) are expected to hold the session's
//! lock for the whole call.

use rand::Rng;

use crate::error::CoreError;
use crate::game::events::GameEvent;
use crate::game::state::{now_ms, Session, Settings, Status, TargetingState, TimeoutResolution};

/// What an operation produced: events to fan out, and an optional secret
/// that must reach only the calling controller.
#[derive(Debug, Default)]
pub struct OpOutcome {
    /// Events to broadcast to the session's subscribers.
    pub events: Vec<GameEvent>,
    /// Present only for `claim`/`reconnect`: the fresh token for the caller.
    pub private_token: Option<String>,
}

impl OpOutcome {
    fn of(events: Vec<GameEvent>) -> Self {
        Self { events, private_token: None }
    }
}

/// Result of a mutating session operation.
pub type OpResult = Result<OpOutcome, CoreError>;

fn is_owner(session: &Session, controller_id: &str) -> bool {
    session.owner_id.as_deref() == Some(controller_id)
}

/// Game-control authorization: owner or any claimed controller (§4.4).
fn can_control_game(session: &Session, controller_id: &str) -> bool {
    is_owner(session, controller_id) || session.has_any_claim(controller_id)
}

/// Per-player mutation authorization: slot owner, session owner, or
/// anyone when the slot is unclaimed and the game is `waiting` (§4.4).
fn can_mutate_player(session: &Session, controller_id: &str, player_id: u8) -> bool {
    if is_owner(session, controller_id) {
        return true;
    }
    match session.controller_of(player_id) {
        Some(owner) => owner == controller_id,
        None => session.status == Status::Waiting,
    }
}

/// Pseudo-admin authorization: any claim at all (§4.4 "revive, kick,
/// addTime require only that the caller has any claim").
fn is_pseudo_admin(session: &Session, controller_id: &str) -> bool {
    is_owner(session, controller_id) || session.has_any_claim(controller_id)
}

fn validate_player_id(session: &Session, player_id: u8) -> Result<(), CoreError> {
    if session.is_valid_player_id(player_id) {
        Ok(())
    } else {
        Err(CoreError::InvalidPlayerId)
    }
}

/// `join` — attaches the first controller as owner if none set yet; every
/// subsequent `join` is a no-op with respect to ownership (§3 invariant 8).
/// Always succeeds; there is no slot reservation at join time, only at
/// `claim`.
pub fn join(session: &mut Session, controller_id: &str) -> OpOutcome {
    if session.owner_id.is_none() {
        session.owner_id = Some(controller_id.to_string());
    }
    session.touch();
    OpOutcome::default()
}

/// `start` (§4.4).
pub fn start(session: &mut Session, controller_id: &str) -> OpResult {
    if session.status != Status::Waiting {
        return Err(CoreError::WrongState("Game has already started".to_string()));
    }
    let authorized = is_owner(session, controller_id)
        || (session.settings.anyone_may_start && session.has_any_claim(controller_id));
    if !authorized {
        return Err(CoreError::NotAuthorized { verb: "start the game" });
    }
    session.status = Status::Running;
    session.active_player = session.first_eligible();
    session.touch();
    Ok(OpOutcome::default())
}

/// `pause`/`resume` (§4.4) — a single toggle, as specified.
pub fn toggle_pause(session: &mut Session, controller_id: &str) -> OpResult {
    if !matches!(session.status, Status::Running | Status::Paused) {
        return Err(CoreError::GameNotRunning);
    }
    if !can_control_game(session, controller_id) {
        return Err(CoreError::NotAuthorized { verb: "pause or resume the game" });
    }
    session.status = match session.status {
        Status::Running => Status::Paused,
        Status::Paused => Status::Running,
        other => other,
    };
    session.touch();
    Ok(OpOutcome::default())
}

/// Auto-pause triggered when the last local subscriber disconnects from a
/// running game (§4.4). Not authorization-gated; the lifecycle manager
/// calls this directly.
pub fn auto_pause(session: &mut Session) {
    if session.status == Status::Running {
        session.status = Status::Paused;
        session.touch();
    }
}

/// `reset` — owner-only (§4.4). Uses the exact literal from the
/// end-to-end scenario (§8 scenario 2) rather than the generic
/// `NotAuthorized` phrasing.
pub fn reset(session: &mut Session, controller_id: &str) -> OpResult {
    if !is_owner(session, controller_id) {
        return Err(CoreError::OnlyOwnerCanReset);
    }
    for player in &mut session.players {
        player.time_remaining_ms = session.settings.initial_time_ms;
        player.timeout_pending = false;
    }
    session.targeting_state = TargetingState::None;
    session.targeted_players.clear();
    session.awaiting_priority.clear();
    session.original_active_player = None;
    session.interrupting_players.clear();
    session.status = Status::Waiting;
    session.active_player = None;
    session.touch();
    Ok(OpOutcome::default())
}

/// `switchPlayer(next)` (§4.4).
pub fn switch_player(session: &mut Session, controller_id: &str, next: u8) -> OpResult {
    if session.targeting_state != TargetingState::None {
        return Err(CoreError::WrongState(
            "Cannot switch players while targeting or priority is active".to_string(),
        ));
    }
    validate_player_id(session, next)?;
    if session.player(next).map(|p| p.is_eliminated).unwrap_or(true) {
        return Err(CoreError::InvalidTarget);
    }
    let active_controller = session.active_player.and_then(|a| session.controller_of(a));
    let authorized = is_owner(session, controller_id)
        || active_controller == Some(controller_id)
        || (session.settings.anyone_may_switch_when_unclaimed
            && !session.has_any_claim(controller_id));
    if !authorized {
        return Err(CoreError::NotAuthorized { verb: "switch the active player" });
    }
    session.active_player = Some(next);
    session.touch();
    Ok(OpOutcome::default())
}

/// `passTurn` — resolves to `switchPlayer(findNextActive)` (§4.4).
pub fn pass_turn(session: &mut Session, controller_id: &str) -> OpResult {
    let current = session.active_player.ok_or(CoreError::GameNotRunning)?;
    let next = session.find_next_active(current).ok_or(CoreError::GameNotRunning)?;
    switch_player(session, controller_id, next)
}

/// `claim(playerId, controllerId)` (§4.4).
pub fn claim(session: &mut Session, controller_id: &str, player_id: u8) -> OpResult {
    validate_player_id(session, player_id)?;
    let now = now_ms();
    let already_mine = session.controller_of(player_id) == Some(controller_id);
    let unclaimed = session.controller_of(player_id).is_none();
    if !already_mine && !unclaimed {
        return Err(CoreError::PlayerAlreadyClaimed);
    }
    let token = crate::core::token::generate_reconnect_token();
    let expiry = now + crate::config::RECONNECT_TOKEN_TTL.as_millis() as i64;
    {
        let p = session.player_mut(player_id).expect("validated above");
        p.claimed_by = Some(controller_id.to_string());
        p.reconnect_token = Some(token.clone());
        p.token_expiry = Some(expiry);
    }
    if session.owner_id.is_none() {
        session.owner_id = Some(controller_id.to_string());
    }
    session.touch();
    Ok(OpOutcome {
        events: vec![GameEvent::Claimed { player_id, controller_id: controller_id.to_string() }],
        private_token: Some(token),
    })
}

/// `unclaim(controllerId)` (§4.4) — clears every slot held by the caller.
pub fn unclaim(session: &mut Session, controller_id: &str) -> OpOutcome {
    let mut events = Vec::new();
    for player in &mut session.players {
        if player.claimed_by.as_deref() == Some(controller_id) {
            player.claimed_by = None;
            player.reconnect_token = None;
            player.token_expiry = None;
            events.push(GameEvent::Kicked { player_id: player.id });
        }
    }
    session.touch();
    OpOutcome::of(events)
}

/// `reconnect(playerId, token, newControllerId)` (§4.4/§4.9).
pub fn reconnect(
    session: &mut Session,
    player_id: u8,
    token: &str,
    new_controller_id: &str,
) -> OpResult {
    validate_player_id(session, player_id)?;
    let now = now_ms();
    let valid = session
        .player(player_id)
        .map(|p| p.token_is_valid(token, now))
        .unwrap_or(false);
    if !valid {
        return Err(CoreError::InvalidToken);
    }
    let fresh = crate::core::token::generate_reconnect_token();
    let expiry = now + crate::config::RECONNECT_TOKEN_TTL.as_millis() as i64;
    {
        let p = session.player_mut(player_id).expect("validated above");
        p.claimed_by = Some(new_controller_id.to_string());
        p.reconnect_token = Some(fresh.clone());
        p.token_expiry = Some(expiry);
    }
    session.touch();
    Ok(OpOutcome {
        events: vec![GameEvent::Reconnected {
            player_id,
            controller_id: new_controller_id.to_string(),
        }],
        private_token: Some(fresh),
    })
}

/// `eliminate(playerId)` (§4.4) — pseudo-admin authorized.
pub fn eliminate(session: &mut Session, controller_id: &str, player_id: u8) -> OpResult {
    validate_player_id(session, player_id)?;
    if !is_pseudo_admin(session, controller_id) {
        return Err(CoreError::MustClaimToAct { verb: "eliminate a player" });
    }
    session.player_mut(player_id).expect("validated above").is_eliminated = true;
    let mut events = vec![];
    if session.active_player == Some(player_id) {
        session.active_player = session.find_next_active(player_id);
    }
    events.push(GameEvent::Kicked { player_id });
    session.touch();
    Ok(OpOutcome::of(events))
}

/// `adminRevive(playerId)` (§4.4 inverse of eliminate) — pseudo-admin.
pub fn admin_revive(session: &mut Session, controller_id: &str, player_id: u8) -> OpResult {
    validate_player_id(session, player_id)?;
    if !is_pseudo_admin(session, controller_id) {
        return Err(CoreError::MustClaimToAct { verb: "revive a player" });
    }
    session.player_mut(player_id).expect("validated above").is_eliminated = false;
    session.touch();
    Ok(OpOutcome::default())
}

/// `adminKick(playerId)` — forcibly clears a claim and eliminates the slot.
pub fn admin_kick(session: &mut Session, controller_id: &str, player_id: u8) -> OpResult {
    validate_player_id(session, player_id)?;
    if !is_pseudo_admin(session, controller_id) {
        return Err(CoreError::MustClaimToAct { verb: "kick a player" });
    }
    {
        let p = session.player_mut(player_id).expect("validated above");
        p.claimed_by = None;
        p.reconnect_token = None;
        p.token_expiry = None;
        p.is_eliminated = true;
    }
    if session.active_player == Some(player_id) {
        session.active_player = session.find_next_active(player_id);
    }
    session.touch();
    Ok(OpOutcome::of(vec![GameEvent::Kicked { player_id }]))
}

/// `adminAddTime(playerId, minutes)` — bounded 1-60 minutes (§6).
pub fn admin_add_time(
    session: &mut Session,
    controller_id: &str,
    player_id: u8,
    minutes: u32,
) -> OpResult {
    validate_player_id(session, player_id)?;
    if !(1..=60).contains(&minutes) {
        return Err(CoreError::InvalidSettings);
    }
    if !is_pseudo_admin(session, controller_id) {
        return Err(CoreError::MustClaimToAct { verb: "add time to a player" });
    }
    let p = session.player_mut(player_id).expect("validated above");
    p.time_remaining_ms += (minutes as i64) * 60_000;
    session.touch();
    Ok(OpOutcome::default())
}

/// `updatePlayer` — free-form field updates, per-player authorized (§4.4).
pub struct PlayerUpdate {
    /// New display name, if changing (already validated/sanitized by the
    /// dispatcher before this point).
    pub name: Option<String>,
    /// New color, if changing.
    pub color: Option<String>,
    /// New life total, if changing; must already be within `[-999, 9999]`.
    pub life: Option<i32>,
    /// New drunk counter, if changing; must already be within `[0, 999]`.
    pub drunk_counter: Option<u32>,
    /// New generic counter, if changing; must already be within `[0, 999]`.
    pub generic_counter: Option<u32>,
}

/// `updatePlayer(playerId, ...)` (§4.4).
pub fn update_player(
    session: &mut Session,
    controller_id: &str,
    player_id: u8,
    update: PlayerUpdate,
) -> OpResult {
    validate_player_id(session, player_id)?;
    if !can_mutate_player(session, controller_id, player_id) {
        return Err(CoreError::NotAuthorized { verb: "update that player" });
    }
    let p = session.player_mut(player_id).expect("validated above");
    if let Some(name) = update.name {
        p.name = name;
    }
    if let Some(color) = update.color {
        p.color = color;
    }
    if let Some(life) = update.life {
        p.life = life;
    }
    if let Some(d) = update.drunk_counter {
        p.drunk_counter = d;
    }
    if let Some(g) = update.generic_counter {
        p.generic_counter = g;
    }
    session.touch();
    Ok(OpOutcome::default())
}

/// `addPenalty(playerId, drunkDelta)` (§4.4) — convenience over
/// `updatePlayer` that increments `drunkCounter`, clamped to `[0, 999]`.
pub fn add_penalty(session: &mut Session, controller_id: &str, player_id: u8, amount: u32) -> OpResult {
    validate_player_id(session, player_id)?;
    if !can_mutate_player(session, controller_id, player_id) {
        return Err(CoreError::NotAuthorized { verb: "penalize that player" });
    }
    let p = session.player_mut(player_id).expect("validated above");
    p.drunk_counter = (p.drunk_counter + amount).min(999);
    session.touch();
    Ok(OpOutcome::default())
}

/// `updateSettings` (§4.4/§6) — game-control authorized, `waiting` only.
pub fn update_settings(session: &mut Session, controller_id: &str, settings: Settings) -> OpResult {
    if session.status != Status::Waiting {
        return Err(CoreError::WrongState("Settings can only change before start".to_string()));
    }
    if !can_control_game(session, controller_id) {
        return Err(CoreError::NotAuthorized { verb: "change game settings" });
    }
    if settings.player_count != session.settings.player_count {
        // player_count is fixed for the session's life (§3 invariant 1);
        // changing slot count happens only by creating a new session.
        return Err(CoreError::InvalidSettings);
    }
    session.settings = settings;
    session.touch();
    Ok(OpOutcome::default())
}

/// `endGame` (§4.4) — game-control authorized.
pub fn end_game(session: &mut Session, controller_id: &str) -> OpResult {
    if !can_control_game(session, controller_id) {
        return Err(CoreError::NotAuthorized { verb: "end the game" });
    }
    session.status = Status::Finished;
    session.active_player = None;
    session.touch();
    Ok(OpOutcome::of(vec![GameEvent::GameEnded]))
}

/// `renameGame(name)` (§4.4) — game-control authorized.
pub fn rename_game(session: &mut Session, controller_id: &str, name: String) -> OpResult {
    if !can_control_game(session, controller_id) {
        return Err(CoreError::NotAuthorized { verb: "rename the game" });
    }
    session.name = name.clone();
    session.touch();
    Ok(OpOutcome::of(vec![GameEvent::GameRenamed { name }]))
}

/// `randomStartPlayer` (§4.4) — game-control authorized.
pub fn random_start_player(session: &mut Session, controller_id: &str) -> OpResult {
    if !can_control_game(session, controller_id) {
        return Err(CoreError::NotAuthorized { verb: "pick a random start player" });
    }
    let eligible: Vec<u8> = session.players.iter().filter(|p| !p.is_eliminated).map(|p| p.id).collect();
    if eligible.is_empty() {
        return Err(CoreError::WrongState("No eligible players".to_string()));
    }
    let pick = eligible[rand::thread_rng().gen_range(0..eligible.len())];
    session.active_player = Some(pick);
    session.touch();
    Ok(OpOutcome::of(vec![GameEvent::RandomPlayerSelected { player_id: pick }]))
}

/// `rollDice(sides)` (§6: sides ∈ [2,100]) — any claimed controller.
pub fn roll_dice(session: &mut Session, controller_id: &str, sides: u8) -> OpResult {
    if !(2..=100).contains(&sides) {
        return Err(CoreError::InvalidSettings);
    }
    if !is_pseudo_admin(session, controller_id) {
        return Err(CoreError::MustClaimToAct { verb: "roll dice" });
    }
    let result = rand::thread_rng().gen_range(1..=sides);
    session.touch();
    Ok(OpOutcome::of(vec![GameEvent::DiceRolled { sides, result }]))
}

/// `rollPlayOrder` (§4.4) — any claimed controller; produces a random
/// permutation of player ids without reordering the session's canonical
/// `players` vector (slot identity is stable for the session's life).
pub fn roll_play_order(session: &mut Session, controller_id: &str) -> OpResult {
    if !is_pseudo_admin(session, controller_id) {
        return Err(CoreError::MustClaimToAct { verb: "roll the play order" });
    }
    let mut order: Vec<u8> = session.players.iter().map(|p| p.id).collect();
    let mut rng = rand::thread_rng();
    for i in (1..order.len()).rev() {
        let j = rng.gen_range(0..=i);
        order.swap(i, j);
    }
    session.touch();
    Ok(OpOutcome::of(vec![GameEvent::PlayOrderRolled { order }]))
}

/// `timeoutChoice(playerId, resolution)` (§4.4 "Timeout resolution").
pub fn resolve_timeout(
    session: &mut Session,
    controller_id: &str,
    player_id: u8,
    resolution: TimeoutResolution,
) -> OpResult {
    validate_player_id(session, player_id)?;
    let pending = session.player(player_id).map(|p| p.timeout_pending).unwrap_or(false);
    if !pending {
        return Err(CoreError::WrongState("No timeout is pending for that player".to_string()));
    }
    let authorized = is_owner(session, controller_id)
        || session.controller_of(player_id) == Some(controller_id);
    if !authorized {
        return Err(CoreError::NotAuthorized { verb: "resolve that timeout" });
    }
    apply_timeout_resolution(session, player_id, resolution);
    Ok(OpOutcome::of(vec![GameEvent::TimeoutResolved { player_id, resolution }]))
}

fn apply_timeout_resolution(session: &mut Session, player_id: u8, resolution: TimeoutResolution) {
    {
        let p = session.player_mut(player_id).expect("validated by caller");
        p.timeout_pending = false;
        match resolution {
            TimeoutResolution::LoseLives => p.life -= 1,
            TimeoutResolution::GainDrunk => p.drunk_counter = (p.drunk_counter + 1).min(999),
            TimeoutResolution::Die => p.is_eliminated = true,
        }
    }
    if session.active_player == Some(player_id) {
        session.active_player = session.find_next_active(player_id);
    }
    session.touch();
}

/// Auto-apply `settings.default_timeout_resolution` for a timed-out player
/// with no claimed controller, used by the Tick Engine. An unclaimed slot
/// has nobody who could ever submit a manual `timeoutChoice`, so leaving
/// `timeoutPending` set would strand the session forever; every other
/// timed-out slot waits for [`resolve_timeout`] as usual.
pub fn auto_resolve_timeout(session: &mut Session, player_id: u8) -> GameEvent {
    let resolution = session.settings.default_timeout_resolution;
    apply_timeout_resolution(session, player_id, resolution);
    GameEvent::TimeoutResolved { player_id, resolution }
}

/// `toggleTarget(playerId)` (§4.4 targeting).
pub fn toggle_target(session: &mut Session, controller_id: &str, player_id: u8) -> OpResult {
    validate_player_id(session, player_id)?;
    let active = session.active_player.ok_or(CoreError::GameNotRunning)?;
    if session.targeting_state == TargetingState::Resolving {
        return Err(CoreError::CannotChangeTargetsNow);
    }
    let authorized = is_owner(session, controller_id) || session.controller_of(active) == Some(controller_id);
    if !authorized {
        return Err(CoreError::NotAuthorized { verb: "change targets" });
    }
    session.targeting_state = TargetingState::Selecting;
    if let Some(pos) = session.targeted_players.iter().position(|&p| p == player_id) {
        session.targeted_players.remove(pos);
    } else {
        session.targeted_players.push(player_id);
    }
    if session.targeted_players.is_empty() {
        session.targeting_state = TargetingState::None;
    }
    session.touch();
    Ok(OpOutcome::of(vec![GameEvent::TargetingUpdated {
        targeted_players: session.targeted_players.clone(),
    }]))
}

/// `confirmTargets` (§4.4 targeting).
pub fn confirm_targets(session: &mut Session, controller_id: &str) -> OpResult {
    let active = session.active_player.ok_or(CoreError::GameNotRunning)?;
    if session.targeting_state != TargetingState::Selecting {
        return Err(CoreError::CannotChangeTargetsNow);
    }
    let authorized = is_owner(session, controller_id) || session.controller_of(active) == Some(controller_id);
    if !authorized {
        return Err(CoreError::NotAuthorized { verb: "confirm targets" });
    }
    if session.targeted_players.is_empty() {
        return Err(CoreError::NoTargetsSelected);
    }
    session.targeting_state = TargetingState::Resolving;
    session.original_active_player = Some(active);
    session.awaiting_priority = session.targeted_players.iter().copied().collect();
    let head = *session.awaiting_priority.front().expect("non-empty per check above");
    session.active_player = Some(head);
    session.touch();
    Ok(OpOutcome::of(vec![GameEvent::TargetingStarted {
        awaiting_priority: session.awaiting_priority.iter().copied().collect(),
        active_player: head,
    }]))
}

/// `passTargetPriority(pid)` (§4.4 targeting).
pub fn pass_target_priority(session: &mut Session, controller_id: &str, pid: u8) -> OpResult {
    if session.targeting_state != TargetingState::Resolving {
        return Err(CoreError::CannotChangeTargetsNow);
    }
    if session.active_player != Some(pid) || session.awaiting_priority.front() != Some(&pid) {
        return Err(CoreError::InvalidTarget);
    }
    let authorized = is_owner(session, controller_id) || session.controller_of(pid) == Some(controller_id);
    if !authorized {
        return Err(CoreError::NotAuthorized { verb: "pass priority" });
    }
    session.awaiting_priority.pop_front();
    if let Some(&next) = session.awaiting_priority.front() {
        session.active_player = Some(next);
        session.touch();
        Ok(OpOutcome::of(vec![GameEvent::PriorityPassed {
            awaiting_priority: session.awaiting_priority.iter().copied().collect(),
            active_player: next,
        }]))
    } else {
        session.targeting_state = TargetingState::None;
        session.targeted_players.clear();
        let original = session.original_active_player.take();
        session.active_player = original;
        session.touch();
        Ok(OpOutcome::of(vec![GameEvent::TargetingComplete {
            active_player: original.unwrap_or(pid),
        }]))
    }
}

/// `cancelTargeting` (§4.4 targeting).
pub fn cancel_targeting(session: &mut Session, controller_id: &str) -> OpResult {
    let authorized = match session.targeting_state {
        TargetingState::Selecting => {
            let active = session.active_player;
            is_owner(session, controller_id)
                || active.and_then(|a| session.controller_of(a)) == Some(controller_id)
        }
        TargetingState::Resolving => {
            let original = session.original_active_player;
            is_owner(session, controller_id)
                || original.and_then(|a| session.controller_of(a)) == Some(controller_id)
        }
        TargetingState::None => return Err(CoreError::CannotChangeTargetsNow),
    };
    if !authorized {
        return Err(CoreError::NotAuthorized { verb: "cancel targeting" });
    }
    if session.targeting_state == TargetingState::Resolving {
        session.active_player = session.original_active_player;
    }
    session.targeting_state = TargetingState::None;
    session.targeted_players.clear();
    session.awaiting_priority.clear();
    session.original_active_player = None;
    session.touch();
    Ok(OpOutcome::of(vec![GameEvent::TargetingCanceled]))
}

/// `interrupt(playerId)` — raises `playerId` into the out-of-turn priority
/// queue (§4.4 "Interrupts ... follow the same pattern").
pub fn interrupt(session: &mut Session, controller_id: &str, player_id: u8) -> OpResult {
    validate_player_id(session, player_id)?;
    let authorized =
        is_owner(session, controller_id) || session.controller_of(player_id) == Some(controller_id);
    if !authorized {
        return Err(CoreError::NotAuthorized { verb: "raise an interrupt" });
    }
    if !session.interrupting_players.contains(&player_id) {
        session.interrupting_players.push_back(player_id);
    }
    session.touch();
    Ok(OpOutcome::of(vec![GameEvent::InterruptRaised { player_id }]))
}

/// `passPriority` — dequeues the head of the interrupt queue (§4.4).
pub fn pass_priority(session: &mut Session, controller_id: &str) -> OpResult {
    let head = *session.interrupting_players.front().ok_or(CoreError::InvalidTarget)?;
    let authorized =
        is_owner(session, controller_id) || session.controller_of(head) == Some(controller_id);
    if !authorized {
        return Err(CoreError::NotAuthorized { verb: "pass priority" });
    }
    session.interrupting_players.pop_front();
    session.touch();
    Ok(OpOutcome::of(vec![GameEvent::InterruptPriorityPassed {
        interrupting_players: session.interrupting_players.iter().copied().collect(),
    }]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Mode, Session, Settings};

    fn two_player_session() -> Session {
        let settings = Settings { player_count: 2, ..Settings::default() };
        let mut s = Session::new("ABCDEF".to_string(), "Test".to_string(), Mode::Casual, settings);
        s.owner_id = Some("owner".to_string());
        s
    }

    #[test]
    fn claim_then_unclaim_restores_pre_claim_state_modulo_activity() {
        let mut s = two_player_session();
        let before = s.players[0].clone_for_test();
        let outcome = claim(&mut s, "alice", 1).unwrap();
        assert!(outcome.private_token.is_some());
        unclaim(&mut s, "alice");
        let after = s.players[0].clone_for_test();
        assert_eq!(before, after);
    }

    #[test]
    fn claim_by_a_second_controller_is_rejected() {
        let mut s = two_player_session();
        claim(&mut s, "alice", 1).unwrap();
        let err = claim(&mut s, "bob", 1).unwrap_err();
        assert_eq!(err.wire_message(), "Player already claimed");
    }

    #[test]
    fn reconnect_with_expired_token_is_rejected() {
        let mut s = two_player_session();
        claim(&mut s, "alice", 1).unwrap();
        let p = s.player_mut(1).unwrap();
        p.token_expiry = Some(now_ms() - 1);
        let stale_token = p.reconnect_token.clone().unwrap();
        let err = reconnect(&mut s, 1, &stale_token, "alice2").unwrap_err();
        assert_eq!(err.wire_message(), "Invalid token");
    }

    #[test]
    fn reconnect_rotates_the_token() {
        let mut s = two_player_session();
        let outcome = claim(&mut s, "alice", 1).unwrap();
        let t1 = outcome.private_token.unwrap();
        let outcome2 = reconnect(&mut s, 1, &t1, "alice2").unwrap();
        let t2 = outcome2.private_token.unwrap();
        assert_ne!(t1, t2);
        assert_eq!(s.player(1).unwrap().claimed_by.as_deref(), Some("alice2"));
    }

    #[test]
    fn non_owner_reset_uses_the_literal_scenario_message() {
        let mut s = two_player_session();
        let err = reset(&mut s, "not-the-owner").unwrap_err();
        assert_eq!(err.wire_message(), "Only the game owner can reset");
    }

    #[test]
    fn toggle_target_twice_is_a_no_op_in_selecting() {
        let mut s = two_player_session();
        claim(&mut s, "owner", 1).unwrap();
        s.status = Status::Running;
        s.active_player = Some(1);
        toggle_target(&mut s, "owner", 2).unwrap();
        assert_eq!(s.targeting_state, TargetingState::Selecting);
        toggle_target(&mut s, "owner", 2).unwrap();
        assert_eq!(s.targeting_state, TargetingState::None);
        assert!(s.targeted_players.is_empty());
    }

    #[test]
    fn confirm_then_pass_all_restores_original_active_player() {
        let settings = Settings { player_count: 3, ..Settings::default() };
        let mut s = Session::new("ABCDEF".to_string(), "Test".to_string(), Mode::Casual, settings);
        s.owner_id = Some("owner".to_string());
        claim(&mut s, "p1", 1).unwrap();
        claim(&mut s, "p2", 2).unwrap();
        claim(&mut s, "p3", 3).unwrap();
        s.status = Status::Running;
        s.active_player = Some(1);

        toggle_target(&mut s, "p1", 2).unwrap();
        toggle_target(&mut s, "p1", 3).unwrap();
        let outcome = confirm_targets(&mut s, "p1").unwrap();
        match &outcome.events[0] {
            GameEvent::TargetingStarted { awaiting_priority, active_player } => {
                assert_eq!(awaiting_priority, &vec![2, 3]);
                assert_eq!(*active_player, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }

        pass_target_priority(&mut s, "p2", 2).unwrap();
        assert_eq!(s.active_player, Some(3));
        let outcome = pass_target_priority(&mut s, "p3", 3).unwrap();
        assert_eq!(s.active_player, Some(1));
        assert_eq!(s.targeting_state, TargetingState::None);
        match &outcome.events[0] {
            GameEvent::TargetingComplete { active_player } => assert_eq!(*active_player, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn find_next_active_all_eliminated_rejects_switch() {
        let mut s = two_player_session();
        s.status = Status::Running;
        s.active_player = Some(1);
        s.player_mut(2).unwrap().is_eliminated = true;
        let err = switch_player(&mut s, "owner", 2).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidTarget);
    }
}

#[cfg(test)]
impl crate::game::state::Player {
    fn clone_for_test(&self) -> (u8, Option<String>) {
        (self.id, self.claimed_by.clone())
    }
}
