//! Inbound message routing (§4.7): the uniform pipeline every mutating
//! message goes through — `ensureLoaded` → session lock → mutate via
//! [`crate::game::ops`] → persist → broadcast — plus the feedback
//! messages, which bypass the session lock entirely since they don't
//! touch any session (§9 "Feedback storage").

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::CoreError;
use crate::game::events::GameEvent;
use crate::game::ops;
use crate::game::state::{now_ms, Session};
use crate::lifecycle::AppState;
use crate::network::protocol::{ClientMessage, FeedbackEntry, ServerMessage};

/// In-memory feedback registry. Entries are process-local and do not
/// survive a restart; feedback is product telemetry, not session state
/// the Store's durability guarantees apply to (§9 Open Question resolved
/// in DESIGN.md).
#[derive(Default)]
pub struct FeedbackStore {
    entries: DashMap<String, FeedbackEntry>,
}

impl FeedbackStore {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new entry and return it.
    pub fn submit(&self, controller_id: &str, text: String) -> FeedbackEntry {
        let entry = FeedbackEntry {
            id: uuid::Uuid::new_v4().to_string(),
            controller_id: controller_id.to_string(),
            text,
            created_at: now_ms(),
        };
        self.entries.insert(entry.id.clone(), entry.clone());
        entry
    }

    /// All entries, most recent first.
    pub fn list(&self) -> Vec<FeedbackEntry> {
        let mut all: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Edit an entry's text; only its original submitter may do so.
    pub fn update(&self, id: &str, controller_id: &str, text: String) -> Result<(), CoreError> {
        let mut entry = self.entries.get_mut(id).ok_or(CoreError::InvalidTarget)?;
        if entry.controller_id != controller_id {
            return Err(CoreError::NotAuthorized { verb: "edit that feedback entry" });
        }
        entry.text = text;
        Ok(())
    }

    /// Remove an entry; only its original submitter may do so.
    pub fn delete(&self, id: &str, controller_id: &str) -> Result<(), CoreError> {
        match self.entries.get(id) {
            Some(entry) if entry.controller_id == controller_id => {
                drop(entry);
                self.entries.remove(id);
                Ok(())
            }
            Some(_) => Err(CoreError::NotAuthorized { verb: "delete that feedback entry" }),
            None => Err(CoreError::InvalidTarget),
        }
    }
}

fn try_handle_feedback(
    state: &Arc<AppState>,
    controller_id: &str,
    msg: &ClientMessage,
) -> Option<Result<Vec<ServerMessage>, CoreError>> {
    match msg {
        ClientMessage::Feedback { text } => {
            let entry = state.feedback.submit(controller_id, text.clone());
            Some(Ok(vec![ServerMessage::FeedbackSubmitted { id: entry.id }]))
        }
        ClientMessage::LoadFeedbacks => {
            Some(Ok(vec![ServerMessage::FeedbackList { entries: state.feedback.list() }]))
        }
        ClientMessage::UpdateFeedback { id, text } => Some(
            state
                .feedback
                .update(id, controller_id, text.clone())
                .map(|_| vec![ServerMessage::FeedbackUpdated { id: id.clone() }]),
        ),
        ClientMessage::DeleteFeedback { id } => Some(
            state
                .feedback
                .delete(id, controller_id)
                .map(|_| vec![ServerMessage::FeedbackDeleted { id: id.clone() }]),
        ),
        _ => None,
    }
}

/// Map an internal [`GameEvent`] to its outbound wire counterpart.
/// Events with no dedicated wire message (interrupt queue changes, and
/// timeout resolution) are folded into the `State` snapshot that always
/// follows, since [`Session`] already carries `interruptingPlayers` and
/// every per-player field those events touch.
pub(crate) fn event_to_message(event: &GameEvent) -> Option<ServerMessage> {
    match event.clone() {
        GameEvent::Tick { times } => Some(ServerMessage::Tick { times }),
        GameEvent::Warning { player_id, threshold_ms } => Some(ServerMessage::Warning { player_id, threshold_ms }),
        GameEvent::Timeout { player_id } => Some(ServerMessage::Timeout { player_id }),
        GameEvent::Claimed { player_id, controller_id } => {
            Some(ServerMessage::Claimed { player_id, controller_id, token: None })
        }
        GameEvent::Reconnected { player_id, controller_id } => {
            Some(ServerMessage::Reconnected { player_id, controller_id, token: None })
        }
        GameEvent::TargetingStarted { awaiting_priority, active_player } => {
            Some(ServerMessage::TargetingStarted { awaiting_priority, active_player })
        }
        GameEvent::TargetingUpdated { targeted_players } => {
            Some(ServerMessage::TargetingUpdated { targeted_players })
        }
        GameEvent::PriorityPassed { awaiting_priority, active_player } => {
            Some(ServerMessage::PriorityPassed { awaiting_priority, active_player })
        }
        GameEvent::TargetingComplete { active_player } => Some(ServerMessage::TargetingComplete { active_player }),
        GameEvent::TargetingCanceled => Some(ServerMessage::TargetingCanceled),
        GameEvent::GameEnded => Some(ServerMessage::GameEnded),
        GameEvent::GameRenamed { name } => Some(ServerMessage::GameRenamed { name }),
        GameEvent::RandomPlayerSelected { player_id } => Some(ServerMessage::RandomPlayerSelected { player_id }),
        GameEvent::DiceRolled { sides, result } => Some(ServerMessage::DiceRolled { sides, result }),
        GameEvent::PlayOrderRolled { order } => Some(ServerMessage::PlayOrderRolled { order }),
        GameEvent::Kicked { player_id } => Some(ServerMessage::Kicked { player_id }),
        GameEvent::InterruptRaised { .. }
        | GameEvent::InterruptPriorityPassed { .. }
        | GameEvent::TimeoutResolved { .. } => None,
    }
}

fn apply(session: &mut Session, controller_id: &str, msg: ClientMessage) -> Result<ops::OpOutcome, CoreError> {
    use ClientMessage as M;
    match msg {
        M::Create { .. } => unreachable!("Create is handled before a session is loaded"),
        M::Join { .. } => Ok(ops::join(session, controller_id)),
        M::Start => ops::start(session, controller_id),
        M::Pause => ops::toggle_pause(session, controller_id),
        M::Reset => ops::reset(session, controller_id),
        M::Switch { next } => ops::switch_player(session, controller_id, next),
        M::Claim { player_id } => ops::claim(session, controller_id, player_id),
        M::Unclaim => Ok(ops::unclaim(session, controller_id)),
        M::Reconnect { player_id, token } => ops::reconnect(session, player_id, &token, controller_id),
        M::UpdatePlayer { player_id, name, color, life, drunk_counter, generic_counter } => {
            let update = ops::PlayerUpdate {
                name: name.map(|n| crate::core::sanitize::sanitize_name(&n)),
                color,
                life: life.map(|l| l.clamp(-999, 9999)),
                drunk_counter: drunk_counter.map(|d| d.min(999)),
                generic_counter: generic_counter.map(|g| g.min(999)),
            };
            ops::update_player(session, controller_id, player_id, update)
        }
        M::AddPenalty { player_id, amount } => ops::add_penalty(session, controller_id, player_id, amount),
        M::Eliminate { player_id } => ops::eliminate(session, controller_id, player_id),
        M::UpdateSettings { settings } => {
            let settings = settings.into_settings()?;
            ops::update_settings(session, controller_id, settings)
        }
        M::EndGame => ops::end_game(session, controller_id),
        M::RenameGame { name } => {
            ops::rename_game(session, controller_id, crate::core::sanitize::sanitize_name(&name))
        }
        M::Interrupt { player_id } => ops::interrupt(session, controller_id, player_id),
        M::PassPriority => ops::pass_priority(session, controller_id),
        M::RandomStartPlayer => ops::random_start_player(session, controller_id),
        M::RollDice { sides } => ops::roll_dice(session, controller_id, sides),
        M::RollPlayOrder => ops::roll_play_order(session, controller_id),
        M::AdminRevive { player_id } => ops::admin_revive(session, controller_id, player_id),
        M::AdminKick { player_id } => ops::admin_kick(session, controller_id, player_id),
        M::AdminAddTime { player_id, minutes } => ops::admin_add_time(session, controller_id, player_id, minutes),
        M::TimeoutChoice { player_id, resolution } => {
            ops::resolve_timeout(session, controller_id, player_id, resolution)
        }
        M::ToggleTarget { player_id } => ops::toggle_target(session, controller_id, player_id),
        M::ConfirmTargets => ops::confirm_targets(session, controller_id),
        M::PassTargetPriority { pid } => ops::pass_target_priority(session, controller_id, pid),
        M::CancelTargeting => ops::cancel_targeting(session, controller_id),
        M::Feedback { .. } | M::LoadFeedbacks | M::UpdateFeedback { .. } | M::DeleteFeedback { .. } => {
            unreachable!("feedback messages are handled before session dispatch")
        }
    }
}

/// Route one parsed inbound message. Feedback messages are answered
/// directly; everything else runs through `ensureLoaded` → session lock →
/// mutate → persist → broadcast, per §4.7. The return value is the set of
/// messages to send back to the calling connection alone (errors surface
/// as `Err` for the caller to wrap in `ServerMessage::Error`).
pub async fn dispatch(
    state: &Arc<AppState>,
    session_id: &str,
    controller_id: &str,
    msg: ClientMessage,
) -> Result<Vec<ServerMessage>, CoreError> {
    if let Some(result) = try_handle_feedback(state, controller_id, &msg) {
        return result;
    }

    state.ensure_invalidation_relay(session_id).await;
    state.bus.ensure_remote_relay(session_id).await;

    let locks = state.locks.clone();
    let state_for_body = state.clone();
    let session_id_owned = session_id.to_string();
    let controller_id_owned = controller_id.to_string();

    locks
        .with_session_lock(session_id, move || {
            let state = state_for_body.clone();
            let session_id = session_id_owned.clone();
            let controller_id = controller_id_owned.clone();
            async move { run_mutation(&state, &session_id, &controller_id, msg).await }
        })
        .await?
}

async fn run_mutation(
    state: &Arc<AppState>,
    session_id: &str,
    controller_id: &str,
    msg: ClientMessage,
) -> Result<Vec<ServerMessage>, CoreError> {
    let mut session = state.load_fresh_under_lock(session_id).await?.ok_or(CoreError::GameNotFound)?;
    if session.is_closed {
        return Err(CoreError::GameNotFound);
    }

    let outcome = apply(&mut session, controller_id, msg)?;
    state.persist(session_id, &session).await?;

    let mut to_broadcast: Vec<ServerMessage> = outcome.events.iter().filter_map(event_to_message).collect();
    to_broadcast.push(ServerMessage::State { state: session.clone() });
    for message in &to_broadcast {
        if let Ok(json) = message.to_json() {
            state.bus.broadcast(session_id, json.into_bytes()).await;
        }
    }

    let mut private = Vec::new();
    if let Some(token) = outcome.private_token {
        for event in &outcome.events {
            match event {
                GameEvent::Claimed { player_id, controller_id } => {
                    private.push(ServerMessage::Claimed {
                        player_id: *player_id,
                        controller_id: controller_id.clone(),
                        token: Some(token.clone()),
                    });
                    break;
                }
                GameEvent::Reconnected { player_id, controller_id } => {
                    private.push(ServerMessage::Reconnected {
                        player_id: *player_id,
                        controller_id: controller_id.clone(),
                        token: Some(token.clone()),
                    });
                    break;
                }
                _ => {}
            }
        }
    }
    Ok(private)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Mode, Settings};
    use crate::store::memory::MemoryStore;

    fn test_config() -> crate::config::Config {
        crate::config::Config {
            redis_url: None,
            redis_primary: false,
            allowed_origins: vec![],
            instance_id: "test-instance".to_string(),
            workers: 1,
            storage_type: crate::config::StorageType::Memory,
            log_level: "info".to_string(),
            bind_addr: String::new(),
            http_addr: String::new(),
        }
    }

    async fn fresh_state_with_session() -> (Arc<AppState>, String) {
        let state = AppState::new(Arc::new(MemoryStore::new()), test_config());
        let session = state
            .create_session("Test".to_string(), Mode::Casual, Settings { player_count: 2, ..Settings::default() })
            .await
            .unwrap();
        (state, session.id)
    }

    #[tokio::test]
    async fn claim_returns_a_private_token_reply() {
        let (state, id) = fresh_state_with_session().await;
        let replies = dispatch(&state, &id, "alice", ClientMessage::Claim { player_id: 1 }).await.unwrap();
        assert!(matches!(
            replies.as_slice(),
            [ServerMessage::Claimed { player_id: 1, token: Some(_), .. }]
        ));
    }

    #[tokio::test]
    async fn join_has_no_private_reply() {
        let (state, id) = fresh_state_with_session().await;
        let replies = dispatch(&state, &id, "alice", ClientMessage::Join { game_id: id.clone() }).await.unwrap();
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn unknown_session_id_is_game_not_found() {
        let state = AppState::new(Arc::new(MemoryStore::new()), test_config());
        let err = dispatch(&state, "ZZZZZZ", "alice", ClientMessage::Start).await.unwrap_err();
        assert_eq!(err.wire_message(), "Game not found");
    }

    #[tokio::test]
    async fn feedback_round_trips_without_touching_any_session() {
        let (state, id) = fresh_state_with_session().await;
        dispatch(&state, &id, "alice", ClientMessage::Feedback { text: "nice".to_string() }).await.unwrap();
        let replies = dispatch(&state, &id, "alice", ClientMessage::LoadFeedbacks).await.unwrap();
        match &replies[0] {
            ServerMessage::FeedbackList { entries } => assert_eq!(entries.len(), 1),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
