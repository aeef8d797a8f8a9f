//! Tick Engine (§4.5).
//!
//! `advance` is the pure state transition one tick applies; the async
//! driver that calls it on a 100ms cadence per running session lives in
//! [`crate::lifecycle`], which owns the lock acquisition and persistence
//! around each call. Keeping the transition itself free of I/O makes it
//! exhaustively testable without a runtime.

use crate::game::events::GameEvent;
use crate::game::state::{Session, Status};

/// Advance `session`'s active player's clock by `elapsed_ms` of wall-clock
/// time and return the events produced. A no-op (empty event list) when the
/// session isn't `running` or has no active player.
pub fn advance(session: &mut Session, elapsed_ms: i64) -> Vec<GameEvent> {
    if session.status != Status::Running {
        return Vec::new();
    }
    let Some(active_id) = session.active_player else {
        return Vec::new();
    };

    let mut events = Vec::new();
    let (pre, post) = {
        let player = session.player_mut(active_id).expect("activePlayer names a real slot");
        let pre = player.time_remaining_ms;
        let post = (pre - elapsed_ms).max(0);
        player.time_remaining_ms = post;
        (pre, post)
    };

    for &threshold in &session.settings.warning_thresholds_ms {
        if pre > threshold && post <= threshold {
            events.push(GameEvent::Warning { player_id: active_id, threshold_ms: threshold });
        }
    }

    events.push(GameEvent::Tick {
        times: session.players.iter().map(|p| (p.id, p.time_remaining_ms)).collect(),
    });

    if post <= 0 {
        let player = session.player_mut(active_id).expect("activePlayer names a real slot");
        if !player.timeout_pending {
            player.timeout_pending = true;
            events.push(GameEvent::Timeout { player_id: active_id });
        }
    }

    session.touch();
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Mode, Settings};

    fn running_session() -> Session {
        let settings = Settings {
            player_count: 2,
            initial_time_ms: 1_000,
            warning_thresholds_ms: vec![500, 100],
            ..Settings::default()
        };
        let mut s = Session::new("ABCDEF".to_string(), "Test".to_string(), Mode::Casual, settings);
        s.status = Status::Running;
        s.active_player = Some(1);
        s
    }

    #[test]
    fn paused_session_does_not_tick() {
        let mut s = running_session();
        s.status = Status::Paused;
        let events = advance(&mut s, 100);
        assert!(events.is_empty());
        assert_eq!(s.player(1).unwrap().time_remaining_ms, 1_000);
    }

    #[test]
    fn only_the_active_player_loses_time() {
        let mut s = running_session();
        advance(&mut s, 200);
        assert_eq!(s.player(1).unwrap().time_remaining_ms, 800);
        assert_eq!(s.player(2).unwrap().time_remaining_ms, 1_000);
    }

    #[test]
    fn crossing_a_threshold_emits_exactly_one_warning() {
        let mut s = running_session();
        let events = advance(&mut s, 550);
        let warnings: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, GameEvent::Warning { .. }))
            .collect();
        assert_eq!(warnings.len(), 1);
        match warnings[0] {
            GameEvent::Warning { threshold_ms, .. } => assert_eq!(*threshold_ms, 500),
            _ => unreachable!(),
        }
    }

    #[test]
    fn overshooting_two_thresholds_in_one_tick_emits_both() {
        let mut s = running_session();
        let events = advance(&mut s, 950);
        let warnings: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, GameEvent::Warning { .. }))
            .collect();
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn reaching_zero_emits_timeout_exactly_once() {
        let mut s = running_session();
        let first = advance(&mut s, 1_200);
        assert!(first.iter().any(|e| matches!(e, GameEvent::Timeout { .. })));
        assert_eq!(s.player(1).unwrap().time_remaining_ms, 0);

        let second = advance(&mut s, 50);
        assert!(!second.iter().any(|e| matches!(e, GameEvent::Timeout { .. })));
        assert_eq!(s.player(1).unwrap().time_remaining_ms, 0);
    }

    #[test]
    fn every_tick_emits_a_tick_event_with_every_player() {
        let mut s = running_session();
        let events = advance(&mut s, 100);
        match events.iter().find(|e| matches!(e, GameEvent::Tick { .. })).unwrap() {
            GameEvent::Tick { times } => assert_eq!(times.len(), 2),
            _ => unreachable!(),
        }
    }
}
