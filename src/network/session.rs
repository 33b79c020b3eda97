//! Session Registry
//!
//! Matchmaking and routing. Allocates player ids, pairs each joining player
//! with the oldest open session of the requested size (creating one when none
//! is open), maps players to their session and destroys sessions once their
//! last player has left.
//!
//! Locking: the registry tables sit behind one mutex held only for
//! allocation, lookup and removal. Each session has its own mutex. Lock order
//! is always registry, then session; the callbacks passed to `join`,
//! `route_move` and `leave` run while the session lock is held, so whatever
//! they publish is ordered with the transition that produced it.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::game::board::BoardSize;
use crate::game::state::{
    Departure, GameSession, MoveOutcome, PlayerId, Seating, SessionId, MAX_PLAYERS,
};

/// Shared handle to one session.
pub type SessionHandle = Arc<Mutex<GameSession>>;

/// Registry faults. These indicate a broken internal invariant, never bad
/// client input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Tables and sessions disagree.
    #[error("Session registry corrupted: {0}")]
    Corrupted(String),
}

/// A player placed into a session by [`SessionRegistry::join`].
#[derive(Debug, Clone)]
pub struct Seated {
    /// Newly allocated player id.
    pub player: PlayerId,
    /// Session the player was seated in.
    pub session: SessionId,
    /// Whether the session now has both players.
    pub seating: Seating,
    /// Handle to the session.
    pub handle: SessionHandle,
}

struct SessionEntry {
    handle: SessionHandle,
    size: BoardSize,
    /// Mirror of the session's seat count, kept so matchmaking never has to
    /// lock every session to find an open one.
    seats: usize,
}

#[derive(Default)]
struct Tables {
    next_player: u32,
    next_session: u64,
    sessions: BTreeMap<SessionId, SessionEntry>,
    player_sessions: BTreeMap<PlayerId, SessionId>,
}

/// All live sessions and the player-to-session mapping.
pub struct SessionRegistry {
    tables: Mutex<Tables>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Allocate a player id and seat it in the first open session of `size`,
    /// creating one if needed.
    ///
    /// `on_seated` runs under the session lock before the player becomes
    /// routable.
    pub async fn join<F>(&self, size: BoardSize, on_seated: F) -> Result<Seated, RegistryError>
    where
        F: FnOnce(&GameSession, PlayerId),
    {
        let mut tables = self.tables.lock().await;

        tables.next_player += 1;
        let player = PlayerId::new(tables.next_player);

        let open = tables
            .sessions
            .iter()
            .find(|(_, entry)| entry.size == size && entry.seats < MAX_PLAYERS)
            .map(|(id, _)| *id);

        let session_id = match open {
            Some(id) => id,
            None => {
                tables.next_session += 1;
                let id = SessionId(tables.next_session);
                tables.sessions.insert(id, SessionEntry {
                    handle: Arc::new(Mutex::new(GameSession::new(id, size))),
                    size,
                    seats: 0,
                });
                info!(session_id = %id, size = %size, "Session created");
                id
            }
        };

        let Some(entry) = tables.sessions.get_mut(&session_id) else {
            error!(session_id = %session_id, "Open session vanished from registry");
            return Err(RegistryError::Corrupted(format!("session {session_id} missing")));
        };
        let handle = entry.handle.clone();
        let mut session = handle.lock().await;

        let seating = match session.add_player(player) {
            Ok(seating) => seating,
            Err(e) => {
                error!(session_id = %session_id, player_id = %player, error = %e, "Seat refused");
                return Err(RegistryError::Corrupted(format!(
                    "session {session_id} refused player {player}: {e}"
                )));
            }
        };
        entry.seats = session.player_count();

        on_seated(&session, player);
        drop(session);

        tables.player_sessions.insert(player, session_id);

        Ok(Seated {
            player,
            session: session_id,
            seating,
            handle,
        })
    }

    /// Apply a move for `player` in their session.
    ///
    /// Returns false when the player has no session or the move is refused.
    /// `on_applied` runs under the session lock after an accepted move.
    pub async fn route_move<F>(
        &self,
        player: PlayerId,
        row: usize,
        col: usize,
        value: u8,
        on_applied: F,
    ) -> Result<bool, RegistryError>
    where
        F: FnOnce(&GameSession, MoveOutcome),
    {
        let Some(handle) = self.session_of(player).await? else {
            debug!(player_id = %player, "Move from player without a session");
            return Ok(false);
        };

        let mut session = handle.lock().await;
        match session.make_move(player, row, col, value) {
            Ok(outcome) => {
                on_applied(&session, outcome);
                Ok(true)
            }
            Err(rejection) => {
                debug!(
                    session_id = %session.id(),
                    player_id = %player,
                    row, col, value,
                    reason = %rejection,
                    "Move rejected"
                );
                Ok(false)
            }
        }
    }

    /// Remove `player` from their session, destroying it once empty.
    ///
    /// `on_departed` runs under the session lock. Returns false if the player
    /// was not seated anywhere.
    pub async fn leave<F>(&self, player: PlayerId, on_departed: F) -> Result<bool, RegistryError>
    where
        F: FnOnce(&GameSession, Departure),
    {
        let mut tables = self.tables.lock().await;

        let Some(session_id) = tables.player_sessions.remove(&player) else {
            return Ok(false);
        };
        let Some(entry) = tables.sessions.get_mut(&session_id) else {
            error!(
                session_id = %session_id,
                player_id = %player,
                "Player mapped to missing session"
            );
            return Err(RegistryError::Corrupted(format!(
                "player {player} mapped to missing session {session_id}"
            )));
        };

        let handle = entry.handle.clone();
        let mut session = handle.lock().await;
        let Some(departure) = session.remove_player(player) else {
            error!(session_id = %session_id, player_id = %player, "Mapped player not seated");
            return Err(RegistryError::Corrupted(format!(
                "player {player} not seated in session {session_id}"
            )));
        };
        entry.seats = session.player_count();

        on_departed(&session, departure);
        let empty = session.is_empty();
        drop(session);

        if empty {
            tables.sessions.remove(&session_id);
            info!(session_id = %session_id, "Session destroyed");
        }
        Ok(true)
    }

    /// Session `player` is seated in.
    pub async fn session_of(
        &self,
        player: PlayerId,
    ) -> Result<Option<SessionHandle>, RegistryError> {
        let tables = self.tables.lock().await;
        let Some(session_id) = tables.player_sessions.get(&player) else {
            return Ok(None);
        };
        match tables.sessions.get(session_id) {
            Some(entry) => Ok(Some(entry.handle.clone())),
            None => {
                error!(
                    session_id = %session_id,
                    player_id = %player,
                    "Player mapped to missing session"
                );
                Err(RegistryError::Corrupted(format!(
                    "player {player} mapped to missing session {session_id}"
                )))
            }
        }
    }

    /// All sessions, oldest first.
    pub async fn sessions(&self) -> Vec<SessionHandle> {
        let tables = self.tables.lock().await;
        tables.sessions.values().map(|entry| entry.handle.clone()).collect()
    }

    /// Live session count.
    pub async fn session_count(&self) -> usize {
        self.tables.lock().await.sessions.len()
    }

    /// Sessions with a free seat.
    pub async fn open_session_count(&self) -> usize {
        let tables = self.tables.lock().await;
        tables.sessions.values().filter(|entry| entry.seats < MAX_PLAYERS).count()
    }

    /// Seated player count.
    pub async fn player_count(&self) -> usize {
        self.tables.lock().await.player_sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::Board;
    use crate::game::state::SessionPhase;
    use std::collections::BTreeSet;

    fn board_with_holes(holes: &[(usize, usize)]) -> Board {
        let mut grid = vec![
            vec![1, 2, 3, 4],
            vec![3, 4, 1, 2],
            vec![2, 1, 4, 3],
            vec![4, 3, 2, 1],
        ];
        for &(r, c) in holes {
            grid[r][c] = 0;
        }
        Board::from_grid(&grid).unwrap()
    }

    async fn join(registry: &SessionRegistry, size: BoardSize) -> Seated {
        registry.join(size, |_, _| {}).await.unwrap()
    }

    #[tokio::test]
    async fn test_join_pairs_players() {
        let registry = SessionRegistry::new();

        let first = join(&registry, BoardSize::Four).await;
        let second = join(&registry, BoardSize::Four).await;
        let third = join(&registry, BoardSize::Four).await;

        assert_eq!(first.player, PlayerId::new(1));
        assert_eq!(second.player, PlayerId::new(2));
        assert_eq!(first.seating, Seating::Waiting);
        assert_eq!(second.seating, Seating::Ready);
        assert_eq!(first.session, second.session);
        assert_ne!(third.session, first.session);

        assert_eq!(registry.session_count().await, 2);
        assert_eq!(registry.open_session_count().await, 1);
        assert_eq!(registry.player_count().await, 3);
    }

    #[tokio::test]
    async fn test_sizes_are_matched_separately() {
        let registry = SessionRegistry::new();

        let small = join(&registry, BoardSize::Four).await;
        let large = join(&registry, BoardSize::Nine).await;
        assert_ne!(small.session, large.session);
        assert_eq!(large.handle.lock().await.size(), BoardSize::Nine);
    }

    #[tokio::test]
    async fn test_on_seated_sees_new_player() {
        let registry = SessionRegistry::new();
        let mut seen = None;

        let seated = registry
            .join(BoardSize::Four, |session, player| {
                seen = Some((session.id(), player, session.player_count()));
            })
            .await
            .unwrap();

        assert_eq!(seen, Some((seated.session, seated.player, 1)));
    }

    #[tokio::test]
    async fn test_route_move() {
        let registry = SessionRegistry::new();
        let p1 = join(&registry, BoardSize::Four).await;
        let p2 = join(&registry, BoardSize::Four).await;
        p1.handle.lock().await.begin(board_with_holes(&[(0, 0), (3, 3)])).unwrap();

        // Out of turn
        let mut calls = 0;
        let accepted = registry.route_move(p2.player, 0, 0, 1, |_, _| calls += 1).await.unwrap();
        assert!(!accepted);
        assert_eq!(calls, 0);

        let mut outcome = None;
        let accepted = registry
            .route_move(p1.player, 0, 0, 1, |_, o| outcome = Some(o))
            .await
            .unwrap();
        assert!(accepted);
        assert_eq!(outcome, Some(MoveOutcome::TurnPassed { next: p2.player }));

        // Unknown player
        let accepted = registry.route_move(PlayerId::new(99), 3, 3, 1, |_, _| {}).await.unwrap();
        assert!(!accepted);
    }

    #[tokio::test]
    async fn test_leave_notifies_and_destroys() {
        let registry = SessionRegistry::new();
        let p1 = join(&registry, BoardSize::Four).await;
        let p2 = join(&registry, BoardSize::Four).await;
        p1.handle.lock().await.begin(board_with_holes(&[(0, 0)])).unwrap();

        let mut departure = None;
        assert!(registry.leave(p1.player, |_, d| departure = Some(d)).await.unwrap());
        let departure = departure.unwrap();
        assert_eq!(departure.remaining, Some(p2.player));
        assert_eq!(departure.phase, SessionPhase::Abandoned);
        assert_eq!(registry.session_count().await, 1);

        // Idempotent
        assert!(!registry.leave(p1.player, |_, _| {}).await.unwrap());

        assert!(registry.leave(p2.player, |_, _| {}).await.unwrap());
        assert_eq!(registry.session_count().await, 0);
        assert!(registry.session_of(p2.player).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejoin_after_destroy_uses_new_session() {
        let registry = SessionRegistry::new();
        let p1 = join(&registry, BoardSize::Four).await;
        registry.leave(p1.player, |_, _| {}).await.unwrap();

        let p2 = join(&registry, BoardSize::Four).await;
        assert_ne!(p2.session, p1.session);
        assert_ne!(p2.player, p1.player);
    }

    #[tokio::test]
    async fn test_abandoned_session_is_open_again() {
        let registry = SessionRegistry::new();
        let p1 = join(&registry, BoardSize::Four).await;
        let _p2 = join(&registry, BoardSize::Four).await;
        registry.leave(p1.player, |_, _| {}).await.unwrap();

        assert_eq!(registry.open_session_count().await, 1);
        let p3 = join(&registry, BoardSize::Four).await;
        assert_eq!(p3.session, p1.session);
        assert_eq!(p3.seating, Seating::Ready);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_never_overfill() {
        let registry = Arc::new(SessionRegistry::new());

        let tasks: Vec<_> = (0..40)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { join(&registry, BoardSize::Four).await })
            })
            .collect();

        let mut players = BTreeSet::new();
        for task in tasks {
            players.insert(task.await.unwrap().player);
        }
        assert_eq!(players.len(), 40);

        assert_eq!(registry.session_count().await, 20);
        for handle in registry.sessions().await {
            assert_eq!(handle.lock().await.player_count(), 2);
        }
    }

    #[tokio::test]
    async fn test_sessions_in_creation_order() {
        let registry = SessionRegistry::new();
        let a = join(&registry, BoardSize::Four).await;
        let b = join(&registry, BoardSize::Nine).await;
        let c = join(&registry, BoardSize::Sixteen).await;

        let mut ids = Vec::new();
        for handle in registry.sessions().await {
            ids.push(handle.lock().await.id());
        }
        assert_eq!(ids, vec![a.session, b.session, c.session]);
    }
}
