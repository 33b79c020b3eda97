//! Sudoku Service
//!
//! The transport-agnostic entry point. Board generation calls are stateless
//! passthroughs to the generator. Game calls go through the session registry
//! and turn each accepted transition into updates for the players involved:
//!
//! | Transition            | Update(s)                          | Recipients |
//! |-----------------------|------------------------------------|------------|
//! | second player seated  | `GAME_START`                       | both       |
//! | move accepted         | `MOVE_MADE`                        | both       |
//! | last cell filled      | `MOVE_MADE`, then `GAME_OVER`      | both       |
//! | player left           | `PLAYER_DISCONNECTED`              | remaining  |
//! | generation failed     | `ERROR`                            | both       |
//!
//! Bad client input never produces an error here: moves report `false`,
//! unknown players read as "not in a game" and polls return `NO_UPDATE`.
//! `ServiceError` is reserved for caller mistakes on the board endpoints and
//! for internal faults.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::core::rng::{entropy_seed, DeterministicRng};
use crate::game::board::{Board, BoardSize, Grid};
use crate::game::events::Update;
use crate::game::generator::{BoardGenerator, GenerationError, GeneratorConfig};
use crate::game::state::{GameStatus, MoveOutcome, PlayerId, Seating};
use crate::network::session::{RegistryError, Seated, SessionRegistry};
use crate::network::updates::{QueuePolicy, UpdateDistributor};

/// Default wait for [`SudokuService::poll_update`] callers that have no
/// preference.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Board size used by [`SudokuService::join`].
    pub default_size: BoardSize,
    /// Poll wait transports use when the client does not choose one.
    pub poll_timeout: Duration,
    /// Generator tuning.
    pub generator: GeneratorConfig,
    /// Per-player queue policy.
    pub queue_policy: QueuePolicy,
    /// Fixed generation seed. `None` seeds from the clock.
    pub seed: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_size: BoardSize::Nine,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            generator: GeneratorConfig::default(),
            queue_policy: QueuePolicy::Unbounded,
            seed: None,
        }
    }
}

impl ServiceConfig {
    /// Create config from environment variables.
    ///
    /// Unset variables keep their defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(size) = parse_var::<i64, _>(&lookup, "SUDOKU_BOARD_SIZE")? {
            config.default_size = BoardSize::try_from(size).map_err(|e| ConfigError::Invalid {
                key: "SUDOKU_BOARD_SIZE",
                value: size.to_string(),
                reason: e.to_string(),
            })?;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SUDOKU_POLL_TIMEOUT_MS")? {
            config.poll_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var(&lookup, "SUDOKU_GEN_ATTEMPTS")? {
            config.generator.max_attempts = attempts;
        }
        if let Some(budget) = parse_var(&lookup, "SUDOKU_GEN_STEP_BUDGET")? {
            config.generator.step_budget = budget;
        }
        if let Some(cap) = parse_var::<usize, _>(&lookup, "SUDOKU_QUEUE_CAPACITY")? {
            config.queue_policy = match cap {
                0 => QueuePolicy::Unbounded,
                cap => QueuePolicy::DropOldest(cap),
            };
        }
        config.seed = parse_var(&lookup, "SUDOKU_SEED")?;

        Ok(config)
    }
}

pub(crate) fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Variable present but unusable.
    #[error("Invalid {key}={value:?}: {reason}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
        /// Parse failure.
        reason: String,
    },
}

// =============================================================================
// ERRORS
// =============================================================================

/// Service errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Requested board size is not 4, 9 or 16.
    #[error("Invalid board size {0}")]
    InvalidBoardSize(i64),

    /// No session is in progress.
    #[error("No game in progress")]
    NoGameInProgress,

    /// Board generation failed.
    #[error("Board generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// Registry invariant broken.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Other internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Whether the caller caused this error, as opposed to the server.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, ServiceError::InvalidBoardSize(_) | ServiceError::NoGameInProgress)
    }
}

// =============================================================================
// SERVICE
// =============================================================================

/// Sudoku duel service.
pub struct SudokuService {
    config: ServiceConfig,
    generator: BoardGenerator,
    registry: SessionRegistry,
    distributor: UpdateDistributor,
    base_seed: u64,
    /// Per-board nonce mixed into the base seed.
    boards: AtomicU64,
}

impl SudokuService {
    /// Create a service.
    pub fn new(config: ServiceConfig) -> Self {
        let base_seed = config.seed.unwrap_or_else(entropy_seed);
        Self {
            generator: BoardGenerator::new(config.generator),
            registry: SessionRegistry::new(),
            distributor: UpdateDistributor::new(config.queue_policy),
            base_seed,
            boards: AtomicU64::new(0),
            config,
        }
    }

    /// Service configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Generate a puzzle without creating a session.
    #[instrument(skip(self))]
    pub async fn generate_board(&self, size: i64) -> Result<Grid, ServiceError> {
        let size = BoardSize::try_from(size).map_err(|_| ServiceError::InvalidBoardSize(size))?;
        Ok(self.generate(size).await?.to_grid())
    }

    async fn generate(&self, size: BoardSize) -> Result<Board, ServiceError> {
        let nonce = self.boards.fetch_add(1, Ordering::Relaxed);
        let mut rng = DeterministicRng::for_board(self.base_seed, nonce);
        let generator = self.generator.clone();

        let task = move || generator.generate_with_retries(size, &mut rng);
        let board = tokio::task::spawn_blocking(task)
            .await
            .map_err(|e| ServiceError::Internal(format!("generation task failed: {e}")))??;
        Ok(board)
    }

    /// Join a game of the default size.
    pub async fn join(&self) -> Result<PlayerId, ServiceError> {
        self.join_with_size(self.config.default_size).await
    }

    /// Join a game of `size`.
    ///
    /// Returns once the player is seated. If the seat completes a pair, the
    /// board is generated before returning and `GAME_START` is queued for
    /// both players.
    pub async fn join_with_size(&self, size: BoardSize) -> Result<PlayerId, ServiceError> {
        let distributor = &self.distributor;
        let seated = self
            .registry
            .join(size, |session, player| distributor.attach(player, session.id()))
            .await?;

        info!(
            player_id = %seated.player,
            session_id = %seated.session,
            size = %size,
            "Player joined"
        );

        if seated.seating == Seating::Ready {
            self.start_game(&seated, size).await;
        }
        Ok(seated.player)
    }

    async fn start_game(&self, seated: &Seated, size: BoardSize) {
        let first = self.generate(size).await;
        let board = match first {
            Ok(board) => Ok(board),
            Err(e) => {
                warn!(session_id = %seated.session, error = %e, "Generation failed, retrying");
                self.generate(size).await
            }
        };
        let board = match board {
            Ok(board) => board,
            Err(e) => {
                error!(session_id = %seated.session, error = %e, "Could not generate board");
                self.distributor.publish(
                    seated.session,
                    &Update::error(format!("could not generate board: {e}")),
                    None,
                );
                return;
            }
        };

        let mut session = seated.handle.lock().await;
        match session.begin(board) {
            Ok(()) => {
                let update = Update::game_start(session.board());
                self.distributor.publish(session.id(), &update, session.current_player());
            }
            Err(e) => {
                // Someone left or the pair changed while the board was being built
                debug!(session_id = %seated.session, reason = %e, "Discarding board");
            }
        }
    }

    /// Whether some session is in progress.
    pub async fn is_game_ready(&self) -> bool {
        for handle in self.registry.sessions().await {
            if handle.lock().await.is_in_progress() {
                return true;
            }
        }
        false
    }

    /// Turn holder of the oldest in-progress session.
    pub async fn current_player_id(&self) -> Option<PlayerId> {
        for handle in self.registry.sessions().await {
            let session = handle.lock().await;
            if session.is_in_progress() {
                return session.current_player();
            }
        }
        None
    }

    /// Board of the oldest in-progress session.
    pub async fn current_board(&self) -> Result<Grid, ServiceError> {
        for handle in self.registry.sessions().await {
            let session = handle.lock().await;
            if session.is_in_progress() {
                return Ok(session.board().to_grid());
            }
        }
        Err(ServiceError::NoGameInProgress)
    }

    /// How `player`'s game looks to them.
    pub async fn game_status(&self, player: PlayerId) -> Result<GameStatus, ServiceError> {
        match self.registry.session_of(player).await? {
            Some(handle) => Ok(handle.lock().await.status_for(player)),
            None => Ok(GameStatus::NotInGame),
        }
    }

    /// Place `value` at (`row`, `col`) for `player`.
    ///
    /// `false` for anything that is not a legal move by the turn holder,
    /// including coordinates or values outside the board.
    pub async fn make_move(
        &self,
        player: PlayerId,
        row: i64,
        col: i64,
        value: i64,
    ) -> Result<bool, ServiceError> {
        let converted = (usize::try_from(row), usize::try_from(col), u8::try_from(value));
        let (Ok(row), Ok(col), Ok(value)) = converted else {
            debug!(player_id = %player, row, col, value, "Move outside representable range");
            return Ok(false);
        };

        let distributor = &self.distributor;
        let accepted = self
            .registry
            .route_move(player, row, col, value, |session, outcome| {
                let board = session.board();
                let turn_holder = session.current_player();
                distributor.publish(session.id(), &Update::move_made(board), turn_holder);
                if let MoveOutcome::Won { winner } = outcome {
                    distributor.publish(session.id(), &Update::game_over(board, winner), None);
                }
            })
            .await?;
        Ok(accepted)
    }

    /// Take `player` out of their game. Idempotent.
    ///
    /// The player's queue is dropped and the opponent, if any, receives one
    /// `PLAYER_DISCONNECTED`.
    pub async fn leave(&self, player: PlayerId) -> Result<(), ServiceError> {
        let distributor = &self.distributor;
        let left = self
            .registry
            .leave(player, |session, departure| {
                distributor.detach(player);
                if departure.remaining.is_some() {
                    distributor.publish(session.id(), &Update::player_disconnected(player), None);
                }
            })
            .await?;

        if left {
            info!(player_id = %player, "Player left");
        } else {
            debug!(player_id = %player, "Leave from player without a session");
        }
        Ok(())
    }

    /// Next update for `player`, or `NO_UPDATE` after `timeout`.
    pub async fn poll_update(&self, player: PlayerId, timeout: Duration) -> Update {
        self.distributor.poll(player, timeout).await
    }

    /// Whether `player` still has an update queue.
    pub fn has_update_queue(&self, player: PlayerId) -> bool {
        self.distributor.is_attached(player)
    }

    /// Sessions with a free seat.
    pub async fn available_games(&self) -> usize {
        self.registry.open_session_count().await
    }

    /// Live session count.
    pub async fn session_count(&self) -> usize {
        self.registry.session_count().await
    }

    /// Seated player count.
    pub async fn player_count(&self) -> usize {
        self.registry.player_count().await
    }
}

impl Default for SudokuService {
    fn default() -> Self {
        Self::new(ServiceConfig::default())
    }
}

// =============================================================================
// TESTS
// =============================================================================
