//! WebSocket Game Server
//!
//! Thin transport over [`SudokuService`]. Each text frame is one
//! [`ClientMessage`] and maps onto one service call. Once a connection has
//! joined, a forwarding task polls the player's update queue and pushes every
//! update down the socket. Closing the socket leaves the game.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::game::board::BoardSize;
use crate::game::state::{GameStatus, PlayerId};
use crate::network::protocol::{ClientMessage, ServerMessage, ErrorCode};
use crate::network::service::{
    parse_var, ConfigError, ServiceError, SudokuService, DEFAULT_POLL_TIMEOUT,
};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// How long each forwarding poll waits before checking the socket again.
    pub poll_interval: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            poll_interval: DEFAULT_POLL_TIMEOUT,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(addr) = parse_var(&lookup, "SUDOKU_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(max) = parse_var(&lookup, "SUDOKU_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        Ok(config)
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind or accept.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Game service shared by every connection.
    service: Arc<SudokuService>,
    /// Open connections.
    connections: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, service: Arc<SudokuService>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            service,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(version = %self.config.version, "Game server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections on `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let active = self.connections.load(Ordering::Acquire);
                            if active >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(Self::reject(stream, addr));
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Tell an over-limit client why it is being dropped.
    async fn reject(stream: TcpStream, addr: SocketAddr) {
        let mut ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!("Handshake with rejected client {} failed: {}", addr, e);
                return;
            }
        };
        let msg = ServerMessage::error(ErrorCode::ServerOverloaded, "Connection limit reached");
        if let Ok(text) = msg.to_json() {
            let _ = ws.send(Message::Text(text)).await;
        }
        let _ = ws.close(None).await;
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let service = self.service.clone();
        let connections = self.connections.clone();
        let poll_interval = self.config.poll_interval;
        let shutdown_rx = self.shutdown_tx.subscribe();

        connections.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            let served =
                Self::serve_connection(stream, addr, service, poll_interval, shutdown_rx).await;
            if let Err(e) = served {
                error!("Connection {} failed: {}", addr, e);
            }
            connections.fetch_sub(1, Ordering::AcqRel);
            info!("Client {} cleaned up", addr);
        });
    }

    async fn serve_connection(
        stream: TcpStream,
        addr: SocketAddr,
        service: Arc<SudokuService>,
        poll_interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), GameServerError> {
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

        // Spawn message sender task
        let sender_task = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let mut player: Option<PlayerId> = None;
        let mut forwarder: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let client_msg = match ClientMessage::from_json(&text) {
                                Ok(m) => m,
                                Err(e) => {
                                    debug!("Invalid message from {}: {}", addr, e);
                                    let _ = msg_tx.send(ServerMessage::error(
                                        ErrorCode::InvalidMessage,
                                        "Invalid message format",
                                    )).await;
                                    continue;
                                }
                            };

                            let reply =
                                Self::handle_client_message(&service, client_msg, &mut player)
                                    .await;
                            let _ = msg_tx.send(reply).await;

                            // Start forwarding only after the join reply is queued
                            match (player, forwarder.is_some()) {
                                (Some(id), false) => {
                                    forwarder = Some(Self::spawn_forwarder(
                                        service.clone(), id, msg_tx.clone(), poll_interval,
                                    ));
                                }
                                (None, true) => {
                                    if let Some(task) = forwarder.take() {
                                        task.abort();
                                    }
                                }
                                _ => {}
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Client {} disconnected", addr);
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("WebSocket error for {}: {}", addr, e);
                            break;
                        }
                        // Ping/pong frames are answered by tungstenite
                        _ => {}
                    }
                }
                _ = shutdown_rx.recv() => {
                    let _ = msg_tx.send(ServerMessage::Shutdown {
                        reason: "Server shutting down".to_string(),
                    }).await;
                    break;
                }
            }
        }

        // Cleanup
        if let Some(task) = forwarder.take() {
            task.abort();
            let _ = task.await;
        }
        if let Some(id) = player {
            if let Err(e) = service.leave(id).await {
                error!(player_id = %id, "Leave on disconnect failed: {}", e);
            }
        }

        drop(msg_tx);
        if tokio::time::timeout(Duration::from_secs(1), sender_task).await.is_err() {
            debug!("Sender for {} did not drain in time", addr);
        }

        Ok(())
    }

    /// Handle a client message.
    async fn handle_client_message(
        service: &SudokuService,
        msg: ClientMessage,
        player: &mut Option<PlayerId>,
    ) -> ServerMessage {
        match msg {
            ClientMessage::GenerateBoard { size } => match service.generate_board(size).await {
                Ok(board) => ServerMessage::Board {
                    size: board.len() as u32,
                    board,
                },
                Err(e) => Self::service_error(&e),
            },
            ClientMessage::Join { size } => {
                if player.is_some() {
                    return ServerMessage::error(ErrorCode::AlreadyInGame, "Already joined a game");
                }
                let size = match size {
                    None => service.config().default_size,
                    Some(raw) => match BoardSize::try_from(raw) {
                        Ok(size) => size,
                        Err(_) => return Self::service_error(&ServiceError::InvalidBoardSize(raw)),
                    },
                };
                match service.join_with_size(size).await {
                    Ok(id) => {
                        *player = Some(id);
                        ServerMessage::Joined { player_id: id }
                    }
                    Err(e) => Self::service_error(&e),
                }
            }
            ClientMessage::MakeMove { row, col, value } => {
                let Some(id) = *player else {
                    return ServerMessage::error(ErrorCode::NotInGame, "Join a game first");
                };
                match service.make_move(id, row, col, value).await {
                    Ok(accepted) => ServerMessage::MoveResult { accepted },
                    Err(e) => Self::service_error(&e),
                }
            }
            ClientMessage::Status => {
                let status = match *player {
                    Some(id) => service.game_status(id).await,
                    None => Ok(GameStatus::NotInGame),
                };
                match status {
                    Ok(status) => ServerMessage::Status { status: status.to_string() },
                    Err(e) => Self::service_error(&e),
                }
            }
            ClientMessage::Leave => {
                if let Some(id) = player.take() {
                    if let Err(e) = service.leave(id).await {
                        return Self::service_error(&e);
                    }
                }
                ServerMessage::Status {
                    status: GameStatus::NotInGame.to_string(),
                }
            }
            ClientMessage::AvailableGames => ServerMessage::AvailableGames {
                count: service.available_games().await,
            },
            ClientMessage::Ping { timestamp } => ServerMessage::Pong {
                timestamp,
                server_time: std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64,
            },
        }
    }

    fn service_error(e: &ServiceError) -> ServerMessage {
        let code = match e {
            ServiceError::InvalidBoardSize(_) => ErrorCode::InvalidBoardSize,
            ServiceError::NoGameInProgress => ErrorCode::NoGameInProgress,
            ServiceError::Generation(_) | ServiceError::Registry(_) | ServiceError::Internal(_) => {
                error!("Request failed: {}", e);
                ErrorCode::InternalError
            }
        };
        ServerMessage::error(code, e.to_string())
    }

    /// Push `player`'s updates to the socket until the socket or queue goes away.
    fn spawn_forwarder(
        service: Arc<SudokuService>,
        player: PlayerId,
        tx: mpsc::Sender<ServerMessage>,
        poll_interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let update = service.poll_update(player, poll_interval).await;
                if update.is_no_update() {
                    if tx.is_closed() || !service.has_update_queue(player) {
                        break;
                    }
                    continue;
                }
                if tx.send(ServerMessage::Update { update }).await.is_err() {
                    break;
                }
            }
            debug!(player_id = %player, "Update forwarding stopped");
        })
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.service.session_count().await
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::UpdateKind;
    use crate::network::service::ServiceConfig;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn test_service() -> Arc<SudokuService> {
        Arc::new(SudokuService::new(ServiceConfig {
            default_size: BoardSize::Four,
            seed: Some(11),
            ..Default::default()
        }))
    }

    async fn start(max_connections: usize) -> (Arc<GameServer>, SocketAddr) {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            max_connections,
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let listener = TcpListener::bind(config.bind_addr).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = Arc::new(GameServer::new(config, test_service()));
        let running = server.clone();
        tokio::spawn(async move { running.serve(listener).await });
        (server, addr)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        ws
    }

    async fn send(ws: &mut Client, msg: ClientMessage) {
        ws.send(Message::Text(msg.to_json().unwrap())).await.unwrap();
    }

    async fn recv(ws: &mut Client) -> ServerMessage {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for server")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = frame {
                return ServerMessage::from_json(&text).unwrap();
            }
        }
    }

    async fn recv_update(ws: &mut Client) -> crate::game::events::Update {
        match recv(ws).await {
            ServerMessage::Update { update } => update,
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_server_config_from_lookup() {
        let config = ServerConfig::from_lookup(|k| match k {
            "SUDOKU_BIND_ADDR" => Some("127.0.0.1:9000".to_string()),
            "SUDOKU_MAX_CONNECTIONS" => Some("5".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.max_connections, 5);

        let bad = ServerConfig::from_lookup(|k| {
            (k == "SUDOKU_BIND_ADDR").then(|| "nowhere".to_string())
        });
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(ServerConfig::default(), test_service());
        assert_eq!(server.connection_count(), 0);
        assert_eq!(server.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let (server, addr) = start(10).await;
        let mut client = connect(addr).await;

        // Give the accept loop a moment to register the connection
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();

        assert!(matches!(recv(&mut client).await, ServerMessage::Shutdown { .. }));
    }

    #[tokio::test]
    async fn test_two_clients_play() {
        let (_server, addr) = start(10).await;
        let mut alice = connect(addr).await;
        let mut bob = connect(addr).await;

        send(&mut alice, ClientMessage::Join { size: Some(4) }).await;
        let alice_id = match recv(&mut alice).await {
            ServerMessage::Joined { player_id } => player_id,
            other => panic!("expected joined, got {other:?}"),
        };

        send(&mut bob, ClientMessage::Join { size: None }).await;
        assert!(matches!(recv(&mut bob).await, ServerMessage::Joined { .. }));

        let alice_start = recv_update(&mut alice).await;
        let bob_start = recv_update(&mut bob).await;
        assert_eq!(alice_start.kind, UpdateKind::GameStart);
        assert_eq!(bob_start.kind, UpdateKind::GameStart);
        assert_eq!(alice_start.is_my_turn, Some(true));
        assert_eq!(bob_start.is_my_turn, Some(false));

        send(&mut alice, ClientMessage::Status).await;
        assert_eq!(
            recv(&mut alice).await,
            ServerMessage::Status { status: "your turn".to_string() }
        );

        // Bob moving out of turn is refused
        send(&mut bob, ClientMessage::MakeMove { row: 0, col: 0, value: 1 }).await;
        assert_eq!(recv(&mut bob).await, ServerMessage::MoveResult { accepted: false });

        // Alice disconnects; Bob hears about it
        alice.close(None).await.unwrap();
        let update = recv_update(&mut bob).await;
        assert_eq!(update.kind, UpdateKind::PlayerDisconnected);
        assert!(update.message.unwrap().contains(&alice_id.to_string()));
    }

    #[tokio::test]
    async fn test_requests_before_join() {
        let (_server, addr) = start(10).await;
        let mut client = connect(addr).await;

        send(&mut client, ClientMessage::MakeMove { row: 0, col: 0, value: 1 }).await;
        match recv(&mut client).await {
            ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::NotInGame),
            other => panic!("expected error, got {other:?}"),
        }

        send(&mut client, ClientMessage::Status).await;
        assert_eq!(
            recv(&mut client).await,
            ServerMessage::Status { status: "not in a game".to_string() }
        );

        client.send(Message::Text("{\"type\":\"bogus\"}".to_string())).await.unwrap();
        match recv(&mut client).await {
            ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::InvalidMessage),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_board_and_ping() {
        let (_server, addr) = start(10).await;
        let mut client = connect(addr).await;

        send(&mut client, ClientMessage::GenerateBoard { size: 9 }).await;
        match recv(&mut client).await {
            ServerMessage::Board { size, board } => {
                assert_eq!(size, 9);
                assert_eq!(board.len(), 9);
            }
            other => panic!("expected board, got {other:?}"),
        }

        send(&mut client, ClientMessage::GenerateBoard { size: 3 }).await;
        match recv(&mut client).await {
            ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::InvalidBoardSize),
            other => panic!("expected error, got {other:?}"),
        }

        send(&mut client, ClientMessage::Ping { timestamp: 42 }).await;
        assert!(matches!(recv(&mut client).await, ServerMessage::Pong { timestamp: 42, .. }));
    }

    #[tokio::test]
    async fn test_join_twice_and_leave() {
        let (_server, addr) = start(10).await;
        let mut client = connect(addr).await;

        send(&mut client, ClientMessage::Join { size: Some(9) }).await;
        assert!(matches!(recv(&mut client).await, ServerMessage::Joined { .. }));

        send(&mut client, ClientMessage::Join { size: Some(9) }).await;
        match recv(&mut client).await {
            ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::AlreadyInGame),
            other => panic!("expected error, got {other:?}"),
        }

        send(&mut client, ClientMessage::AvailableGames).await;
        assert_eq!(recv(&mut client).await, ServerMessage::AvailableGames { count: 1 });

        send(&mut client, ClientMessage::Leave).await;
        assert_eq!(
            recv(&mut client).await,
            ServerMessage::Status { status: "not in a game".to_string() }
        );

        send(&mut client, ClientMessage::AvailableGames).await;
        assert_eq!(recv(&mut client).await, ServerMessage::AvailableGames { count: 0 });
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let (server, addr) = start(1).await;
        let _first = connect(addr).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.connection_count(), 1);

        let mut second = connect(addr).await;
        match recv(&mut second).await {
            ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::ServerOverloaded),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
