//! WebSocket Game Server
//!
//! Async WebSocket server for player connections. Each connection must
//! authenticate with its first frame, then drives the match coordinator and
//! receives its own match notifications plus the all-clients snapshots.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Notify, RwLock};
use tokio::time::{interval, timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::network::auth::{verify_identity, AuthConfig, AuthError, Identity};
use crate::network::coordinator::{env_parse, MatchCoordinator};
use crate::network::protocol::{AuthRequest, AuthResult, ClientMessage, ErrorCode, ServerMessage};
use crate::network::session::ClientSender;
use crate::game::state::PlayerId;

/// Snapshot queue depth per connection. Snapshots beyond it are skipped.
const SNAPSHOT_CAPACITY: usize = 64;

/// How long a closing connection gets to flush queued frames.
const FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Time allowed for the auth frame.
    pub auth_timeout: Duration,
    /// Connections silent for this long are dropped.
    pub idle_timeout: Duration,
    /// How often idle connections are looked for.
    pub cleanup_interval: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            max_connections: 1000,
            auth_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            version: crate::VERSION.to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_parse("BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_connections: env_parse("MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            auth_timeout: env_parse("AUTH_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.auth_timeout),
            idle_timeout: env_parse("IDLE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            ..defaults
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Client did not authenticate in time.
    #[error("Authentication timed out")]
    AuthTimeout,

    /// Client closed before authenticating.
    #[error("Connection closed before authentication")]
    ClosedBeforeAuth,

    /// Authentication rejected.
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
}

/// Connected client state.
struct ConnectedClient {
    /// Player identifier (after auth).
    player_id: Option<PlayerId>,
    /// Connection time.
    connected_at: Instant,
    /// Last inbound frame.
    last_activity: Instant,
    /// Wakes the connection task when the cleanup loop drops it.
    kick: Arc<Notify>,
}

type ClientTable = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;
type WsReceiver = SplitStream<WebSocketStream<TcpStream>>;

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Token validation settings.
    auth: Arc<AuthConfig>,
    /// Match operations.
    coordinator: Arc<MatchCoordinator>,
    /// Connected clients.
    clients: ClientTable,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, auth: AuthConfig, coordinator: Arc<MatchCoordinator>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            auth: Arc::new(auth),
            coordinator,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from `listener` until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);

        let cleanup_handle = tokio::spawn(Self::run_cleanup_loop(
            self.clients.clone(),
            self.config.cleanup_interval,
            self.config.idle_timeout,
        ));
        let reaper_handle = tokio::spawn(self.coordinator.clone().run_reaper(self.shutdown_tx.subscribe()));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
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

        cleanup_handle.abort();
        let _ = reaper_handle.await;

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let connection = Connection {
            addr,
            config: self.config.clone(),
            auth: self.auth.clone(),
            coordinator: self.coordinator.clone(),
            clients: self.clients.clone(),
        };
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) = connection.serve(stream, shutdown_rx).await {
                match e {
                    GameServerError::Auth(_) | GameServerError::AuthTimeout => {
                        info!("Client {} rejected: {}", addr, e)
                    }
                    _ => debug!("Client {} ended: {}", addr, e),
                }
            }
        });
    }

    /// Drop connections that have been silent for too long.
    async fn run_cleanup_loop(clients: ClientTable, every: Duration, idle_timeout: Duration) {
        let mut interval = interval(every);

        loop {
            interval.tick().await;

            let now = Instant::now();
            let mut clients = clients.write().await;
            let idle: Vec<SocketAddr> = clients
                .iter()
                .filter(|(_, c)| now.duration_since(c.last_activity) > idle_timeout)
                .map(|(addr, _)| *addr)
                .collect();

            for addr in idle {
                if let Some(client) = clients.remove(&addr) {
                    client.kick.notify_one();
                    info!("Removed idle client {}", addr);
                }
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get active match count.
    pub async fn session_count(&self) -> usize {
        self.coordinator.active_matches().await
    }

    /// The coordinator behind this server.
    pub fn coordinator(&self) -> &Arc<MatchCoordinator> {
        &self.coordinator
    }
}

/// Everything one connection task needs.
struct Connection {
    addr: SocketAddr,
    config: ServerConfig,
    auth: Arc<AuthConfig>,
    coordinator: Arc<MatchCoordinator>,
    clients: ClientTable,
}

impl Connection {
    async fn serve(
        self,
        stream: TcpStream,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), GameServerError> {
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<ServerMessage>();
        let (snapshot_tx, mut snapshot_rx) = mpsc::channel::<ServerMessage>(SNAPSHOT_CAPACITY);

        let kick = Arc::new(Notify::new());
        {
            let mut clients = self.clients.write().await;
            clients.insert(self.addr, ConnectedClient {
                player_id: None,
                connected_at: Instant::now(),
                last_activity: Instant::now(),
                kick: kick.clone(),
            });
        }

        // Spawn message sender task; match traffic goes out before snapshots
        let mut sender_task = tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    biased;
                    msg = msg_rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                    Some(msg) = snapshot_rx.recv() => msg,
                };
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
            let _ = ws_sender.close().await;
        });

        let result = match self.authenticate(&mut ws_receiver, &msg_tx).await {
            Ok(identity) => {
                self.run_authenticated(
                    identity,
                    &mut ws_receiver,
                    &msg_tx,
                    &snapshot_tx,
                    &kick,
                    &mut shutdown_rx,
                )
                .await;
                Ok(())
            }
            Err(e) => Err(e),
        };

        // Cleanup
        let client = self.clients.write().await.remove(&self.addr);
        if let Some(client) = client {
            debug!(
                "Client {} cleaned up after {:?}",
                self.addr,
                client.connected_at.elapsed()
            );
        }

        drop(msg_tx);
        drop(snapshot_tx);
        if timeout(FLUSH_GRACE, &mut sender_task).await.is_err() {
            sender_task.abort();
        }

        result
    }

    /// Wait for the auth frame, validate it and admit the player.
    async fn authenticate(
        &self,
        ws_receiver: &mut WsReceiver,
        msg_tx: &ClientSender,
    ) -> Result<Identity, GameServerError> {
        let request = timeout(self.config.auth_timeout, self.await_auth_frame(ws_receiver, msg_tx))
            .await
            .map_err(|_| GameServerError::AuthTimeout)??;

        let verified = match verify_identity(&request.token, &self.auth) {
            Ok(identity) => self.coordinator.admit(&identity).await.map(|_| identity),
            Err(e) => Err(e),
        };

        match verified {
            Ok(identity) => {
                let _ = msg_tx.send(ServerMessage::AuthResult(AuthResult {
                    success: true,
                    player_id: Some(identity.player_id),
                    display_name: Some(identity.display_name.clone()),
                    error: None,
                    server_version: self.config.version.clone(),
                }));

                info!(
                    "Client {} authenticated as {} ({}, client {})",
                    self.addr,
                    identity.display_name,
                    identity.player_id.short(),
                    if request.client_version.is_empty() { "unknown" } else { request.client_version.as_str() },
                );
                Ok(identity)
            }
            Err(e) => {
                let _ = msg_tx.send(ServerMessage::AuthResult(AuthResult {
                    success: false,
                    player_id: None,
                    display_name: None,
                    error: Some(format!("{:?}: {}", e.code(), e)),
                    server_version: self.config.version.clone(),
                }));
                Err(e.into())
            }
        }
    }

    async fn await_auth_frame(
        &self,
        ws_receiver: &mut WsReceiver,
        msg_tx: &ClientSender,
    ) -> Result<AuthRequest, GameServerError> {
        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => match ClientMessage::from_json(&text) {
                    Ok(ClientMessage::Auth(request)) => return Ok(request),
                    Ok(_) => {
                        let _ = msg_tx
                            .send(ServerMessage::error(ErrorCode::NotAuthenticated, "Must authenticate first"));
                    }
                    Err(e) => {
                        debug!("Invalid message from {}: {}", self.addr, e);
                        let _ = msg_tx
                            .send(ServerMessage::error(ErrorCode::InvalidInput, "Invalid message format"));
                    }
                },
                Some(Ok(Message::Close(_))) | None => return Err(GameServerError::ClosedBeforeAuth),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(_)) => {}
            }
        }
    }

    async fn run_authenticated(
        &self,
        identity: Identity,
        ws_receiver: &mut WsReceiver,
        msg_tx: &ClientSender,
        snapshot_tx: &mpsc::Sender<ServerMessage>,
        kick: &Notify,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) {
        let player = identity.player_id;
        {
            let mut clients = self.clients.write().await;
            if let Some(client) = clients.get_mut(&self.addr) {
                client.player_id = Some(player);
            }
        }

        let mut snapshots = self.coordinator.fanout().subscribe();
        self.coordinator.attach(player, msg_tx).await;
        for msg in self.coordinator.welcome().await {
            let _ = msg_tx.send(msg);
        }

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.touch().await;
                            match ClientMessage::from_json(&text) {
                                Ok(client_msg) => self.dispatch(&identity, client_msg, msg_tx).await,
                                Err(e) => {
                                    debug!("Invalid message from {}: {}", self.addr, e);
                                    let _ = msg_tx
                                        .send(ServerMessage::error(ErrorCode::InvalidInput, "Invalid message format"));
                                }
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            self.touch().await;
                            let _ = msg_tx
                                .send(ServerMessage::error(ErrorCode::InvalidInput, "Binary frames are not supported"));
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Client {} disconnected", self.addr);
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("WebSocket error for {}: {}", self.addr, e);
                            break;
                        }
                        Some(Ok(_)) => self.touch().await,
                    }
                }
                snapshot = snapshots.recv() => {
                    match snapshot {
                        Ok(msg) => {
                            if snapshot_tx.try_send(msg).is_err() {
                                debug!("Snapshot queue full for {}, skipping snapshot", self.addr);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!("Client {} skipped {} snapshots", self.addr, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = kick.notified() => {
                    debug!("Client {} timed out", self.addr);
                    break;
                }
                _ = shutdown_rx.recv() => {
                    let _ = msg_tx.send(ServerMessage::Shutdown {
                        reason: "Server shutting down".to_string(),
                    });
                    break;
                }
            }
        }

        self.coordinator.disconnect(player, msg_tx).await;
    }

    async fn dispatch(&self, identity: &Identity, msg: ClientMessage, msg_tx: &ClientSender) {
        let player = identity.player_id;
        let result = match msg {
            ClientMessage::Auth(_) => {
                debug!("Client {} sent auth twice", self.addr);
                Ok(())
            }
            ClientMessage::CreateMatch { kind } => self
                .coordinator
                .create_match(player, &identity.display_name, kind, msg_tx)
                .await
                .map(|_| ()),
            ClientMessage::JoinMatch { match_id } => {
                self.coordinator.join_match(player, match_id, msg_tx).await
            }
            ClientMessage::SubmitMove { match_id, mv, round } => {
                self.coordinator.submit_move(player, match_id, mv, round).await
            }
            ClientMessage::AbandonMatch { match_id } => {
                self.coordinator.abandon_match(player, match_id).await
            }
            ClientMessage::Ping { timestamp } => {
                let _ = msg_tx.send(ServerMessage::Pong {
                    timestamp,
                    server_time: Utc::now().timestamp_millis().max(0) as u64,
                });
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!("Dropped request from {}: {}", player.short(), e);
        }
    }

    async fn touch(&self) {
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get_mut(&self.addr) {
            client.last_activity = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::moves::Move;
    use crate::game::state::{FinishReason, MatchKind};
    use crate::network::auth::tests::{mint_token, SECRET};
    use crate::network::coordinator::CoordinatorConfig;
    use crate::network::fanout::Fanout;
    use crate::store::InMemoryStore;
    use tokio_tungstenite::{connect_async, MaybeTlsStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn test_server(config: ServerConfig) -> GameServer {
        let auth = AuthConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        };
        let store = Arc::new(InMemoryStore::new());
        let (coordinator, _writer) =
            MatchCoordinator::new(CoordinatorConfig::default(), store, Fanout::default());
        GameServer::new(config, auth, Arc::new(coordinator))
    }

    async fn start(config: ServerConfig) -> (Arc<GameServer>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(test_server(config));
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });
        (server, addr)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws
    }

    async fn send(ws: &mut Client, msg: ClientMessage) {
        ws.send(Message::Text(msg.to_json().unwrap())).await.unwrap();
    }

    async fn recv(ws: &mut Client) -> ServerMessage {
        loop {
            let frame = timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("connection closed")
                .unwrap();
            if let Message::Text(text) = frame {
                return ServerMessage::from_json(&text).unwrap();
            }
        }
    }

    async fn recv_until(ws: &mut Client, pred: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
        loop {
            let msg = recv(ws).await;
            if pred(&msg) {
                return msg;
            }
        }
    }

    async fn eventually<F, Fut>(check: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn login(addr: SocketAddr, sub: &str, name: &str) -> (Client, PlayerId) {
        let mut ws = connect(addr).await;
        send(&mut ws, ClientMessage::Auth(AuthRequest {
            token: mint_token(sub, Some(name), SECRET),
            client_version: "test".into(),
        }))
        .await;

        match recv(&mut ws).await {
            ServerMessage::AuthResult(result) => {
                assert!(result.success, "auth failed: {:?}", result.error);
                assert_eq!(result.display_name.as_deref(), Some(name));
                (ws, result.player_id.unwrap())
            }
            other => panic!("expected auth result, got {:?}", other),
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8090);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.auth_timeout, Duration::from_secs(10));
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = test_server(ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        });

        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Arc::new(test_server(ServerConfig::default()));
        let serving = server.clone();
        let handle = tokio::spawn(async move { serving.serve(listener).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        server.shutdown();

        let result = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_auth_required_first() {
        let (_server, addr) = start(ServerConfig::default()).await;
        let mut ws = connect(addr).await;

        send(&mut ws, ClientMessage::CreateMatch { kind: MatchKind::HumanVsBot }).await;
        match recv(&mut ws).await {
            ServerMessage::Error(err) => assert_eq!(err.code, ErrorCode::NotAuthenticated),
            other => panic!("unexpected message {:?}", other),
        }

        ws.send(Message::Text("{not json".into())).await.unwrap();
        match recv(&mut ws).await {
            ServerMessage::Error(err) => assert_eq!(err.code, ErrorCode::InvalidInput),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_token_rejected() {
        let (server, addr) = start(ServerConfig::default()).await;
        let mut ws = connect(addr).await;

        send(&mut ws, ClientMessage::Auth(AuthRequest {
            token: mint_token("user-a", Some("alice"), "some-other-secret-entirely!!"),
            client_version: String::new(),
        }))
        .await;

        match recv(&mut ws).await {
            ServerMessage::AuthResult(result) => {
                assert!(!result.success);
                assert!(result.player_id.is_none());
                assert!(result.error.is_some());
            }
            other => panic!("unexpected message {:?}", other),
        }

        let srv = server.as_ref();
        eventually(|| async move { srv.connection_count().await == 0 }).await;
    }

    #[tokio::test]
    async fn test_auth_timeout_closes_connection() {
        let (server, addr) = start(ServerConfig {
            auth_timeout: Duration::from_millis(50),
            ..Default::default()
        })
        .await;
        let _ws = connect(addr).await;

        let srv = server.as_ref();
        eventually(|| async move { srv.connection_count().await == 0 }).await;
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (_server, addr) = start(ServerConfig::default()).await;
        let (mut ws, _) = login(addr, "user-a", "alice").await;

        send(&mut ws, ClientMessage::Ping { timestamp: 42 }).await;
        let pong = recv_until(&mut ws, |m| matches!(m, ServerMessage::Pong { .. })).await;
        match pong {
            ServerMessage::Pong { timestamp, server_time } => {
                assert_eq!(timestamp, 42);
                assert!(server_time > 0);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_full_match_over_websocket() {
        let (_server, addr) = start(ServerConfig::default()).await;
        let (mut a, alice) = login(addr, "user-a", "alice").await;
        let (mut b, bob) = login(addr, "user-b", "bob").await;
        assert_eq!(alice, PlayerId::from_subject("user-a"));

        send(&mut a, ClientMessage::CreateMatch { kind: MatchKind::HumanVsHuman }).await;
        let match_id = match recv_until(&mut a, |m| matches!(m, ServerMessage::MatchCreated { .. })).await {
            ServerMessage::MatchCreated { match_id, .. } => match_id,
            _ => unreachable!(),
        };

        // bob sees the match listed before joining
        recv_until(&mut b, |m| {
            matches!(m, ServerMessage::OpenMatches { matches } if matches.iter().any(|o| o.match_id == match_id))
        })
        .await;

        send(&mut b, ClientMessage::JoinMatch { match_id }).await;
        for ws in [&mut a, &mut b] {
            let started = recv_until(ws, |m| matches!(m, ServerMessage::MatchStarted { .. })).await;
            assert_eq!(
                started,
                ServerMessage::MatchStarted {
                    match_id,
                    kind: MatchKind::HumanVsHuman,
                    participants: vec![alice, bob],
                }
            );
        }

        for round in 1..=3u32 {
            send(&mut a, ClientMessage::SubmitMove { match_id, mv: Move::Rock, round: Some(round) }).await;
            send(&mut b, ClientMessage::SubmitMove { match_id, mv: Move::Scissors, round: Some(round) }).await;
            for ws in [&mut a, &mut b] {
                match recv_until(ws, |m| matches!(m, ServerMessage::RoundResult(_))).await {
                    ServerMessage::RoundResult(result) => {
                        assert_eq!(result.round, round);
                        assert_eq!(result.score_a, round);
                    }
                    _ => unreachable!(),
                }
            }
        }

        for ws in [&mut a, &mut b] {
            let finished = recv_until(ws, |m| matches!(m, ServerMessage::MatchFinished { .. })).await;
            assert_eq!(
                finished,
                ServerMessage::MatchFinished {
                    match_id,
                    winner_id: Some(alice),
                    reason: FinishReason::ThresholdReached,
                }
            );
        }

        let board = recv_until(&mut a, |m| {
            matches!(m, ServerMessage::Leaderboard { entries } if entries.first().map(|e| e.wins) == Some(1))
        })
        .await;
        match board {
            ServerMessage::Leaderboard { entries } => assert_eq!(entries[0].username, "alice"),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_disconnect_forfeits_match() {
        let (server, addr) = start(ServerConfig::default()).await;
        let (mut a, alice) = login(addr, "user-a", "alice").await;
        let (mut b, _bob) = login(addr, "user-b", "bob").await;

        send(&mut a, ClientMessage::CreateMatch { kind: MatchKind::HumanVsHuman }).await;
        let match_id = match recv_until(&mut a, |m| matches!(m, ServerMessage::MatchCreated { .. })).await {
            ServerMessage::MatchCreated { match_id, .. } => match_id,
            _ => unreachable!(),
        };
        send(&mut b, ClientMessage::JoinMatch { match_id }).await;
        recv_until(&mut a, |m| matches!(m, ServerMessage::MatchStarted { .. })).await;

        b.close(None).await.unwrap();

        let finished = recv_until(&mut a, |m| matches!(m, ServerMessage::MatchFinished { .. })).await;
        assert_eq!(
            finished,
            ServerMessage::MatchFinished {
                match_id,
                winner_id: Some(alice),
                reason: FinishReason::Abandoned,
            }
        );
        let srv = server.as_ref();
        eventually(|| async move { srv.session_count().await == 0 }).await;
    }
}
