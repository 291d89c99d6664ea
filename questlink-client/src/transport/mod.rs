//! Connection lifecycle: connect, authenticate, heartbeat, reconnect.
//!
//! A [`Transport`] owns at most one driver task. The driver opens the socket,
//! authenticates, forwards decoded envelopes to the single consumer and runs
//! the backoff sequence after unexpected closures. Every status write carries
//! the generation of the driver that made it, so once `connect` or
//! `disconnect` has moved the generation on, a superseded driver can no
//! longer change anything.

mod backoff;
mod connector;

#[cfg(test)]
pub(crate) mod fake;

pub use backoff::Backoff;
pub use connector::{Connector, Frame, Socket, WsConnector};

use crate::config::{AuthConfig, ClientConfig, EndpointConfig, ReconnectConfig};
use questlink_core::{AuthError, ConnectionStatus, QuestlinkResult, TransportError};
use questlink_protocol::{
    decode, encode, AgentListPayload, AuthPayload, Envelope, HeartbeatPayload, Message,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// A daemon address plus the display name it was saved under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub name: String,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
        }
    }
}

/// Either a bearer token or a one-time connection code, or neither.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: Option<String>,
    pub connection_code: Option<String>,
}

impl Credentials {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            connection_code: None,
        }
    }

    pub fn connection_code(code: impl Into<String>) -> Self {
        Self {
            token: None,
            connection_code: Some(code.into()),
        }
    }

    fn auth_message(&self) -> Message {
        Message::Auth(AuthPayload {
            token: self.token.clone(),
            connection_code: self.connection_code.clone(),
        })
    }
}

impl From<&AuthConfig> for Credentials {
    fn from(auth: &AuthConfig) -> Self {
        Self {
            token: auth.token.clone(),
            connection_code: auth.connection_code.clone(),
        }
    }
}

impl From<&EndpointConfig> for Endpoint {
    fn from(endpoint: &EndpointConfig) -> Self {
        Self::new(endpoint.url.clone(), endpoint.name.clone())
    }
}

/// Everything the transport reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Status {
        status: ConnectionStatus,
        reason: Option<String>,
    },
    Envelope(Envelope),
    Authenticated {
        endpoint: Endpoint,
    },
    /// The daemon refused the credentials. Nothing retries until new ones
    /// are supplied through `connect`.
    AuthRejected {
        reason: String,
    },
}

/// Observable link state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkState {
    pub status: ConnectionStatus,
    pub reason: Option<String>,
    pub generation: u64,
    /// Cleared by an explicit disconnect, a rejected credential, a server
    /// close, or exhausted retries.
    pub should_be_connected: bool,
    /// Set when the daemon refused the current credentials.
    pub auth_rejected: bool,
    pub last_endpoint: Option<Endpoint>,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            reason: None,
            generation: 0,
            should_be_connected: false,
            auth_rejected: false,
            last_endpoint: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub reconnect: ReconnectConfig,
    pub heartbeat_interval: Duration,
    /// How long an open socket may wait for `auth_success` or `auth_error`.
    pub auth_timeout: Duration,
}

impl From<&ClientConfig> for TransportSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            reconnect: config.reconnect.clone(),
            heartbeat_interval: config.heartbeat_interval(),
            auth_timeout: config.auth_timeout(),
        }
    }
}

#[derive(Debug, Clone)]
struct Target {
    endpoint: Endpoint,
    credentials: Credentials,
}

struct DriverHandle {
    shutdown: watch::Sender<bool>,
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

pub struct Transport {
    connector: Arc<dyn Connector>,
    settings: TransportSettings,
    link: Arc<watch::Sender<LinkState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    target: Option<Target>,
    driver: Option<DriverHandle>,
}

impl Transport {
    pub fn new(
        connector: Arc<dyn Connector>,
        settings: TransportSettings,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (link, _) = watch::channel(LinkState::default());
        let transport = Self {
            connector,
            settings,
            link: Arc::new(link),
            events,
            target: None,
            driver: None,
        };
        (transport, receiver)
    }

    /// Open a connection to `endpoint`, replacing any existing one.
    pub fn connect(&mut self, endpoint: Endpoint, credentials: Credentials) {
        info!(endpoint = %endpoint.url, name = %endpoint.name, "Connecting");
        self.link
            .send_if_modified(|state| std::mem::replace(&mut state.auth_rejected, false));
        self.start(Target {
            endpoint,
            credentials,
        });
    }

    /// Cancel any pending backoff, stop the heartbeat and close the socket.
    pub fn disconnect(&mut self) {
        self.stop_driver();
        self.advance(ConnectionStatus::Disconnected, false);
        info!("Disconnected by caller");
    }

    /// Manual retry against the most recent target. Refused after the daemon
    /// rejected its credentials.
    pub fn reconnect(&mut self) -> QuestlinkResult<()> {
        let target = self.target.clone().ok_or(TransportError::NotConnected)?;
        if self.link.borrow().auth_rejected {
            return Err(AuthError::Rejected {
                reason: "credentials were rejected, connect with new ones".to_string(),
            }
            .into());
        }
        info!(endpoint = %target.endpoint.url, "Manual reconnect");
        self.start(target);
        Ok(())
    }

    /// Called when the host app returns to the foreground. Reconnects once,
    /// preferring the last endpoint that authenticated, if the link should be
    /// up but is not. Returns whether a reconnect was started.
    pub fn resume_foreground(&mut self) -> bool {
        let state = self.link.borrow().clone();
        if !state.should_be_connected {
            return false;
        }
        if matches!(
            state.status,
            ConnectionStatus::Connected | ConnectionStatus::Connecting
        ) {
            return false;
        }
        let Some(mut target) = self.target.clone() else {
            return false;
        };
        if let Some(endpoint) = state.last_endpoint {
            target.endpoint = endpoint;
        }
        info!(endpoint = %target.endpoint.url, "Foreground resume, reconnecting");
        self.start(target);
        true
    }

    /// Fire-and-forget send. Fails without queuing when the link is not up.
    pub fn send(&self, message: Message) -> QuestlinkResult<()> {
        let message_type = message.message_type();
        if self.status() != ConnectionStatus::Connected {
            warn!(message_type = %message_type, "Dropping outbound message, not connected");
            return Err(TransportError::NotConnected.into());
        }
        let text = encode(&Envelope::new(message))?;
        let driver = self.driver.as_ref().ok_or(TransportError::NotConnected)?;
        driver
            .outbound
            .send(text)
            .map_err(|_| TransportError::NotConnected)?;
        debug!(message_type = %message_type, "Queued outbound message");
        Ok(())
    }

    pub fn status(&self) -> ConnectionStatus {
        self.link.borrow().status
    }

    pub fn subscribe_status(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe()
    }

    pub fn last_endpoint(&self) -> Option<Endpoint> {
        self.link.borrow().last_endpoint.clone()
    }

    /// Seed the remembered endpoint, e.g. from persisted state.
    pub fn set_last_endpoint(&self, endpoint: Option<Endpoint>) {
        self.link.send_modify(|state| state.last_endpoint = endpoint);
    }

    fn start(&mut self, target: Target) {
        self.stop_driver();
        let generation = self.advance(ConnectionStatus::Connecting, true);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            connector: Arc::clone(&self.connector),
            link: Arc::clone(&self.link),
            events: self.events.clone(),
            generation,
            target: target.clone(),
            backoff: Backoff::new(self.settings.reconnect.clone()),
            heartbeat_interval: self.settings.heartbeat_interval,
            auth_timeout: self.settings.auth_timeout,
        };
        let task = tokio::spawn(driver.run(shutdown_rx, outbound_rx));
        self.target = Some(target);
        self.driver = Some(DriverHandle {
            shutdown,
            outbound,
            task,
        });
    }

    fn stop_driver(&mut self) {
        if let Some(driver) = self.driver.take() {
            // The driver closes its socket on the signal; the generation bump
            // that follows makes anything it still does a no-op.
            let _ = driver.shutdown.send(true);
        }
    }

    /// Start a new generation with the given status. Returns the generation.
    fn advance(&self, status: ConnectionStatus, should_be_connected: bool) -> u64 {
        let events = &self.events;
        let mut generation = 0;
        self.link.send_modify(|state| {
            state.generation += 1;
            state.should_be_connected = should_be_connected;
            generation = state.generation;
            apply_status(state, events, status, None);
        });
        generation
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            let _ = driver.shutdown.send(true);
            driver.task.abort();
        }
    }
}

fn apply_status(
    state: &mut LinkState,
    events: &mpsc::UnboundedSender<TransportEvent>,
    status: ConnectionStatus,
    reason: Option<String>,
) -> bool {
    if state.status == status && state.reason == reason {
        return false;
    }
    state.status = status;
    state.reason = reason.clone();
    let _ = events.send(TransportEvent::Status { status, reason });
    true
}

enum SocketExit {
    Shutdown,
    ServerClosed(Option<String>),
    Rejected(String),
    Lost { reason: String, authenticated: bool },
}

struct Driver {
    connector: Arc<dyn Connector>,
    link: Arc<watch::Sender<LinkState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    generation: u64,
    target: Target,
    backoff: Backoff,
    heartbeat_interval: Duration,
    auth_timeout: Duration,
}

impl Driver {
    async fn run(
        self,
        mut shutdown: watch::Receiver<bool>,
        mut outbound: mpsc::UnboundedReceiver<String>,
    ) {
        let url = self.target.endpoint.url.clone();
        let mut failures: u32 = 0;
        loop {
            let opened = tokio::select! {
                _ = shutdown.changed() => return,
                opened = self.connector.open(&url) => opened,
            };

            let reason = match opened {
                Ok(mut socket) => {
                    let exit = self
                        .run_socket(socket.as_mut(), &mut shutdown, &mut outbound)
                        .await;
                    match exit {
                        SocketExit::Shutdown => {
                            let _ = socket.close().await;
                            return;
                        }
                        SocketExit::ServerClosed(reason) => {
                            info!(endpoint = %url, reason = ?reason, "Server closed connection");
                            self.settle(ConnectionStatus::Disconnected, reason);
                            return;
                        }
                        SocketExit::Rejected(reason) => {
                            warn!(endpoint = %url, reason = %reason, "Authentication rejected");
                            let _ = socket.close().await;
                            self.rejected(reason);
                            return;
                        }
                        SocketExit::Lost {
                            reason,
                            authenticated,
                        } => {
                            warn!(endpoint = %url, reason = %reason, "Connection lost");
                            let _ = socket.close().await;
                            if authenticated {
                                failures = 0;
                            }
                            reason
                        }
                    }
                }
                Err(err) => {
                    warn!(endpoint = %url, error = %err, "Handshake failed");
                    err.to_string()
                }
            };

            failures += 1;
            if failures >= self.backoff.max_attempts() {
                let err = TransportError::Exhausted { attempts: failures };
                error!(endpoint = %url, attempts = failures, "Giving up on reconnect");
                self.settle(ConnectionStatus::Error, Some(err.to_string()));
                return;
            }

            self.publish(ConnectionStatus::Reconnecting, Some(reason));
            let delay = self.backoff.delay(failures);
            info!(
                endpoint = %url,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn run_socket(
        &self,
        socket: &mut dyn Socket,
        shutdown: &mut watch::Receiver<bool>,
        outbound: &mut mpsc::UnboundedReceiver<String>,
    ) -> SocketExit {
        if let Err(err) = send_message(socket, self.target.credentials.auth_message()).await {
            return SocketExit::Lost {
                reason: err.to_string(),
                authenticated: false,
            };
        }

        let mut authenticated = false;
        let mut heartbeat: Option<Interval> = None;
        let auth_deadline = tokio::time::sleep(self.auth_timeout);
        tokio::pin!(auth_deadline);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return SocketExit::Shutdown,
                _ = &mut auth_deadline, if !authenticated => {
                    let err = TransportError::Timeout {
                        endpoint: self.target.endpoint.url.clone(),
                    };
                    return SocketExit::Lost {
                        reason: format!("{} waiting for authentication", err),
                        authenticated: false,
                    };
                }
                frame = socket.recv() => {
                    let text = match frame {
                        None => {
                            return SocketExit::Lost {
                                reason: "connection closed".to_string(),
                                authenticated,
                            }
                        }
                        Some(Err(err)) => {
                            return SocketExit::Lost {
                                reason: err.to_string(),
                                authenticated,
                            }
                        }
                        Some(Ok(Frame::Close(reason))) => return SocketExit::ServerClosed(reason),
                        Some(Ok(Frame::Text(text))) => text,
                    };
                    let envelope = match decode(&text) {
                        Ok(envelope) => envelope,
                        Err(err) => {
                            warn!(error = %err, "Dropping undecodable message");
                            continue;
                        }
                    };
                    match envelope.message {
                        Message::AuthSuccess(_) if !authenticated => {
                            authenticated = true;
                            self.authenticated();
                            let start = Instant::now() + self.heartbeat_interval;
                            let mut ticker = interval_at(start, self.heartbeat_interval);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                            heartbeat = Some(ticker);
                            let request = Message::AgentList(AgentListPayload::default());
                            if let Err(err) = send_message(socket, request).await {
                                return SocketExit::Lost {
                                    reason: err.to_string(),
                                    authenticated,
                                };
                            }
                        }
                        Message::AuthError(payload) => return SocketExit::Rejected(payload.reason),
                        Message::HeartbeatAck(_) => trace!("Heartbeat acknowledged"),
                        _ if authenticated => {
                            let _ = self.events.send(TransportEvent::Envelope(envelope));
                        }
                        _ => {
                            debug!(
                                message_type = %envelope.message_type(),
                                "Ignoring message received before authentication"
                            );
                        }
                    }
                }
                Some(text) = outbound.recv() => {
                    if let Err(err) = socket.send(text).await {
                        return SocketExit::Lost {
                            reason: err.to_string(),
                            authenticated,
                        };
                    }
                }
                _ = next_tick(&mut heartbeat) => {
                    let beat = Message::Heartbeat(HeartbeatPayload {
                        timestamp: Some(questlink_core::now().timestamp_millis()),
                    });
                    if let Err(err) = send_message(socket, beat).await {
                        warn!(error = %err, "Heartbeat send failed");
                    }
                }
            }
        }
    }

    fn publish(&self, status: ConnectionStatus, reason: Option<String>) {
        let generation = self.generation;
        let events = &self.events;
        self.link.send_if_modified(|state| {
            state.generation == generation && apply_status(state, events, status, reason)
        });
    }

    /// Terminal status for this driver: nothing will retry after it.
    fn settle(&self, status: ConnectionStatus, reason: Option<String>) {
        let generation = self.generation;
        let events = &self.events;
        self.link.send_if_modified(|state| {
            if state.generation != generation {
                return false;
            }
            state.should_be_connected = false;
            apply_status(state, events, status, reason);
            true
        });
    }

    /// Terminal like [`Driver::settle`], and also marks the credentials as rejected.
    fn rejected(&self, reason: String) {
        let generation = self.generation;
        let events = &self.events;
        self.link.send_if_modified(|state| {
            if state.generation != generation {
                return false;
            }
            state.should_be_connected = false;
            state.auth_rejected = true;
            apply_status(state, events, ConnectionStatus::Error, Some(reason.clone()));
            let _ = events.send(TransportEvent::AuthRejected { reason });
            true
        });
    }

    fn authenticated(&self) {
        let generation = self.generation;
        let events = &self.events;
        let endpoint = self.target.endpoint.clone();
        self.link.send_if_modified(|state| {
            if state.generation != generation {
                return false;
            }
            state.last_endpoint = Some(endpoint.clone());
            apply_status(state, events, ConnectionStatus::Connected, None);
            let _ = events.send(TransportEvent::Authenticated { endpoint });
            true
        });
        info!(endpoint = %self.target.endpoint.url, "Authenticated");
    }
}

async fn send_message(socket: &mut dyn Socket, message: Message) -> QuestlinkResult<()> {
    let text = encode(&Envelope::new(message))?;
    socket.send(text).await?;
    Ok(())
}

pub(crate) async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{FakeConnector, FakePeer};
    use super::*;
    use questlink_protocol::MessageType;

    fn settings(max_attempts: u32) -> TransportSettings {
        TransportSettings {
            reconnect: ReconnectConfig {
                initial_ms: 1_000,
                max_ms: 30_000,
                multiplier: 2.0,
                jitter_ms: 0,
                max_attempts,
            },
            heartbeat_interval: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(10),
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint::new("ws://desk:4000/ws", "Desk")
    }

    async fn wait_for_status(transport: &Transport, status: ConnectionStatus) -> LinkState {
        let mut rx = transport.subscribe_status();
        let state = rx.wait_for(|s| s.status == status).await.unwrap().clone();
        state
    }

    async fn authenticate(peer: &mut FakePeer) {
        let auth = peer.next_message().await;
        assert_eq!(auth.message_type(), MessageType::Auth);
        peer.send_json(r#"{"type":"auth_success","payload":{},"timestamp":0}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_success_connects_and_requests_agent_list() {
        let (connector, mut peers) = FakeConnector::accepting(1);
        let (mut transport, mut events) = Transport::new(connector.clone(), settings(10));
        transport.connect(endpoint(), Credentials::connection_code("ABC-123"));

        let mut peer = peers.remove(0);
        let auth = peer.next_message().await;
        match auth.message {
            Message::Auth(payload) => {
                assert_eq!(payload.connection_code.as_deref(), Some("ABC-123"))
            }
            other => panic!("expected auth, got {:?}", other),
        }
        peer.send_json(r#"{"type":"auth_success","payload":{"serverVersion":"1.2"}}"#);

        let state = wait_for_status(&transport, ConnectionStatus::Connected).await;
        assert_eq!(state.last_endpoint, Some(endpoint()));
        assert_eq!(peer.next_message().await.message_type(), MessageType::AgentList);

        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Status {
                status: ConnectionStatus::Connecting,
                reason: None
            })
        );
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Status {
                status: ConnectionStatus::Connected,
                reason: None
            })
        );
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Authenticated { endpoint: endpoint() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_forwarded_after_auth() {
        let (connector, mut peers) = FakeConnector::accepting(1);
        let (mut transport, mut events) = Transport::new(connector, settings(10));
        transport.connect(endpoint(), Credentials::default());
        let mut peer = peers.remove(0);
        authenticate(&mut peer).await;
        peer.send_json(r#"{"type":"unknown_type_xyz","payload":{}}"#);
        peer.send_json(r#"{"type":"agent_killed","payload":{"agentId":"a1"}}"#);

        loop {
            match events.recv().await {
                Some(TransportEvent::Envelope(envelope)) => {
                    assert_eq!(envelope.message_type(), MessageType::AgentKilled);
                    break;
                }
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_every_interval_while_connected() {
        let (connector, mut peers) = FakeConnector::accepting(1);
        let (mut transport, _events) = Transport::new(connector, settings(10));
        transport.connect(endpoint(), Credentials::default());
        let mut peer = peers.remove(0);
        authenticate(&mut peer).await;
        assert_eq!(peer.next_message().await.message_type(), MessageType::AgentList);

        let before = Instant::now();
        assert_eq!(peer.next_message().await.message_type(), MessageType::Heartbeat);
        assert!(before.elapsed() >= Duration::from_secs(30));
        assert_eq!(peer.next_message().await.message_type(), MessageType::Heartbeat);
        assert!(before.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_is_terminal() {
        let (connector, mut peers) = FakeConnector::accepting(1);
        let (mut transport, _events) = Transport::new(connector.clone(), settings(10));
        transport.connect(endpoint(), Credentials::token("stale"));
        let mut peer = peers.remove(0);
        peer.next_message().await;
        peer.send_json(r#"{"type":"auth_error","payload":{"reason":"token expired"}}"#);

        let state = wait_for_status(&transport, ConnectionStatus::Error).await;
        assert_eq!(state.reason.as_deref(), Some("token expired"));
        assert!(!state.should_be_connected);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts(), 1);
        assert!(state.auth_rejected);
        assert!(!transport.resume_foreground());
        assert!(transport.reconnect().is_err());
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_rejection_is_reported_and_cleared_by_new_credentials() {
        let (connector, mut peers) = FakeConnector::accepting(2);
        let (mut transport, mut events) = Transport::new(connector.clone(), settings(10));
        transport.connect(endpoint(), Credentials::token("stale"));
        let mut peer = peers.remove(0);
        peer.next_message().await;
        peer.send_json(r#"{"type":"auth_error","payload":{"reason":"token expired"}}"#);

        loop {
            match events.recv().await {
                Some(TransportEvent::AuthRejected { reason }) => {
                    assert_eq!(reason, "token expired");
                    break;
                }
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }

        transport.connect(endpoint(), Credentials::token("fresh"));
        assert!(!transport.subscribe_status().borrow().auth_rejected);
        let mut second = peers.remove(0);
        match second.next_message().await.message {
            Message::Auth(payload) => assert_eq!(payload.token.as_deref(), Some("fresh")),
            other => panic!("expected auth, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_daemon_times_out_and_backs_off() {
        let (connector, mut peers) = FakeConnector::accepting(1);
        let (mut transport, _events) = Transport::new(connector.clone(), settings(2));
        let started = Instant::now();
        transport.connect(endpoint(), Credentials::token("secret"));
        let mut peer = peers.remove(0);
        assert_eq!(peer.next_message().await.message_type(), MessageType::Auth);

        // The peer stays open and never answers.
        let state = wait_for_status(&transport, ConnectionStatus::Reconnecting).await;
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(state.reason.unwrap_or_default().contains("timed out"));

        let state = wait_for_status(&transport, ConnectionStatus::Error).await;
        assert!(state.reason.unwrap_or_default().contains("exhausted"));
        assert_eq!(connector.attempts(), 2);
        drop(peer);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_backoff() {
        let connector = FakeConnector::refusing();
        let (mut transport, _events) = Transport::new(connector.clone(), settings(10));
        transport.connect(endpoint(), Credentials::default());
        wait_for_status(&transport, ConnectionStatus::Reconnecting).await;
        assert_eq!(connector.attempts(), 1);

        transport.disconnect();
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_end_in_error() {
        let connector = FakeConnector::refusing();
        let (mut transport, _events) = Transport::new(connector.clone(), settings(3));
        transport.connect(endpoint(), Credentials::default());

        let state = wait_for_status(&transport, ConnectionStatus::Error).await;
        assert_eq!(connector.attempts(), 3);
        assert!(state.reason.unwrap_or_default().contains("exhausted"));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts(), 3);

        transport.reconnect().unwrap();
        wait_for_status(&transport, ConnectionStatus::Reconnecting).await;
        assert_eq!(connector.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_close_does_not_reconnect() {
        let (connector, mut peers) = FakeConnector::accepting(1);
        let (mut transport, _events) = Transport::new(connector.clone(), settings(10));
        transport.connect(endpoint(), Credentials::default());
        let mut peer = peers.remove(0);
        authenticate(&mut peer).await;
        wait_for_status(&transport, ConnectionStatus::Connected).await;

        peer.close(Some("daemon shutting down"));
        let state = wait_for_status(&transport, ConnectionStatus::Disconnected).await;
        assert!(!state.should_be_connected);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_drop_reconnects() {
        let (connector, mut peers) = FakeConnector::accepting(2);
        let (mut transport, _events) = Transport::new(connector.clone(), settings(10));
        transport.connect(endpoint(), Credentials::default());
        let mut first = peers.remove(0);
        authenticate(&mut first).await;
        wait_for_status(&transport, ConnectionStatus::Connected).await;

        drop(first);
        wait_for_status(&transport, ConnectionStatus::Reconnecting).await;

        let mut second = peers.remove(0);
        authenticate(&mut second).await;
        wait_for_status(&transport, ConnectionStatus::Connected).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_resume_skips_backoff() {
        let connector = FakeConnector::refusing();
        let (mut transport, _events) = Transport::new(connector.clone(), settings(10));
        transport.connect(endpoint(), Credentials::default());
        wait_for_status(&transport, ConnectionStatus::Reconnecting).await;
        assert_eq!(connector.attempts(), 1);

        assert!(transport.resume_foreground());
        wait_for_status(&transport, ConnectionStatus::Reconnecting).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_connection() {
        let connector = FakeConnector::refusing();
        let (transport, _events) = Transport::new(connector, settings(10));
        let result = transport.send(Message::AgentList(AgentListPayload::default()));
        assert!(result.is_err());
    }
}
