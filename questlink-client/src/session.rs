//! The sync session: single writer for the registries.
//!
//! [`SyncSession::run`] is the only place registries are mutated. Transport
//! events, UI requests and idle ticks are serialized through one `select!`
//! loop. Readers never lock: every batch that changed something publishes a
//! fresh `Arc<Registries>` through a `watch` channel, and side effects go out
//! on a `broadcast` channel and to the [`Notifier`].

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::idle::IdleMonitor;
use crate::normalizer::Normalizer;
use crate::notifications::{Notification, Notifier};
use crate::persistence::{self, KeyValueStore};
use crate::reconciler::{Command, Reconciler, SyncEvent};
use crate::registry::Registries;
use crate::transport::{
    next_tick, Connector, Credentials, Endpoint, LinkState, Transport, TransportEvent,
    TransportSettings,
};
use chrono::Duration as ChronoDuration;
use questlink_core::{ActivityEntry, ActivityType, ConnectionStatus, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const REQUEST_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionRequest {
    Connect {
        endpoint: Endpoint,
        credentials: Credentials,
    },
    Disconnect,
    /// Manual retry, e.g. after reconnect attempts were exhausted.
    Reconnect,
    /// The host app came back to the foreground.
    Foreground,
    Command(Command),
    Shutdown,
}

/// Cloneable front door to a running [`SyncSession`].
#[derive(Clone)]
pub struct SessionHandle {
    requests: mpsc::Sender<SessionRequest>,
    registries: watch::Receiver<Arc<Registries>>,
    events: broadcast::Sender<SyncEvent>,
    link: watch::Receiver<LinkState>,
}

impl SessionHandle {
    pub async fn connect(&self, endpoint: Endpoint, credentials: Credentials) -> ClientResult<()> {
        self.request(SessionRequest::Connect {
            endpoint,
            credentials,
        })
        .await
    }

    pub async fn disconnect(&self) -> ClientResult<()> {
        self.request(SessionRequest::Disconnect).await
    }

    pub async fn reconnect(&self) -> ClientResult<()> {
        self.request(SessionRequest::Reconnect).await
    }

    pub async fn resume_foreground(&self) -> ClientResult<()> {
        self.request(SessionRequest::Foreground).await
    }

    /// Fire-and-forget: the outcome shows up later as registry changes.
    pub async fn command(&self, command: Command) -> ClientResult<()> {
        self.request(SessionRequest::Command(command)).await
    }

    /// Stop the session loop after disconnecting.
    pub async fn shutdown(&self) -> ClientResult<()> {
        self.request(SessionRequest::Shutdown).await
    }

    /// Latest consistent registry snapshot.
    pub fn snapshot(&self) -> Arc<Registries> {
        Arc::clone(&self.registries.borrow())
    }

    pub fn watch_registries(&self) -> watch::Receiver<Arc<Registries>> {
        self.registries.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn link_state(&self) -> watch::Receiver<LinkState> {
        self.link.clone()
    }

    async fn request(&self, request: SessionRequest) -> ClientResult<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| ClientError::SessionClosed)
    }
}

/// Wall-clock time derived from the runtime clock, so paused-time tests and
/// production agree on elapsed durations.
#[derive(Debug, Clone, Copy)]
struct SessionClock {
    wall: Timestamp,
    started: Instant,
}

impl SessionClock {
    fn start() -> Self {
        Self {
            wall: questlink_core::now(),
            started: Instant::now(),
        }
    }

    fn now(&self) -> Timestamp {
        let elapsed = ChronoDuration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| ChronoDuration::zero());
        self.wall + elapsed
    }
}

pub struct SyncSession {
    transport: Transport,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    requests: mpsc::Receiver<SessionRequest>,
    reconciler: Reconciler,
    idle: IdleMonitor,
    idle_sweep: Duration,
    registries: Registries,
    snapshot: watch::Sender<Arc<Registries>>,
    events: broadcast::Sender<SyncEvent>,
    store: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn Notifier>,
    clock: SessionClock,
    stored_token: Option<String>,
    pending_token: Option<String>,
    disconnect_requested: bool,
    dirty: bool,
}

impl SyncSession {
    pub fn new(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, SessionHandle) {
        let (transport, transport_events) =
            Transport::new(connector, TransportSettings::from(config));
        let (request_tx, requests) = mpsc::channel(REQUEST_QUEUE);
        let registries = Registries::with_retention(
            config.retention.activity_log_cap,
            config.retention.loot_cap,
        );
        let (snapshot, snapshot_rx) = watch::channel(Arc::new(registries.clone()));
        let (events, _) = broadcast::channel(EVENT_QUEUE);

        let handle = SessionHandle {
            requests: request_tx,
            registries: snapshot_rx,
            events: events.clone(),
            link: transport.subscribe_status(),
        };
        let session = Self {
            transport,
            transport_events,
            requests,
            reconciler: Reconciler::new(Normalizer::new(config.leveling.curve())),
            idle: IdleMonitor::new(config.idle.threshold()),
            idle_sweep: config.idle.sweep_interval(),
            registries,
            snapshot,
            events,
            store,
            notifier,
            clock: SessionClock::start(),
            stored_token: None,
            pending_token: None,
            disconnect_requested: false,
            dirty: false,
        };
        (session, handle)
    }

    /// Load persisted state for offline viewing. Failures are logged and the
    /// session starts empty.
    pub async fn restore(&mut self) {
        match persistence::load_registries(self.store.as_ref()).await {
            Ok(Some(mut registries)) => {
                for connection in registries.connections.values_mut() {
                    connection.status = ConnectionStatus::Disconnected;
                }
                info!(
                    agents = registries.agents.len(),
                    quests = registries.quests.len(),
                    "Restored persisted registries"
                );
                self.registries = registries;
                self.dirty = true;
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "Ignoring unreadable persisted registries"),
        }
        match persistence::load_endpoint(self.store.as_ref()).await {
            Ok(endpoint) => self.transport.set_last_endpoint(endpoint),
            Err(err) => warn!(error = %err, "Ignoring unreadable persisted endpoint"),
        }
        match persistence::load_token(self.store.as_ref()).await {
            Ok(token) => self.stored_token = token,
            Err(err) => warn!(error = %err, "Ignoring unreadable persisted token"),
        }
        self.flush().await;
    }

    pub async fn run(mut self) {
        let mut idle_ticker: Option<Interval> = None;
        loop {
            tokio::select! {
                Some(event) = self.transport_events.recv() => {
                    self.on_transport_event(event, &mut idle_ticker).await;
                    // Drain whatever else already arrived into the same batch.
                    while let Ok(event) = self.transport_events.try_recv() {
                        self.on_transport_event(event, &mut idle_ticker).await;
                    }
                }
                request = self.requests.recv() => match request {
                    Some(SessionRequest::Shutdown) | None => break,
                    Some(request) => self.on_request(request),
                },
                _ = next_tick(&mut idle_ticker) => self.on_idle_tick(),
            }
            self.flush().await;
        }

        self.disconnect_requested = true;
        self.transport.disconnect();
        while let Ok(event) = self.transport_events.try_recv() {
            self.on_transport_event(event, &mut idle_ticker).await;
        }
        self.flush().await;
        info!("Sync session stopped");
    }

    async fn on_transport_event(
        &mut self,
        event: TransportEvent,
        idle_ticker: &mut Option<Interval>,
    ) {
        match event {
            TransportEvent::Envelope(envelope) => {
                let now = self.clock.now();
                let events = self.reconciler.apply(&mut self.registries, envelope, now);
                self.dirty = true;
                self.emit(events);
            }
            TransportEvent::Status { status, reason } => {
                if status == ConnectionStatus::Connected {
                    if idle_ticker.is_none() {
                        let start = Instant::now() + self.idle_sweep;
                        let mut ticker = interval_at(start, self.idle_sweep);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        *idle_ticker = Some(ticker);
                    }
                } else {
                    *idle_ticker = None;
                }
                self.on_status(status, reason);
            }
            TransportEvent::Authenticated { endpoint } => {
                if let Some(connection) = self.registries.active_connection_mut() {
                    connection.name = endpoint.name.clone();
                }
                if let Err(err) = persistence::save_endpoint(self.store.as_ref(), &endpoint).await {
                    warn!(error = %err, "Failed to persist endpoint");
                }
                if let Some(token) = self.pending_token.take() {
                    match persistence::save_token(self.store.as_ref(), &token).await {
                        Ok(()) => self.stored_token = Some(token),
                        Err(err) => warn!(error = %err, "Failed to persist auth token"),
                    }
                }
            }
            TransportEvent::AuthRejected { reason } => {
                self.pending_token = None;
                if self.stored_token.take().is_some() {
                    info!(reason = %reason, "Forgetting rejected auth token");
                }
                if let Err(err) = persistence::clear_token(self.store.as_ref()).await {
                    warn!(error = %err, "Failed to clear persisted auth token");
                }
            }
        }
    }

    fn on_status(&mut self, status: ConnectionStatus, reason: Option<String>) {
        let now = self.clock.now();
        let disconnect_requested = self.disconnect_requested;
        let Some(connection) = self.registries.active_connection_mut() else {
            debug!(status = %status, "Status change without an active connection");
            return;
        };
        let previous = connection.status;
        connection.status = status;
        if status == ConnectionStatus::Connected {
            connection.last_connected = Some(now);
        } else if previous == ConnectionStatus::Connected {
            connection.last_disconnected = Some(now);
        }
        let connection_id = connection.id.clone();
        let name = connection.name.clone();

        if previous == ConnectionStatus::Connected && status != previous && !disconnect_requested {
            let title = format!("Lost connection to {}", name);
            let mut entry = ActivityEntry::new(ActivityType::ConnectionLost, title, now);
            if let Some(reason) = &reason {
                entry = entry.with_description(reason.clone());
            }
            self.registries.activity.push(entry);
        }
        self.dirty = true;
        self.emit(vec![SyncEvent::ConnectionChanged {
            connection_id,
            status,
            reason,
        }]);
    }

    fn on_request(&mut self, request: SessionRequest) {
        match request {
            SessionRequest::Connect {
                endpoint,
                mut credentials,
            } => {
                if credentials.token.is_none() && credentials.connection_code.is_none() {
                    credentials.token = self.stored_token.clone();
                }
                let id = self.registries.ensure_connection(&endpoint.url, &endpoint.name);
                self.registries.active_connection = Some(id);
                self.pending_token = credentials.token.clone();
                self.disconnect_requested = false;
                self.dirty = true;
                self.transport.connect(endpoint, credentials);
            }
            SessionRequest::Disconnect => {
                self.disconnect_requested = true;
                self.transport.disconnect();
            }
            SessionRequest::Reconnect => {
                self.disconnect_requested = false;
                if let Err(err) = self.transport.reconnect() {
                    warn!(error = %err, "Manual reconnect not possible");
                }
            }
            SessionRequest::Foreground => {
                if self.transport.resume_foreground() {
                    self.disconnect_requested = false;
                }
            }
            SessionRequest::Command(command) => self.on_command(command),
            SessionRequest::Shutdown => {}
        }
    }

    fn on_command(&mut self, command: Command) {
        if let Command::RemoveConnection { connection_id } = &command {
            if self.registries.active_connection.as_ref() == Some(connection_id) {
                self.disconnect_requested = true;
                self.transport.disconnect();
            }
        }
        let remote = command.is_remote();
        match self.reconciler.command(&mut self.registries, command) {
            Some(message) => {
                if let Err(err) = self.transport.send(message) {
                    warn!(error = %err, "Command not sent");
                }
            }
            None if !remote => self.dirty = true,
            None => {}
        }
    }

    fn on_idle_tick(&mut self) {
        let alerts = self.idle.sweep(&mut self.registries, self.clock.now());
        if alerts.is_empty() {
            return;
        }
        self.dirty = true;
        self.emit(alerts.into_iter().map(SyncEvent::from).collect());
    }

    fn emit(&self, events: Vec<SyncEvent>) {
        for event in events {
            debug!(event = ?event, "Sync event");
            if let Some(notification) = Notification::from_event(&event) {
                self.notifier.notify(notification);
            }
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }

    /// Publish a snapshot and persist it if anything changed since the last flush.
    async fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        let snapshot = Arc::new(self.registries.clone());
        self.snapshot.send_replace(Arc::clone(&snapshot));
        if let Err(err) = persistence::save_registries(self.store.as_ref(), &snapshot).await {
            warn!(error = %err, "Failed to persist registries");
        }
    }
}
