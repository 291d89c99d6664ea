//! Questlink headless mirror.
//!
//! Connects to the configured daemon, keeps the local registries in sync and
//! logs every sync event until Ctrl-C.

use questlink_client::config::ClientConfig;
use questlink_client::error::ClientError;
use questlink_client::notifications::LogNotifier;
use questlink_client::persistence::FileStore;
use questlink_client::telemetry;
use questlink_client::transport::{Credentials, Endpoint, WsConnector};
use questlink_client::{SyncEvent, SyncSession};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    telemetry::init_tracing();
    let config = ClientConfig::load()?;
    info!(
        endpoint = %config.endpoint.url,
        state_path = %config.state_path.display(),
        "Starting questlink"
    );

    let store = Arc::new(FileStore::new(config.state_path.clone()));
    let (mut session, handle) = SyncSession::new(
        &config,
        Arc::new(WsConnector::default()),
        store,
        Arc::new(LogNotifier),
    );
    session.restore().await;

    let mut events = handle.subscribe_events();
    let session_task = tokio::spawn(session.run());
    handle
        .connect(Endpoint::from(&config.endpoint), Credentials::from(&config.auth))
        .await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.disconnect().await?;
    handle.shutdown().await?;
    if let Err(err) = session_task.await {
        warn!(error = %err, "Session task ended abnormally");
    }
    let snapshot = handle.snapshot();
    info!(
        agents = snapshot.agents.len(),
        quests = snapshot.quests.len(),
        unread = snapshot.unread_activity_count(),
        "Stopped"
    );
    Ok(())
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::ConnectionChanged { status, reason, .. } => {
            info!(status = %status, reason = ?reason, "Connection status")
        }
        SyncEvent::LevelUp {
            agent_id,
            levels_gained,
            new_level,
        } => info!(agent_id = %agent_id, levels_gained, new_level, "Level up"),
        other => info!(event = ?other, "Sync event"),
    }
}
