//! Scripted in-memory connector for transport and session tests.

use super::{Connector, Frame, Socket};
use async_trait::async_trait;
use questlink_core::TransportError;
use questlink_protocol::{decode, Envelope};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Accepts one queued socket per attempt, refusing once the queue is empty.
pub(crate) struct FakeConnector {
    attempts: AtomicU32,
    sockets: Mutex<VecDeque<FakeSocket>>,
}

impl FakeConnector {
    pub(crate) fn refusing() -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicU32::new(0),
            sockets: Mutex::new(VecDeque::new()),
        })
    }

    /// A connector that will accept `count` connections, plus the daemon side of each.
    pub(crate) fn accepting(count: usize) -> (Arc<Self>, Vec<FakePeer>) {
        let mut sockets = VecDeque::new();
        let mut peers = Vec::new();
        for _ in 0..count {
            let (to_client, incoming) = mpsc::unbounded_channel();
            let (sent, from_client) = mpsc::unbounded_channel();
            sockets.push_back(FakeSocket { incoming, sent });
            peers.push(FakePeer {
                to_client,
                from_client,
            });
        }
        let connector = Arc::new(Self {
            attempts: AtomicU32::new(0),
            sockets: Mutex::new(sockets),
        });
        (connector, peers)
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Socket>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.sockets.lock().unwrap().pop_front();
        match next {
            Some(socket) => Ok(Box::new(socket)),
            None => Err(TransportError::Refused {
                endpoint: url.to_string(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

pub(crate) struct FakeSocket {
    incoming: mpsc::UnboundedReceiver<Frame>,
    sent: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Socket for FakeSocket {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.sent.send(text).map_err(|_| TransportError::Closed {
            reason: "peer gone".to_string(),
        })
    }

    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Daemon side of a [`FakeSocket`]. Dropping it ends the client's stream.
pub(crate) struct FakePeer {
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl FakePeer {
    pub(crate) fn send_json(&self, text: &str) {
        let _ = self.to_client.send(Frame::Text(text.to_string()));
    }

    pub(crate) fn close(&self, reason: Option<&str>) {
        let _ = self.to_client.send(Frame::Close(reason.map(str::to_string)));
    }

    pub(crate) async fn next_message(&mut self) -> Envelope {
        let text = self.from_client.recv().await.unwrap();
        decode(&text).unwrap()
    }
}
