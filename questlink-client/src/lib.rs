//! Questlink sync client.
//!
//! Keeps a local mirror of the agents and quests running behind a remote
//! daemon: a [`transport::Transport`] holds the link, the
//! [`reconciler::Reconciler`] folds inbound envelopes into the
//! [`registry::Registries`], and a [`session::SyncSession`] serializes all of
//! it onto one task.

pub mod config;
pub mod error;
pub mod idle;
pub mod normalizer;
pub mod notifications;
pub mod persistence;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use reconciler::{Command, Reconciler, SyncEvent};
pub use registry::Registries;
pub use session::{SessionHandle, SyncSession};
