//! Session registry for connected watchers
//!
//! Every watcher connection gets a [`Session`] with a fresh id. The session's
//! receive loop stores the latest snapshot of each folder the watcher
//! reported; queries merge the snapshots of all live sessions.
//!
//! # Locking Order
//!
//! 1. `SessionRegistry::inner` (RwLock) - membership only
//! 2. `Session::state` (RwLock) - snapshot and error counter
//!
//! Queries take both shared, in that order. A session's receive loop only
//! ever takes its own lock, and membership changes only take the registry
//! lock, so the order can't be inverted. No lock is held across an `.await`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use parking_lot::RwLock;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::protocol::{Envelope, Snapshot};

/// Unique identifier for a session, never reused within a process
pub type SessionId = u64;

/// Consecutive transient read errors after which a session is dropped
pub const MAX_CONSECUTIVE_READ_ERRORS: u32 = 3;

/// Mutable per-session state
#[derive(Debug, Default)]
struct SessionState {
    /// Latest snapshot per folder name
    snapshots: HashMap<String, Snapshot>,
    consecutive_read_errors: u32,
}

/// One connected watcher
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: Option<SocketAddr>,
    state: RwLock<SessionState>,
}

impl Session {
    fn new(id: SessionId, peer: Option<SocketAddr>) -> Self {
        Self {
            id,
            peer,
            state: RwLock::new(SessionState::default()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Latest snapshot this session reported for `folder`
    pub fn snapshot(&self, folder: &str) -> Option<Snapshot> {
        self.state.read().snapshots.get(folder).cloned()
    }

    pub fn consecutive_read_errors(&self) -> u32 {
        self.state.read().consecutive_read_errors
    }

    /// Replace the snapshot of the same folder wholesale
    fn replace_snapshot(&self, snapshot: Snapshot) {
        self.state
            .write()
            .snapshots
            .insert(snapshot.name.clone(), snapshot);
    }

    /// Count a transient read error, returning the new streak length
    fn record_read_error(&self) -> u32 {
        let mut state = self.state.write();
        state.consecutive_read_errors += 1;
        state.consecutive_read_errors
    }

    fn reset_read_errors(&self) {
        self.state.write().consecutive_read_errors = 0;
    }
}

/// How a failed read affects the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFailure {
    /// The connection is gone or the peer broke the protocol
    Closed,
    /// Worth retrying; counts toward the error threshold
    Transient,
}

/// Classify a WebSocket read error
pub fn classify_read_error(error: &WsError) -> ReadFailure {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Protocol(_) => {
            ReadFailure::Closed
        }
        WsError::Io(e) => match e.kind() {
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => ReadFailure::Closed,
            _ => ReadFailure::Transient,
        },
        _ => ReadFailure::Transient,
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    sessions: HashMap<SessionId, Arc<Session>>,
    last_id: SessionId,
}

/// All live watcher sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SessionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session with the next id
    pub fn register(&self, peer: Option<SocketAddr>) -> Arc<Session> {
        let mut inner = self.inner.write();
        inner.last_id += 1;

        let session = Arc::new(Session::new(inner.last_id, peer));
        inner.sessions.insert(session.id, Arc::clone(&session));
        session
    }

    /// Remove a session, returning it if it was still registered
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.inner.write().sessions.remove(&id)
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Ids of the live sessions, ascending
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.inner.read().sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Sorted, duplicate-free union of every session's latest snapshot
    pub fn current_files(&self) -> Vec<String> {
        let mut names = Vec::new();

        {
            let inner = self.inner.read();
            for session in inner.sessions.values() {
                let state = session.state.read();
                for snapshot in state.snapshots.values() {
                    names.extend(snapshot.files.iter().cloned());
                }
            }
        }

        names.sort_unstable();
        names.dedup();
        names
    }

    /// Track a session for the lifetime of `frames`.
    ///
    /// Registers the session, runs its receive loop until the connection
    /// ends, then removes it. Returns the id the session had.
    pub async fn accept_session<S>(&self, frames: S, peer: Option<SocketAddr>) -> SessionId
    where
        S: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        let session = self.register(peer);
        let id = session.id();
        tracing::info!("Watcher connected ({}, {:?})", id, peer);

        // Removal must happen however the loop ends
        let _guard = SessionGuard {
            registry: self,
            session: &session,
        };
        receive_messages(&session, frames).await;

        id
    }
}

/// Removes its session from the registry when dropped
struct SessionGuard<'a> {
    registry: &'a SessionRegistry,
    session: &'a Session,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(self.session.id());
        tracing::info!(
            "Watcher disconnected ({}, {:?})",
            self.session.id(),
            self.session.peer()
        );
    }
}

/// Receive loop for one session; returns when the session should end
async fn receive_messages<S>(session: &Session, mut frames: S)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(frame) = frames.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => match classify_read_error(&e) {
                ReadFailure::Closed => {
                    tracing::info!("Connection closed ({}): {}", session.id(), e);
                    return;
                }
                ReadFailure::Transient => {
                    tracing::warn!("Read message error ({}): {}", session.id(), e);
                    if session.record_read_error() >= MAX_CONSECUTIVE_READ_ERRORS {
                        tracing::warn!(
                            "Too many consecutive read errors, killing the connection ({})",
                            session.id()
                        );
                        return;
                    }
                    continue;
                }
            },
        };

        session.reset_read_errors();

        let text = match message {
            Message::Text(text) => text,
            Message::Close(frame) => {
                tracing::info!("Connection closed ({}): {:?}", session.id(), frame);
                return;
            }
            // Keepalive traffic, answered by the protocol layer
            Message::Ping(_) | Message::Pong(_) => continue,
            other => {
                tracing::warn!("Unexpected message type ({}): {:?}", session.id(), other);
                continue;
            }
        };

        match Envelope::from_json(&text) {
            Ok(Envelope::FolderContents(snapshot)) => {
                tracing::debug!(
                    "Session {} reported {} files in '{}'",
                    session.id(),
                    snapshot.files.len(),
                    snapshot.name
                );
                session.replace_snapshot(snapshot);
            }
            Ok(Envelope::Unknown { kind }) => {
                tracing::warn!("Unhandled type of payload ({}): {}", session.id(), kind);
            }
            Err(e) => {
                tracing::warn!("Unable to decode message ({}): {}", session.id(), e);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
