//! WebSocket connection management
//!
//! Connections are tracked in an explicit id -> record map rather than as
//! fields hung off the transport, so ownership and cleanup-on-close are
//! centralized and the protocol core can be exercised in tests without a
//! real socket.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::messages::{ClientType, OutboundFrame};

/// Opaque per-connection identifier
pub type ConnId = Uuid;

/// Depth of the per-connection diagnostics ring
const TRACE_DEPTH: usize = 10;

/// Items flowing to a connection's socket task
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A protocol frame to serialize and send
    Frame(OutboundFrame),
    /// Close the transport with the given code
    Close { code: u16 },
}

/// One entry of the diagnostics ring
#[derive(Debug, Clone)]
pub struct MessageTrace {
    pub ts: i64,
    pub kind: String,
    pub request_id: Option<String>,
}

/// Per-connection record
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Channel for sending frames to this connection's socket task
    pub sender: mpsc::UnboundedSender<Outbound>,

    /// When this connection was established (Unix timestamp ms)
    pub connected_at: i64,

    /// Assigned at registration, absent before
    pub client_id: Option<String>,

    pub name: String,
    pub version: String,
    pub client_type: ClientType,
    pub registered: bool,

    /// Authenticated user, when the upgrade carried a valid token
    pub auth_user: Option<String>,

    /// Ring of the last messages seen on this connection
    trace: VecDeque<MessageTrace>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::UnboundedSender<Outbound>, auth_user: Option<String>) -> Self {
        Self {
            sender,
            connected_at: chrono::Utc::now().timestamp_millis(),
            client_id: None,
            name: String::new(),
            version: String::new(),
            client_type: ClientType::Other,
            registered: false,
            auth_user,
            trace: VecDeque::with_capacity(TRACE_DEPTH),
        }
    }

    /// Record one inbound message in the diagnostics ring
    pub fn record(&mut self, kind: &str, request_id: Option<&str>) {
        if self.trace.len() == TRACE_DEPTH {
            self.trace.pop_front();
        }
        self.trace.push_back(MessageTrace {
            ts: chrono::Utc::now().timestamp_millis(),
            kind: kind.to_string(),
            request_id: request_id.map(String::from),
        });
    }

    pub fn trace(&self) -> Vec<MessageTrace> {
        self.trace.iter().cloned().collect()
    }

    /// Send a frame; must no-op (not panic) on a closed transport
    pub fn send(&self, frame: OutboundFrame) -> Result<(), SendError> {
        self.sender
            .send(Outbound::Frame(frame))
            .map_err(|_| SendError::ConnectionClosed)
    }

    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Manages all live connections
///
/// Uses DashMap for concurrent access without explicit locking; wrapped in
/// Arc for cheap cloning into socket tasks.
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    conns: Arc<DashMap<ConnId, ConnectionHandle>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection, returning its id
    pub fn add(&self, sender: mpsc::UnboundedSender<Outbound>, auth_user: Option<String>) -> ConnId {
        let conn_id = Uuid::new_v4();
        self.conns
            .insert(conn_id, ConnectionHandle::new(sender, auth_user));
        tracing::debug!(conn_id = %conn_id, total = self.conns.len(), "Connection added");
        conn_id
    }

    /// Remove a connection, returning its final record
    pub fn remove(&self, conn_id: ConnId) -> Option<ConnectionHandle> {
        let removed = self.conns.remove(&conn_id).map(|(_, handle)| handle);
        if removed.is_some() {
            tracing::debug!(conn_id = %conn_id, total = self.conns.len(), "Connection removed");
        }
        removed
    }

    pub fn contains(&self, conn_id: ConnId) -> bool {
        self.conns.contains_key(&conn_id)
    }

    pub fn is_registered(&self, conn_id: ConnId) -> bool {
        self.conns
            .get(&conn_id)
            .map(|h| h.registered)
            .unwrap_or(false)
    }

    /// Promote a connection to registered, storing its identity
    pub fn mark_registered(
        &self,
        conn_id: ConnId,
        client_id: String,
        name: String,
        version: String,
        client_type: ClientType,
    ) -> bool {
        match self.conns.get_mut(&conn_id) {
            Some(mut handle) => {
                handle.client_id = Some(client_id);
                handle.name = name;
                handle.version = version;
                handle.client_type = client_type;
                handle.registered = true;
                true
            }
            None => false,
        }
    }

    /// Record one inbound message in the connection's diagnostics ring
    pub fn record_message(&self, conn_id: ConnId, kind: &str, request_id: Option<&str>) {
        if let Some(mut handle) = self.conns.get_mut(&conn_id) {
            handle.record(kind, request_id);
        }
    }

    pub fn trace(&self, conn_id: ConnId) -> Vec<MessageTrace> {
        self.conns
            .get(&conn_id)
            .map(|h| h.trace())
            .unwrap_or_default()
    }

    pub fn auth_user(&self, conn_id: ConnId) -> Option<String> {
        self.conns.get(&conn_id).and_then(|h| h.auth_user.clone())
    }

    /// Send a frame to one connection
    pub fn send_to(&self, conn_id: ConnId, frame: OutboundFrame) -> Result<(), SendError> {
        let handle = self.conns.get(&conn_id).ok_or(SendError::NotFound)?;
        handle.send(frame)
    }

    /// Ask one connection's socket task to close the transport
    pub fn close_with_code(&self, conn_id: ConnId, code: u16) {
        if let Some(handle) = self.conns.get(&conn_id) {
            let _ = handle.sender.send(Outbound::Close { code });
        }
    }

    /// Send a frame to every connection the predicate accepts; returns the
    /// number of successful sends
    pub fn broadcast_filtered(
        &self,
        frame: &OutboundFrame,
        mut accept: impl FnMut(ConnId) -> bool,
    ) -> usize {
        let mut sent = 0;
        for entry in self.conns.iter() {
            if accept(*entry.key()) && entry.value().send(frame.clone()).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    /// Ids of all live connections
    pub fn ids(&self) -> Vec<ConnId> {
        self.conns.iter().map(|e| *e.key()).collect()
    }

    pub fn total(&self) -> usize {
        self.conns.len()
    }
}

/// Error type for send operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    NotFound,
    ConnectionClosed,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::NotFound => write!(f, "connection not found"),
            SendError::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for SendError {}
