//! Broadcast registry: named groups of subscriber sessions
//!
//! Each member is represented by the sending half of its session's
//! bounded outbox. Membership lives behind a single reader/writer lock:
//!
//! - `join` / `leave` take the write lock
//! - `broadcast` takes the read lock and only performs `try_send`, so it
//!   never waits on a slow subscriber while holding it
//!
//! Holding the read lock for the whole fan-out gives every broadcast a
//! consistent membership snapshot, and means that once `leave` returns no
//! later broadcast can reach that session.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Opaque handle identifying one subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outcome of a single fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the message was queued for
    pub delivered: usize,
    /// Members whose outbox was full; they miss this message only
    pub dropped: usize,
    /// Members whose session already went away; pruned afterwards
    pub closed: usize,
}

type Members<M> = HashMap<SessionId, mpsc::Sender<M>>;

/// Concurrency-safe mapping from group name to member sessions.
pub struct BroadcastRegistry<M> {
    groups: RwLock<HashMap<String, Members<M>>>,
}

impl<M> Default for BroadcastRegistry<M> {
    fn default() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
        }
    }
}

impl<M: Clone> BroadcastRegistry<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to a group.
    ///
    /// Returns `false` if the session was already a member, in which case
    /// its existing outbox is kept and nothing changes.
    pub fn join(&self, group: &str, session: SessionId, outbox: mpsc::Sender<M>) -> bool {
        let mut groups = self.groups.write();
        let members = groups.entry(group.to_string()).or_default();
        if members.contains_key(&session) {
            return false;
        }
        members.insert(session, outbox);
        tracing::debug!(%group, session_id = %session, members = members.len(), "session joined");
        true
    }

    /// Remove a session from a group. Unknown sessions and groups are a no-op.
    pub fn leave(&self, group: &str, session: SessionId) -> bool {
        let mut groups = self.groups.write();
        let Some(members) = groups.get_mut(group) else {
            return false;
        };
        let removed = members.remove(&session).is_some();
        if members.is_empty() {
            groups.remove(group);
        }
        if removed {
            tracing::debug!(%group, session_id = %session, "session left");
        }
        removed
    }

    /// Queue `message` for every current member of `group`.
    pub fn broadcast(&self, group: &str, message: &M) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut closed = Vec::new();

        {
            let groups = self.groups.read();
            let Some(members) = groups.get(group) else {
                return report;
            };

            for (session, outbox) in members {
                match outbox.try_send(message.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        report.dropped += 1;
                        tracing::warn!(%group, session_id = %session, "subscriber outbox full, dropping message");
                    }
                    Err(TrySendError::Closed(_)) => {
                        report.closed += 1;
                        closed.push(*session);
                    }
                }
            }
        }

        if !closed.is_empty() {
            self.prune(group, &closed);
        }
        report
    }

    /// Drop members whose outbox receiver is gone.
    fn prune(&self, group: &str, sessions: &[SessionId]) {
        let mut groups = self.groups.write();
        let Some(members) = groups.get_mut(group) else {
            return;
        };
        for session in sessions {
            if members.get(session).is_some_and(|tx| tx.is_closed()) {
                members.remove(session);
                tracing::debug!(%group, session_id = %session, "pruned closed session");
            }
        }
        if members.is_empty() {
            groups.remove(group);
        }
    }

    pub fn member_count(&self, group: &str) -> usize {
        self.groups.read().get(group).map_or(0, HashMap::len)
    }

    pub fn contains(&self, group: &str, session: SessionId) -> bool {
        self.groups
            .read()
            .get(group)
            .is_some_and(|members| members.contains_key(&session))
    }

    /// Names of groups that currently have members.
    pub fn groups(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().keys().cloned().collect();
        names.sort();
        names
    }
}
