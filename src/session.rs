use std::fmt;

use crate::error::SessionError;

/// Handle for one admitted connection. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Target word of `MSG ALL`, so no session may carry it as a name.
pub const BROADCAST_TARGET: &str = "ALL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub name: String,
    pub conn: ConnId,
    pub receiving: bool,
}

/// Named sessions in creation order. `WHO` lists them in that order.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: Vec<Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `conn` under `name`. New sessions start not receiving.
    pub fn connect(&mut self, name: &str, conn: ConnId) -> Result<&Session, SessionError> {
        if name.is_empty() {
            return Err(SessionError::EmptyName);
        }
        if name.chars().any(char::is_whitespace) {
            return Err(SessionError::Whitespace);
        }
        if name == BROADCAST_TARGET {
            return Err(SessionError::Reserved(name.to_string()));
        }
        if let Some(existing) = self.by_conn(conn) {
            return Err(SessionError::AlreadyIdentified(existing.name.clone()));
        }
        if self.contains(name) {
            return Err(SessionError::NameTaken(name.to_string()));
        }

        self.sessions.push(Session {
            name: name.to_string(),
            conn,
            receiving: false,
        });
        Ok(&self.sessions[self.sessions.len() - 1])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name(name).is_some()
    }

    pub fn by_name(&self, name: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.name == name)
    }

    pub fn by_conn(&self, conn: ConnId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.conn == conn)
    }

    /// Marks the session on `conn` as receiving broadcasts. Returns false if
    /// `conn` has no session.
    pub fn set_receiving(&mut self, conn: ConnId) -> bool {
        match self.sessions.iter_mut().find(|s| s.conn == conn) {
            Some(s) => {
                s.receiving = true;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, conn: ConnId) -> Option<Session> {
        let idx = self.sessions.iter().position(|s| s.conn == conn)?;
        Some(self.sessions.remove(idx))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sessions.iter().map(|s| s.name.as_str())
    }

    /// Space-joined names, the `WHO` reply.
    pub fn who(&self) -> String {
        self.names().collect::<Vec<_>>().join(" ")
    }

    /// Sessions that should get a broadcast from `sender`.
    pub fn broadcast_targets(&self, sender: ConnId) -> impl Iterator<Item = &Session> {
        self.sessions
            .iter()
            .filter(move |s| s.receiving && s.conn != sender)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
