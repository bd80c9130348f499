use tracing::{debug, info};

use crate::error::CommandError;
use crate::fanout::{self, Deliver, send_or_log};
use crate::identity::Identity;
use crate::protocol::{Command, FAIL, SUCCESS, parse_command};
use crate::session::{ConnId, SessionTable};

/// Chat state shared by every connection. Owned by the reactor.
#[derive(Debug)]
pub struct RelayState {
    pub sessions: SessionTable,
    pub identity: Identity,
    /// Answer bad commands instead of dropping them.
    pub reply_errors: bool,
}

impl RelayState {
    pub fn new(initials: &str, reply_errors: bool) -> Self {
        Self {
            sessions: SessionTable::new(),
            identity: Identity::generate(initials),
            reply_errors,
        }
    }
}

/// What the reactor should do with the connection afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Handles one frame from `conn`.
pub fn dispatch<D: Deliver>(state: &mut RelayState, out: &mut D, conn: ConnId, line: &str) -> Flow {
    if line.trim().is_empty() {
        return Flow::Continue;
    }

    let cmd = match parse_command(line) {
        Ok(c) => c,
        Err(e) => {
            reject(state, out, conn, e);
            return Flow::Continue;
        }
    };

    handle_command(state, out, conn, cmd).unwrap_or_else(|e| {
        reject(state, out, conn, e);
        Flow::Continue
    })
}

fn handle_command<D: Deliver>(
    state: &mut RelayState,
    out: &mut D,
    conn: ConnId,
    cmd: Command,
) -> Result<Flow, CommandError> {
    match cmd {
        Command::Connect(name) => match state.sessions.connect(&name, conn) {
            Ok(session) => {
                info!(conn = %conn, name = %session.name, "session connected");
                send_or_log(out, conn, SUCCESS.to_string());
            }
            Err(e) => {
                debug!(conn = %conn, error = %e, "connect refused");
                send_or_log(out, conn, FAIL.to_string());
            }
        },

        Command::Id => {
            send_or_log(out, conn, state.identity.as_str().to_string());
        }

        Command::ChangeId(initials) => {
            state.identity.regenerate(&initials);
            info!(conn = %conn, id = %state.identity.as_str(), "identity changed");
        }

        Command::Who => {
            send_or_log(out, conn, state.sessions.who());
        }

        Command::MsgAll(text) => {
            if state.sessions.by_conn(conn).is_none() {
                return Err(CommandError::NotIdentified);
            }
            let reached = fanout::broadcast(&state.sessions, out, conn, &text);
            debug!(conn = %conn, reached, "broadcast");
        }

        Command::Msg { to, text } => {
            fanout::direct(&state.sessions, out, conn, &to, &text)?;
        }

        Command::Recv => {
            if !state.sessions.set_receiving(conn) {
                return Err(CommandError::NotIdentified);
            }
        }

        Command::Leave => {
            if let Some(session) = state.sessions.remove(conn) {
                info!(conn = %conn, name = %session.name, "session left");
            }
            return Ok(Flow::Close);
        }
    }

    Ok(Flow::Continue)
}

fn reject<D: Deliver>(state: &RelayState, out: &mut D, conn: ConnId, err: CommandError) {
    debug!(conn = %conn, error = %err, "command rejected");
    if !state.reply_errors {
        return;
    }

    let reply = match err {
        CommandError::TargetNotFound(_) => FAIL.to_string(),
        other => format!("ERROR {other}"),
    };
    send_or_log(out, conn, reply);
}
