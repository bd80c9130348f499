//! Broadcast and private delivery between sessions.

use tracing::warn;

use crate::error::{CommandError, DeliveryError};
use crate::session::{ConnId, SessionTable};

/// Queues a line for a watched connection.
pub trait Deliver {
    fn deliver(&mut self, conn: ConnId, line: String) -> Result<(), DeliveryError>;
}

/// Delivers and logs a failure. Delivery failures never abort dispatch.
pub fn send_or_log<D: Deliver>(out: &mut D, conn: ConnId, line: String) -> bool {
    match out.deliver(conn, line) {
        Ok(()) => true,
        Err(err) => {
            warn!(conn = %conn, error = %err, "delivery failed");
            false
        }
    }
}

/// Sends `<sender>: <text>` to every receiving session except the sender.
/// Returns the number of sessions reached.
pub fn broadcast<D: Deliver>(sessions: &SessionTable, out: &mut D, sender: ConnId, text: &str) -> usize {
    let Some(from) = sessions.by_conn(sender) else {
        return 0;
    };
    let line = format!("{}: {}", from.name, text);

    let mut reached = 0;
    for target in sessions.broadcast_targets(sender) {
        if send_or_log(out, target.conn, line.clone()) {
            reached += 1;
        }
    }
    reached
}

/// Sends `<PRIVATE> <sender>: <text>` to the session named `target`.
pub fn direct<D: Deliver>(
    sessions: &SessionTable,
    out: &mut D,
    sender: ConnId,
    target: &str,
    text: &str,
) -> Result<(), CommandError> {
    let from = sessions.by_conn(sender).ok_or(CommandError::NotIdentified)?;
    let to = sessions
        .by_name(target)
        .ok_or_else(|| CommandError::TargetNotFound(target.to_string()))?;

    send_or_log(out, to.conn, format!("<PRIVATE> {}: {}", from.name, text));
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::Recorder;
    use super::*;

    fn table() -> SessionTable {
        let mut t = SessionTable::new();
        t.connect("alice", ConnId(1)).unwrap();
        t.connect("bob", ConnId(2)).unwrap();
        t.connect("carol", ConnId(3)).unwrap();
        t
    }

    #[test]
    fn broadcast_reaches_receivers_once_and_never_sender() {
        let mut t = table();
        for c in 1..=3 {
            t.set_receiving(ConnId(c));
        }
        let mut out = Recorder::default();

        assert_eq!(broadcast(&t, &mut out, ConnId(1), "hi all"), 2);
        assert!(out.to(ConnId(1)).is_empty());
        assert_eq!(out.to(ConnId(2)), vec!["alice: hi all"]);
        assert_eq!(out.to(ConnId(3)), vec!["alice: hi all"]);
    }

    #[test]
    fn broadcast_skips_non_receiving() {
        let mut t = table();
        t.set_receiving(ConnId(3));
        let mut out = Recorder::default();

        // bob is not receiving but may still send
        assert_eq!(broadcast(&t, &mut out, ConnId(2), "x"), 1);
        assert_eq!(out.sent, vec![(ConnId(3), "bob: x".to_string())]);
    }

    #[test]
    fn broadcast_survives_a_dead_peer() {
        let mut t = table();
        for c in 1..=3 {
            t.set_receiving(ConnId(c));
        }
        let mut out = Recorder::default();
        out.closed.insert(ConnId(2));

        assert_eq!(broadcast(&t, &mut out, ConnId(1), "still here"), 1);
        assert_eq!(out.to(ConnId(3)), vec!["alice: still here"]);
    }

    #[test]
    fn direct_ignores_receiving_flag() {
        let t = table();
        let mut out = Recorder::default();
        direct(&t, &mut out, ConnId(1), "bob", "psst hey").unwrap();
        assert_eq!(out.to(ConnId(2)), vec!["<PRIVATE> alice: psst hey"]);
    }

    #[test]
    fn direct_to_missing_user_delivers_nothing() {
        let t = table();
        let mut out = Recorder::default();
        assert_eq!(
            direct(&t, &mut out, ConnId(1), "mallory", "hi"),
            Err(CommandError::TargetNotFound("mallory".into()))
        );
        assert!(out.sent.is_empty());
    }

    #[test]
    fn unidentified_sender_cannot_message() {
        let t = table();
        let mut out = Recorder::default();
        assert_eq!(
            direct(&t, &mut out, ConnId(42), "bob", "hi"),
            Err(CommandError::NotIdentified)
        );
        assert_eq!(broadcast(&t, &mut out, ConnId(42), "hi"), 0);
        assert!(out.sent.is_empty());
    }
}
