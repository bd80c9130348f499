//! Socket pumps.
//!
//! Pumps only move bytes between sockets and the reactor. They never touch
//! knock, session or watch state; everything they learn goes through the
//! reactor's event queue.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::AbortHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::codec::LineCodec;
use crate::error::{DeliveryError, FrameError};
use crate::fanout::Deliver;
use crate::knock::KnockPort;
use crate::listener::KnockListener;
use crate::session::ConnId;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum Event {
    /// A connection landed on one of the knock listeners.
    Knock {
        port: KnockPort,
        stream: TcpStream,
        peer: SocketAddr,
    },
    /// One inbound frame from a watched connection.
    Frame {
        conn: ConnId,
        frame: Result<String, FrameError>,
    },
    /// The read side of a watched connection ended.
    Hangup { conn: ConnId },
}

pub fn spawn_accept(knock: KnockListener, events: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        loop {
            match knock.listener.accept().await {
                Ok((stream, peer)) => {
                    let event = Event::Knock {
                        port: knock.port,
                        stream,
                        peer,
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    warn!(port = knock.number, error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    });
}

/// Writes one reply line to a knock connection and closes it.
pub async fn reply_and_close(stream: TcpStream, reply: &'static str, peer: SocketAddr) {
    let mut framed = FramedWrite::new(stream, LineCodec::new());
    if let Err(err) = framed.send(reply).await {
        debug!(peer = %peer, error = %err, "knock reply not delivered");
    }
    let _ = framed.get_mut().shutdown().await;
}

/// An admitted connection. Dropping it stops the read pump and lets the
/// write pump flush and close the socket.
#[derive(Debug)]
struct Slot {
    peer: SocketAddr,
    outbox: mpsc::Sender<String>,
    reader: AbortHandle,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Every admitted connection, pending or identified. The listeners are
/// watched by their accept pumps and never appear here.
#[derive(Debug)]
pub struct ReactorSet {
    slots: HashMap<ConnId, Slot>,
    next_id: u64,
    max_frame: usize,
    outbox_lines: usize,
    events: mpsc::Sender<Event>,
}

impl ReactorSet {
    pub fn new(max_frame: usize, outbox_lines: usize, events: mpsc::Sender<Event>) -> Self {
        Self {
            slots: HashMap::new(),
            next_id: 1,
            max_frame,
            outbox_lines: outbox_lines.max(1),
            events,
        }
    }

    /// Starts pumping `stream` and returns its handle.
    pub fn watch(&mut self, stream: TcpStream, peer: SocketAddr) -> ConnId {
        let conn = ConnId(self.next_id);
        self.next_id += 1;

        let (rd, wr) = stream.into_split();
        let (outbox, rx) = mpsc::channel(self.outbox_lines);

        let frames = FramedRead::new(rd, LineCodec::with_max_frame(self.max_frame));
        let reader = tokio::spawn(read_pump(conn, frames, self.events.clone())).abort_handle();
        tokio::spawn(write_pump(conn, FramedWrite::new(wr, LineCodec::new()), rx));

        self.slots.insert(
            conn,
            Slot {
                peer,
                outbox,
                reader,
            },
        );
        conn
    }

    /// Stops watching `conn` and closes it. Returns false if it was not watched.
    pub fn unwatch(&mut self, conn: ConnId) -> bool {
        self.slots.remove(&conn).is_some()
    }

    pub fn contains(&self, conn: ConnId) -> bool {
        self.slots.contains_key(&conn)
    }

    pub fn peer(&self, conn: ConnId) -> Option<SocketAddr> {
        self.slots.get(&conn).map(|s| s.peer)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

impl Deliver for ReactorSet {
    fn deliver(&mut self, conn: ConnId, line: String) -> Result<(), DeliveryError> {
        let slot = self.slots.get(&conn).ok_or(DeliveryError::NotWatched(conn))?;
        // a peer that stops reading fills its own queue and nobody else's
        slot.outbox.try_send(line).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::Backlogged(conn),
            TrySendError::Closed(_) => DeliveryError::Closed(conn),
        })
    }
}

async fn read_pump(
    conn: ConnId,
    mut frames: FramedRead<OwnedReadHalf, LineCodec>,
    events: mpsc::Sender<Event>,
) {
    while let Some(item) = frames.next().await {
        match item {
            Ok(frame) => {
                if events.send(Event::Frame { conn, frame }).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                debug!(conn = %conn, error = %err, "read failed");
                break;
            }
        }
    }
    let _ = events.send(Event::Hangup { conn }).await;
}

async fn write_pump(
    conn: ConnId,
    mut sink: FramedWrite<OwnedWriteHalf, LineCodec>,
    mut outbox: mpsc::Receiver<String>,
) {
    while let Some(line) = outbox.recv().await {
        if let Err(err) = sink.send(line).await {
            warn!(conn = %conn, error = %err, "write failed");
            return;
        }
    }
    // outbox dropped: the connection was unwatched
    let _ = sink.get_mut().shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (server, client, peer)
    }

    #[tokio::test]
    async fn frames_and_hangup_reach_the_queue() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut set = ReactorSet::new(64, 16, tx);
        let (server, mut client, peer) = pair().await;

        let conn = set.watch(server, peer);
        assert_eq!(set.peer(conn), Some(peer));

        client.write_all(b"WHO\n").await.unwrap();
        match rx.recv().await.unwrap() {
            Event::Frame { conn: c, frame } => {
                assert_eq!(c, conn);
                assert_eq!(frame, Ok("WHO".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }

        drop(client);
        assert!(matches!(rx.recv().await.unwrap(), Event::Hangup { conn: c } if c == conn));
    }

    #[tokio::test]
    async fn deliver_writes_lines_and_unwatch_closes() {
        let (tx, _rx) = mpsc::channel(8);
        let mut set = ReactorSet::new(64, 16, tx);
        let (server, client, peer) = pair().await;
        let conn = set.watch(server, peer);

        set.deliver(conn, "SUCCESS".into()).unwrap();
        set.deliver(conn, "alice bob".into()).unwrap();
        assert!(set.unwatch(conn));
        assert_eq!(set.len(), 0);

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("SUCCESS"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("alice bob"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn full_outbox_reports_backlog() {
        let (tx, _rx) = mpsc::channel(8);
        let mut set = ReactorSet::new(64, 4, tx);
        let (server, client, peer) = pair().await;
        let conn = set.watch(server, peer);

        // nothing yields in between, so the write pump drains none of these
        for n in 0..4 {
            set.deliver(conn, format!("line {n}")).unwrap();
        }
        assert_eq!(
            set.deliver(conn, "one too many".into()),
            Err(DeliveryError::Backlogged(conn))
        );

        // queued lines still go out once the pump runs
        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("line 0"));
        assert!(set.unwatch(conn));
        for n in 1..4 {
            assert_eq!(lines.next_line().await.unwrap(), Some(format!("line {n}")));
        }
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn deliver_to_unwatched_fails() {
        let (tx, _rx) = mpsc::channel(8);
        let mut set = ReactorSet::new(64, 16, tx);
        assert_eq!(
            set.deliver(ConnId(7), "x".into()),
            Err(DeliveryError::NotWatched(ConnId(7)))
        );
    }

    #[tokio::test]
    async fn reply_and_close_sends_one_line() {
        let (server, client, peer) = pair().await;
        reply_and_close(server, "KNOCK FAIL", peer).await;

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("KNOCK FAIL"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}
