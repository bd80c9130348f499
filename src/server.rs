use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::conn::{self, Event, ReactorSet};
use crate::dispatch::{Flow, RelayState, dispatch};
use crate::fanout::send_or_log;
use crate::knock::{KnockTracker, Verdict};
use crate::listener::{self, KnockListener};
use crate::session::ConnId;

const EVENT_QUEUE: usize = 1024;

/// Bound listeners plus configuration, ready to run.
pub struct Server {
    config: Config,
    listeners: [KnockListener; 3],
}

impl Server {
    pub async fn bind(config: Config) -> Result<Self, crate::error::ServerError> {
        let listeners = listener::bind_triple(&config.listen).await?;
        let [a, b, c] = &listeners;
        info!(
            bind = %a.addr.ip(),
            a = a.number,
            b = b.number,
            c = c.number,
            "listening; knock order is A, C, B"
        );

        Ok(Self { config, listeners })
    }

    /// Port numbers of A, B and C.
    pub fn ports(&self) -> [u16; 3] {
        let [a, b, c] = &self.listeners;
        [a.number, b.number, c.number]
    }

    /// Runs the reactor. Only returns if every event source is gone.
    pub async fn run(self) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        for knock in self.listeners {
            conn::spawn_accept(knock, tx.clone());
        }

        Reactor::new(&self.config, tx).run(rx).await;
    }
}

/// Owns all mutable state. Handles one event at a time, to completion.
struct Reactor {
    knocks: KnockTracker,
    relay: RelayState,
    watched: ReactorSet,
    close_on_hangup: bool,
    sweep_every: Option<Duration>,
}

impl Reactor {
    fn new(config: &Config, events: mpsc::Sender<Event>) -> Self {
        Self {
            knocks: KnockTracker::new(config.knock.window()),
            relay: RelayState::new(&config.protocol.initials, config.protocol.reply_errors),
            watched: ReactorSet::new(
                config.protocol.max_frame,
                config.protocol.outbox_lines,
                events,
            ),
            close_on_hangup: config.protocol.close_on_hangup,
            sweep_every: config.knock.sweep_interval(),
        }
    }

    async fn run(mut self, mut events: mpsc::Receiver<Event>) {
        let sweeping = self.sweep_every.is_some();
        let period = self.sweep_every.unwrap_or(Duration::from_secs(3600));
        // first sweep one period after startup, not immediately
        let mut sweep = time::interval_at(time::Instant::now() + period, period);
        sweep.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },

                _ = sweep.tick(), if sweeping => {
                    let removed = self.knocks.sweep(Instant::now());
                    if removed > 0 {
                        debug!(removed, remaining = self.knocks.len(), "swept stale knock records");
                    }
                }
            }
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Knock { port, stream, peer } => {
                let verdict = self.knocks.knock(peer.ip(), port, Instant::now());
                debug!(peer = %peer, port = %port, ?verdict, "knock");

                match verdict {
                    // not the deciding knock: close without reading
                    Verdict::Recorded => drop(stream),
                    Verdict::Admitted => {
                        let conn = self.watched.watch(stream, peer);
                        info!(peer = %peer, conn = %conn, "knock accepted");
                        if let Some(reply) = verdict.reply() {
                            send_or_log(&mut self.watched, conn, reply.to_string());
                        }
                    }
                    Verdict::Rejected | Verdict::TimedOut => {
                        info!(peer = %peer, ?verdict, "knock refused");
                        if let Some(reply) = verdict.reply() {
                            tokio::spawn(conn::reply_and_close(stream, reply, peer));
                        }
                    }
                }
            }

            Event::Frame { conn, frame } => {
                // queued before the connection was torn down
                if !self.watched.contains(conn) {
                    return;
                }

                match frame {
                    Ok(line) => {
                        if dispatch(&mut self.relay, &mut self.watched, conn, &line) == Flow::Close {
                            self.teardown(conn);
                        }
                    }
                    Err(err) => {
                        warn!(conn = %conn, error = %err, "bad frame");
                        if self.relay.reply_errors {
                            send_or_log(&mut self.watched, conn, format!("ERROR {err}"));
                        }
                    }
                }
            }

            Event::Hangup { conn } => {
                if !self.watched.contains(conn) {
                    return;
                }
                if self.close_on_hangup {
                    debug!(conn = %conn, "peer hung up");
                    self.teardown(conn);
                } else {
                    debug!(conn = %conn, "peer hung up; slot kept until LEAVE");
                }
            }
        }
    }

    fn teardown(&mut self, conn: ConnId) {
        if let Some(session) = self.relay.sessions.remove(conn) {
            info!(conn = %conn, name = %session.name, "session closed");
        }
        let peer = self.watched.peer(conn);
        if self.watched.unwatch(conn) {
            debug!(conn = %conn, peer = ?peer, watched = self.watched.len(), "connection closed");
        }
    }
}
