//! Per-address port knock admission.
//!
//! A source address must hit the three listeners in the order A, C, B
//! within the knock window. Every third knock produces a verdict and
//! resets the address's sequence, so a failed address may simply retry.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// The three listeners, named in ascending order of port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnockPort {
    A,
    B,
    C,
}

impl KnockPort {
    pub const ALL: [KnockPort; 3] = [KnockPort::A, KnockPort::B, KnockPort::C];
}

impl fmt::Display for KnockPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KnockPort::A => "A",
            KnockPort::B => "B",
            KnockPort::C => "C",
        };
        f.write_str(s)
    }
}

/// The only accepted sequence. B, the middle port, is the service port.
pub const ADMIT_SEQUENCE: [KnockPort; 3] = [KnockPort::A, KnockPort::C, KnockPort::B];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not the deciding knock; close without reading.
    Recorded,
    /// Correct sequence; keep the connection.
    Admitted,
    /// Wrong sequence.
    Rejected,
    /// Window exceeded since the first knock of this attempt.
    TimedOut,
}

impl Verdict {
    /// Line sent back on the deciding connection, if any.
    pub fn reply(self) -> Option<&'static str> {
        match self {
            Verdict::Recorded => None,
            Verdict::Admitted => Some("KNOCK SUCCESS"),
            Verdict::Rejected => Some("KNOCK FAIL"),
            Verdict::TimedOut => Some("TIMEOUT FAIL"),
        }
    }
}

#[derive(Debug)]
struct KnockState {
    attempts: Vec<KnockPort>,
    started: Instant,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct KnockTracker {
    window: Duration,
    states: HashMap<IpAddr, KnockState>,
}

impl KnockTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            states: HashMap::new(),
        }
    }

    /// Records a knock from `addr` on `port` at `now` and returns the verdict.
    pub fn knock(&mut self, addr: IpAddr, port: KnockPort, now: Instant) -> Verdict {
        let state = self.states.entry(addr).or_insert_with(|| KnockState {
            attempts: Vec::with_capacity(ADMIT_SEQUENCE.len()),
            started: now,
            last_seen: now,
        });
        state.last_seen = now;

        if state.attempts.is_empty() {
            state.started = now;
        } else if now.saturating_duration_since(state.started) > self.window {
            state.attempts.clear();
            return Verdict::TimedOut;
        }

        state.attempts.push(port);
        if state.attempts.len() < ADMIT_SEQUENCE.len() {
            return Verdict::Recorded;
        }

        let admitted = state.attempts == ADMIT_SEQUENCE;
        state.attempts.clear();

        if admitted {
            Verdict::Admitted
        } else {
            Verdict::Rejected
        }
    }

    /// Number of knocks currently recorded for `addr`.
    #[cfg(test)]
    pub fn pending(&self, addr: &IpAddr) -> usize {
        self.states.get(addr).map_or(0, |s| s.attempts.len())
    }

    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }

    /// Drops records with no knocks in progress that have been idle for
    /// more than twice the window. Returns how many were removed.
    ///
    /// A partial sequence is never dropped: its next knock must still be
    /// answered with [`Verdict::TimedOut`] however late it arrives.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let stale_after = self.window.saturating_mul(2);
        let before = self.states.len();
        self.states.retain(|_, s| {
            !s.attempts.is_empty() || now.saturating_duration_since(s.last_seen) <= stale_after
        });
        before - self.states.len()
    }
}
