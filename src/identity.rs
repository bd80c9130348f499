use chrono::Local;
use rand::{seq::SliceRandom, thread_rng};

const SAYINGS: &[&str] = &[
    "Knock, and it shall be opened.",
    "The middle door is the real one.",
    "Silence is a port left closed.",
    "Every relay begins with a single hop.",
    "Order matters more than speed.",
    "A closed socket tells no tales.",
    "Three taps, one door.",
    "Patience is measured in round trips.",
];

/// The `ID` reply: a saying, the time it was generated and the initials,
/// on one line.
#[derive(Debug, Clone)]
pub struct Identity {
    current: String,
}

impl Identity {
    pub fn generate(initials: &str) -> Self {
        let mut id = Self {
            current: String::new(),
        };
        id.regenerate(initials);
        id
    }

    pub fn regenerate(&mut self, initials: &str) {
        let saying = SAYINGS.choose(&mut thread_rng()).copied().unwrap_or_default();
        let stamp = Local::now().format("%a %b %e %H:%M:%S %Y");

        self.current = format!("{saying} {stamp} {}", one_line(initials));
    }

    pub fn as_str(&self) -> &str {
        &self.current
    }
}

fn one_line(s: &str) -> String {
    s.chars().map(|c| if c.is_control() { ' ' } else { c }).collect()
}
