use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Startup failures. These are the only errors that stop the process.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no three consecutive free ports in {lower}..={upper}")]
    NoFreePorts { lower: u16, upper: u16 },

    #[error("invalid address '{0}'")]
    BadAddress(String),

    #[error("invalid port range {lower}..={upper}")]
    BadPortRange { lower: u16, upper: u16 },

    #[error("failed to read config {}: {source}", .path.display())]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("failed to parse config {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Recoverable problems with a single inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },

    #[error("truncated frame: {0} bytes before eof")]
    Truncated(usize),

    #[error("frame is not valid utf-8")]
    InvalidUtf8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("usage: {0}")]
    Malformed(&'static str),

    #[error("identify first: CONNECT <name>")]
    NotIdentified,

    #[error("no such user: {0}")]
    TargetNotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("name is empty")]
    EmptyName,

    #[error("name '{0}' is reserved")]
    Reserved(String),

    #[error("name must not contain whitespace")]
    Whitespace,

    #[error("name '{0}' is taken")]
    NameTaken(String),

    #[error("connection is already identified as '{0}'")]
    AlreadyIdentified(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("connection {0} is not watched")]
    NotWatched(crate::session::ConnId),

    #[error("connection {0} is not reading; outbox full")]
    Backlogged(crate::session::ConnId),

    #[error("connection {0} is closed")]
    Closed(crate::session::ConnId),
}
