//! Port-knock gated chat relay.
//!
//! The server listens on three consecutive ports, A < B < C. A client is
//! admitted after connecting to them in the order A, C, B within the knock
//! window; the deciding connection on B stays open and speaks a
//! newline-delimited text protocol (`CONNECT`, `WHO`, `MSG`, ...).
//!
//! All state lives in one reactor loop on a single-threaded runtime.
//! Socket pumps feed it events and never share state with each other.

pub mod codec;
pub mod config;
pub mod conn;
pub mod dispatch;
pub mod error;
pub mod fanout;
pub mod identity;
pub mod knock;
pub mod listener;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod session;

pub use config::Config;
pub use error::ServerError;
pub use server::Server;
