//! Startup: find three consecutive free ports and listen on them.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::timeout;
use tracing::debug;

use crate::config::ListenConfig;
use crate::error::ServerError;
use crate::knock::KnockPort;

/// One of the three knock listeners.
#[derive(Debug)]
pub struct KnockListener {
    pub port: KnockPort,
    pub number: u16,
    pub addr: SocketAddr,
    pub listener: TcpListener,
}

/// Scans `port_lower..=port_upper` for three consecutive ports that nothing
/// answers on and binds all three. A triple that fails to bind is skipped.
pub async fn bind_triple(cfg: &ListenConfig) -> Result<[KnockListener; 3], ServerError> {
    let bind_ip = parse_ip(&cfg.bind)?;
    let check_ip = parse_ip(&cfg.check_host)?;

    let (lower, upper) = (cfg.port_lower, cfg.port_upper);
    if lower == 0 || upper < lower.saturating_add(2) {
        return Err(ServerError::BadPortRange { lower, upper });
    }

    for base in lower..=upper - 2 {
        if !triple_free(check_ip, base, cfg.check_timeout()).await {
            continue;
        }

        match bind_at(bind_ip, base, cfg.backlog) {
            Ok(listeners) => return Ok(listeners),
            Err(err) => debug!(base, error = %err, "port triple looked free but did not bind"),
        }
    }

    Err(ServerError::NoFreePorts { lower, upper })
}

fn parse_ip(raw: &str) -> Result<IpAddr, ServerError> {
    raw.parse().map_err(|_| ServerError::BadAddress(raw.to_string()))
}

/// A port is free when a local connect to it fails or times out.
async fn port_free(ip: IpAddr, port: u16, check_timeout: Duration) -> bool {
    !matches!(
        timeout(check_timeout, TcpStream::connect((ip, port))).await,
        Ok(Ok(_))
    )
}

async fn triple_free(ip: IpAddr, base: u16, check_timeout: Duration) -> bool {
    for offset in 0..3 {
        if !port_free(ip, base + offset, check_timeout).await {
            return false;
        }
    }
    true
}

fn bind_at(ip: IpAddr, base: u16, backlog: u32) -> io::Result<[KnockListener; 3]> {
    Ok([
        bind_one(ip, base, KnockPort::A, backlog)?,
        bind_one(ip, base + 1, KnockPort::B, backlog)?,
        bind_one(ip, base + 2, KnockPort::C, backlog)?,
    ])
}

fn bind_one(ip: IpAddr, number: u16, port: KnockPort, backlog: u32) -> io::Result<KnockListener> {
    let socket = if ip.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::new(ip, number))?;

    let listener = socket.listen(backlog)?;
    Ok(KnockListener {
        port,
        number,
        addr: listener.local_addr()?,
        listener,
    })
}
