use std::io;
use thiserror::Error;
use tokio::net::TcpListener;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9108;

/// How many ports above the requested one are tried before falling back to
/// an ephemeral port.
pub const PORT_SCAN_SPAN: u16 = 50;

#[derive(Debug, Error)]
pub enum BindError {
    #[error("invalid bind address {input:?}")]
    InvalidAddress { input: String },

    #[error("failed to bind {host}:{port} (last error: {source})")]
    Exhausted {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
}

/// Split `host:port`, `:port`, `port` or a bare host.
///
/// A missing host means all interfaces; a missing or empty port means 0.
pub fn parse_bind(input: &str) -> Result<(String, u16), BindError> {
    let s = input.trim();
    if s.is_empty() {
        return Ok((DEFAULT_HOST.to_string(), DEFAULT_PORT));
    }

    let invalid = || BindError::InvalidAddress {
        input: input.to_string(),
    };

    if let Some((host, port)) = s.rsplit_once(':') {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let host = if host.is_empty() { DEFAULT_HOST } else { host };
        let port = if port.is_empty() {
            0
        } else {
            port.parse::<u16>().map_err(|_| invalid())?
        };
        return Ok((host.to_string(), port));
    }

    match s.parse::<u16>() {
        Ok(port) => Ok((DEFAULT_HOST.to_string(), port)),
        Err(_) if s.chars().all(|c| c.is_ascii_digit()) => Err(invalid()),
        Err(_) => Ok((s.to_string(), 0)),
    }
}

/// Ports tried, in order, for a requested port.
pub fn candidate_ports(port: u16) -> Vec<u16> {
    if port == 0 {
        return vec![0];
    }
    let last = port.saturating_add(PORT_SCAN_SPAN);
    let mut ports: Vec<u16> = (port..=last).collect();
    ports.push(0);
    ports
}

/// Bind the requested port, or the next free one within the scan span, or
/// finally any free port.
pub async fn bind_with_scan(host: &str, port: u16) -> Result<TcpListener, BindError> {
    let mut last_error = None;

    for candidate in candidate_ports(port) {
        match TcpListener::bind((host, candidate)).await {
            Ok(listener) => {
                if candidate != port {
                    tracing::warn!(host, requested = port, candidate, "requested port busy");
                }
                return Ok(listener);
            }
            Err(e) => {
                tracing::debug!(host, port = candidate, error = %e, "bind failed");
                last_error = Some(e);
            }
        }
    }

    Err(BindError::Exhausted {
        host: host.to_string(),
        port,
        source: last_error.unwrap_or_else(|| io::Error::other("no candidate ports")),
    })
}
