//! Internet reachability over the modem link.
//!
//! The check returns its answer instead of recording it anywhere; callers
//! branch on the value.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::clock::{poll_until, Clock};

/// Resolve `target` (`host:port`, optionally URL-prefixed) and attempt a TCP
/// connection to each address within `timeout`.
pub fn check_tcp_reachable(target: &str, timeout: Duration) -> bool {
    let host = extract_host(target);
    if host.is_empty() {
        return false;
    }
    let addrs = match host.to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::debug!(host = %host, error = %e, "cannot resolve");
            return false;
        }
    };
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return true,
            Err(e) => tracing::debug!(%addr, error = %e, "connect failed"),
        }
    }
    false
}

/// Retry [`check_tcp_reachable`] up to `attempts` times, `interval` apart.
pub fn wait_for_connection(
    target: &str,
    attempts: u32,
    timeout: Duration,
    interval: Duration,
    clock: &dyn Clock,
) -> bool {
    tracing::info!(host = target, "waiting for internet connection");
    let connected = poll_until(clock, attempts, interval, |attempt| {
        let ok = check_tcp_reachable(target, timeout);
        if !ok {
            tracing::debug!(attempt, attempts, "no internet connection");
        }
        ok
    });
    match connected {
        Some(attempt) => {
            tracing::info!(attempt, "connected to the internet");
            true
        }
        None => {
            tracing::info!(attempts, "no connection to internet");
            false
        }
    }
}

/// Extract host:port, stripping `tcp://`, `http://` or `https://` and any path.
fn extract_host(target: &str) -> String {
    let stripped = target
        .trim()
        .trim_start_matches("tcp://")
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    stripped.split('/').next().unwrap_or("").to_string()
}
