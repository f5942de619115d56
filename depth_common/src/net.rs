//! Shared networking constants and helpers used by client and server.

/// TCP port of the session endpoint (commands in, events out).
pub const SESSION_PORT: u16 = 8090;

/// Helper to format an IPv4 address with a port like "ip:port".
pub fn addr(ip: &str, port: u16) -> String {
    format!("{}:{}", ip, port)
}
