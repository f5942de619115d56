//! Line-delimited JSON transport over TCP.
//!
//! Each accepted socket becomes one gateway session served by two threads:
//!
//! - the reader (the connection thread) decodes one `ClientCommand` per line
//!   and invokes it on the gateway. A malformed or rejected command is logged
//!   and skipped; the session stays open;
//! - the writer drains the session's outbound queue and writes one
//!   `ServerEvent` per line. It exits when the queue closes (after disconnect)
//!   or a write fails, in which case it shuts the socket down so the reader
//!   notices as well.
//!
//! EOF or a read error on the socket disconnects the session.

use crossbeam_channel::Receiver;
use depth_common::Result;
use depth_common::command::{ClientCommand, ServerEvent};
use log::{debug, error, info, warn};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::gateway::SessionGateway;

/// TCP endpoint that feeds accepted sockets into a `SessionGateway`.
pub struct TcpSessionServer {
    listener: TcpListener,
    gateway: Arc<SessionGateway>,
}

impl TcpSessionServer {
    /// Bind a new session endpoint to `bind_addr` (e.g., `0.0.0.0:8090`).
    pub fn bind(bind_addr: &str, gateway: Arc<SessionGateway>) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        Ok(Self { listener, gateway })
    }

    /// Address the endpoint is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the accept loop on a background thread.
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        Ok(thread::Builder::new()
            .name("session-accept".to_string())
            .spawn(move || self.accept_loop())?)
    }

    fn accept_loop(self) {
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let gateway = Arc::clone(&self.gateway);
                    let spawned = thread::Builder::new()
                        .name("session".to_string())
                        .spawn(move || {
                            if let Err(e) = serve_connection(stream, gateway) {
                                error!("Session error: {}", e);
                            }
                        });
                    if let Err(e) = spawned {
                        error!("Failed to spawn session thread: {}", e);
                    }
                }
                Err(e) => error!("TCP connection error: {}", e),
            }
        }
    }
}

/// Serves one socket until the peer goes away, then disconnects its session.
fn serve_connection(stream: TcpStream, gateway: Arc<SessionGateway>) -> Result<()> {
    let peer = stream.peer_addr()?;
    stream.set_nodelay(true)?;
    let (id, events) = gateway.on_connect()?;
    info!(
        "Session {} opened for {} ({} open)",
        id,
        peer,
        gateway.connection_count()?
    );

    let writer_stream = stream.try_clone()?;
    let writer = thread::Builder::new()
        .name(format!("session-{}-writer", id))
        .spawn(move || {
            if let Err(e) = handle_client_stream(writer_stream, events) {
                warn!("Stream to {} ended: {}", peer, e);
            }
        })?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                if line.trim().is_empty() {
                    continue;
                }
                match ClientCommand::from_json_line(&line) {
                    Ok(command) => {
                        debug!("Session {} command {:?}", id, command);
                        if let Err(e) = gateway.invoke(id, command) {
                            warn!("Command from session {} failed: {}", id, e);
                        }
                    }
                    Err(e) => warn!("Malformed command from {}: {}", peer, e),
                }
            }
            Err(e) => {
                warn!("Read from {} failed: {}", peer, e);
                break;
            }
        }
    }

    let report = gateway.on_disconnect(id);
    let _ = reader.get_ref().shutdown(Shutdown::Both);
    if writer.join().is_err() {
        error!("Writer for session {} panicked", id);
    }
    let report = report?;
    info!(
        "Session {} closed for {}: {} panels released ({} open)",
        id,
        peer,
        report.panels_released,
        gateway.connection_count()?
    );
    Ok(())
}

/// Writes every queued event to `socket` until the queue closes.
fn handle_client_stream(socket: TcpStream, events: Receiver<ServerEvent>) -> Result<()> {
    let mut writer = BufWriter::new(socket);
    let result = write_events(&mut writer, &events);
    if result.is_err() {
        let _ = writer.get_ref().shutdown(Shutdown::Both);
    }
    result
}

fn write_events<W: Write>(writer: &mut W, events: &Receiver<ServerEvent>) -> Result<()> {
    while let Ok(event) = events.recv() {
        writer.write_all(&event.to_json_line()?)?;
        // Batch whatever is already queued into one flush.
        for event in events.try_iter() {
            writer.write_all(&event.to_json_line()?)?;
        }
        writer.flush()?;
    }
    Ok(())
}
