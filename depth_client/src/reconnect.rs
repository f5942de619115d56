//! Session with the depth server that survives connection loss.
//!
//! The client keeps the panels it believes are open in a `SubscriptionTracker`.
//! Every time a connection is (re-)established, every tracked panel is
//! subscribed again from scratch: the server keeps no session state across
//! connections, and `Subscribe` is idempotent. Orders given at startup are sent
//! once, on the first connection that accepts them.
//!
//! Failed attempts back off exponentially from [`INITIAL_BACKOFF`] up to
//! [`MAX_BACKOFF`]; a successful connection resets the delay.
use crossbeam_channel::Sender;
use depth_common::command::{ClientCommand, ServerEvent};
use depth_common::market::PanelId;
use depth_common::tickers::Ticker;
use depth_common::{FeedError, Result};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Delay before the first reconnect attempt.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
/// Upper bound of the reconnect delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(5);
/// How often a blocked read or a backoff sleep re-checks the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Panels the client wants open, keyed by panel id.
#[derive(Debug, Default)]
pub struct SubscriptionTracker {
    panels: BTreeMap<PanelId, Ticker>,
}

impl SubscriptionTracker {
    /// Remembers `panel` as showing `ticker`. Returns the ticker it showed before, if any.
    pub fn track(&mut self, panel: PanelId, ticker: Ticker) -> Option<Ticker> {
        self.panels.insert(panel, ticker)
    }

    /// Stops tracking `panel`.
    pub fn forget(&mut self, panel: &PanelId) -> Option<Ticker> {
        self.panels.remove(panel)
    }

    /// First panel showing `ticker`.
    pub fn panel_for(&self, ticker: &Ticker) -> Option<&PanelId> {
        self.panels
            .iter()
            .find(|(_, t)| *t == ticker)
            .map(|(panel, _)| panel)
    }

    /// Ids of the tracked panels.
    pub fn panels(&self) -> Vec<PanelId> {
        self.panels.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    /// One `Subscribe` per tracked panel, in panel id order.
    pub fn replay(&self) -> impl Iterator<Item = ClientCommand> + '_ {
        self.panels
            .iter()
            .map(|(panel_id, ticker)| ClientCommand::Subscribe {
                panel_id: panel_id.clone(),
                ticker: ticker.clone(),
            })
    }
}

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// Delay to wait now; doubles the following one up to the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    /// Back to the initial delay after a successful connection.
    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

/// Connects to the server, keeps the tracked panels subscribed and forwards
/// every received event to `events`.
pub struct ReconnectingClient {
    server: String,
    tracker: SubscriptionTracker,
    pending_orders: Vec<ClientCommand>,
    backoff: Backoff,
    events: Sender<ServerEvent>,
    shutdown: Arc<AtomicBool>,
}

impl ReconnectingClient {
    pub fn new(
        server: impl Into<String>,
        tracker: SubscriptionTracker,
        backoff: Backoff,
        events: Sender<ServerEvent>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            server: server.into(),
            tracker,
            pending_orders: Vec::new(),
            backoff,
            events,
            shutdown,
        }
    }

    /// Queues an order command for the next connection.
    pub fn place(&mut self, command: ClientCommand) {
        self.pending_orders.push(command);
    }

    /// Runs until the shutdown flag is raised.
    pub fn run(mut self) -> Result<()> {
        while !self.is_shutting_down() {
            match TcpStream::connect(&self.server) {
                Ok(stream) => {
                    info!("Connected to {}", self.server);
                    self.backoff.reset();
                    match self.run_session(stream) {
                        Ok(()) => break,
                        Err(e) => warn!("Session with {} lost: {}", self.server, e),
                    }
                }
                Err(e) => warn!("Connection to {} failed: {}", self.server, e),
            }
            if self.is_shutting_down() {
                break;
            }
            let delay = self.backoff.next_delay();
            info!("Reconnecting to {} in {:?}", self.server, delay);
            self.sleep(delay);
        }
        info!("Client session stopped");
        Ok(())
    }

    /// Serves one connection. Returns `Ok` only on shutdown.
    fn run_session(&mut self, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        let mut writer = BufWriter::new(stream.try_clone()?);

        for command in self.tracker.replay() {
            writer.write_all(&command.to_json_line()?)?;
        }
        for command in &self.pending_orders {
            writer.write_all(&command.to_json_line()?)?;
        }
        writer.flush()?;
        info!(
            "Subscribed {} panels, sent {} orders",
            self.tracker.len(),
            self.pending_orders.len()
        );
        self.pending_orders.clear();

        let mut reader = BufReader::new(stream);
        let mut pending = Vec::new();
        loop {
            if self.is_shutting_down() {
                self.close(&mut writer)?;
                return Ok(());
            }
            match poll_line(&mut reader, &mut pending)? {
                Polled::Line(line) => {
                    if !line.trim().is_empty() {
                        self.forward(&line);
                    }
                }
                Polled::Idle => {}
                Polled::Closed => {
                    return Err(FeedError::Io(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "server closed the session",
                    )));
                }
            }
        }
    }

    fn forward(&self, line: &str) {
        match ServerEvent::from_json_line(line) {
            Ok(event) => {
                if self.events.send(event).is_err() {
                    // Nobody is listening any more.
                    self.shutdown.store(true, Ordering::SeqCst);
                }
            }
            Err(e) => warn!("Malformed event from {}: {}", self.server, e),
        }
    }

    /// Closes every tracked panel and the connection.
    fn close(&mut self, writer: &mut BufWriter<TcpStream>) -> Result<()> {
        for panel_id in self.tracker.panels() {
            writer.write_all(&ClientCommand::Unsubscribe { panel_id: panel_id.clone() }.to_json_line()?)?;
            self.tracker.forget(&panel_id);
        }
        writer.flush()?;
        let _ = writer.get_ref().shutdown(Shutdown::Both);
        debug!("Session with {} closed", self.server);
        Ok(())
    }

    fn sleep(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while !self.is_shutting_down() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Result of one read attempt on the session socket.
#[derive(Debug, PartialEq)]
enum Polled {
    /// A complete line (or the unterminated tail before EOF).
    Line(String),
    /// The read timed out; the bytes read so far stay in `pending`.
    Idle,
    Closed,
}

/// Reads up to the next `\n`. Bytes are collected raw and decoded only once
/// the line is complete, so a timeout inside a multi-byte character loses
/// nothing.
fn poll_line<R: BufRead>(reader: &mut R, pending: &mut Vec<u8>) -> Result<Polled> {
    match reader.read_until(b'\n', pending) {
        Ok(0) => Ok(Polled::Closed),
        Ok(_) => {
            let bytes = std::mem::take(pending);
            Ok(Polled::Line(String::from_utf8_lossy(&bytes).into_owned()))
        }
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
            Ok(Polled::Idle)
        }
        Err(e) => Err(e.into()),
    }
}
