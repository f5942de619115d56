//! Realtime session gateway.
//!
//! One `Connection` exists per live viewer session. The transport reports the
//! session's lifecycle (`on_connect`, `invoke`, `on_disconnect`); the gateway
//! turns commands into registry calls and hands every registry listener the
//! connection's outbound queue, which the transport drains to the socket.
//!
//! A connection starts `Connected`. Its first subscription moves it to
//! `Streaming`: the print backlog is queued and the global print listener is
//! registered, exactly once. Disconnect is terminal and releases everything
//! the connection registered, panels and print listener together.

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, unbounded};
use depth_common::command::{ClientCommand, ServerEvent};
use depth_common::market::{PanelId, TradeSide};
use depth_common::tickers::Ticker;
use depth_common::{FeedError, Result};
use log::{info, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::registry::{ListenerId, SubscriptionRegistry};

/// Transport-assigned session identifier.
pub type ConnectionId = u64;

/// Prints queued to a viewer when it opens its first panel.
pub const BACKLOG_PRINTS: usize = 100;

enum SessionState {
    Connected,
    Streaming { print_listener: ListenerId },
}

struct Connection {
    outbound: Sender<ServerEvent>,
    panels: BTreeSet<PanelId>,
    state: SessionState,
    closed: bool,
}

/// What a disconnect released.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectReport {
    /// Panels removed from the registry.
    pub panels_released: usize,
    /// Whether a print listener was removed.
    pub print_listener_removed: bool,
}

/// Per-connection protocol adapter over the registry.
pub struct SessionGateway {
    registry: Arc<SubscriptionRegistry>,
    connections: RwLock<HashMap<ConnectionId, Arc<Mutex<Connection>>>>,
    next_id: AtomicU64,
}

impl SessionGateway {
    /// Creates a gateway with no connections.
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            registry,
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Opens a session. The returned receiver yields every event addressed to
    /// it and closes once the session is disconnected.
    pub fn on_connect(&self) -> Result<(ConnectionId, Receiver<ServerEvent>)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound, events) = unbounded();
        let connection = Connection {
            outbound,
            panels: BTreeSet::new(),
            state: SessionState::Connected,
            closed: false,
        };
        self.connections
            .write()?
            .insert(id, Arc::new(Mutex::new(connection)));
        info!("Connected: connId={}", id);
        Ok((id, events))
    }

    /// Executes one command on behalf of session `id`.
    pub fn invoke(&self, id: ConnectionId, command: ClientCommand) -> Result<()> {
        let connection = self.connection(id)?;
        let mut connection = connection.lock()?;
        if connection.closed {
            return Err(FeedError::UnknownConnection(id));
        }
        match command {
            ClientCommand::Subscribe { panel_id, ticker } => {
                self.subscribe(id, &mut connection, panel_id, ticker)
            }
            ClientCommand::Unsubscribe { panel_id } => {
                self.unsubscribe(id, &mut connection, &panel_id)
            }
            ClientCommand::PlaceBuyOrder {
                ticker,
                price,
                quantity,
                panel_id,
            } => self
                .registry
                .place_order(ticker, TradeSide::Buy, price, quantity, Utc::now(), panel_id),
            ClientCommand::PlaceSellOrder {
                ticker,
                price,
                quantity,
                panel_id,
            } => self
                .registry
                .place_order(ticker, TradeSide::Sell, price, quantity, Utc::now(), panel_id),
        }
    }

    /// Closes session `id`, releasing every panel it owns and its print
    /// listener. Unknown or already closed sessions release nothing.
    pub fn on_disconnect(&self, id: ConnectionId) -> Result<DisconnectReport> {
        let Some(connection) = self.connections.write()?.remove(&id) else {
            return Ok(DisconnectReport::default());
        };
        let mut connection = connection.lock()?;
        connection.closed = true;

        let mut report = DisconnectReport::default();
        let mut first_error = None;
        for panel_id in std::mem::take(&mut connection.panels) {
            info!(
                "Unsubscribe Depth on disconnect: connId={}, panelId={}",
                id, panel_id
            );
            match self
                .registry
                .unsubscribe_depth(&panel_id, Some(&connection.outbound))
            {
                Ok(true) => report.panels_released += 1,
                Ok(false) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let SessionState::Streaming { print_listener } =
            std::mem::replace(&mut connection.state, SessionState::Connected)
        {
            match self.registry.unsubscribe_print(print_listener) {
                Ok(removed) => report.print_listener_removed = removed,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        info!(
            "Disconnected: connId={}, panels released={}",
            id, report.panels_released
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Number of open sessions.
    pub fn connection_count(&self) -> Result<usize> {
        Ok(self.connections.read()?.len())
    }

    fn connection(&self, id: ConnectionId) -> Result<Arc<Mutex<Connection>>> {
        self.connections
            .read()?
            .get(&id)
            .cloned()
            .ok_or(FeedError::UnknownConnection(id))
    }

    fn subscribe(
        &self,
        id: ConnectionId,
        connection: &mut Connection,
        panel_id: PanelId,
        ticker: Ticker,
    ) -> Result<()> {
        info!(
            "Subscribe Depth: connId={}, panelId={}, ticker={}",
            id, panel_id, ticker
        );
        self.registry
            .subscribe_depth(panel_id.clone(), ticker, connection.outbound.clone())?;
        connection.panels.insert(panel_id.clone());

        if let SessionState::Connected = connection.state {
            let print_listener = self.registry.subscribe_print_with_backlog(
                connection.outbound.clone(),
                panel_id.to_string(),
                BACKLOG_PRINTS,
            )?;
            connection.state = SessionState::Streaming { print_listener };
        }
        Ok(())
    }

    fn unsubscribe(
        &self,
        id: ConnectionId,
        connection: &mut Connection,
        panel_id: &PanelId,
    ) -> Result<()> {
        if !connection.panels.remove(panel_id) {
            warn!(
                "Unsubscribe ignored: connId={} does not own panelId={}",
                id, panel_id
            );
            return Ok(());
        }
        info!("Unsubscribe Depth: connId={}, panelId={}", id, panel_id);
        if !self
            .registry
            .unsubscribe_depth(panel_id, Some(&connection.outbound))?
        {
            warn!(
                "Unsubscribe left panelId={} alone: re-registered by another connection",
                panel_id
            );
        }
        Ok(())
    }
}
