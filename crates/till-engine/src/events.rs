//! # Change Events
//!
//! The record store's "written" notifications, as a typed broadcast bus.
//!
//! ## Why a Bus
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Change Event Flow                                 │
//! │                                                                         │
//! │  SalesService ──┐                                                       │
//! │  IngestGateway ─┼── publish(TableEvent) ──► ChangeBus (broadcast)      │
//! │  Cancellation ──┤                              │                        │
//! │  SessionMgr ────┘                              ├──► Aggregate           │
//! │                                                │    Maintainer listener │
//! │                                                └──► dependent views     │
//! │                                                     (UI refresh, ...)   │
//! │                                                                         │
//! │  Services also drain the maintainer directly after their own commit,   │
//! │  so callers observe refreshed aggregates without racing the listener.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Subscribers that fall behind see `Lagged` and simply continue; every
//! recompute is a full recomputation, so missed events cost freshness, not
//! correctness.

use tokio::sync::broadcast;

/// A typed "written" notification, one variant per table family.
#[derive(Debug, Clone)]
pub enum TableEvent {
    /// A sale row was inserted or its canceled flag changed.
    SaleWritten {
        sale_id: String,
        vendor_id: String,
        canceled: bool,
    },
    /// A stock movement was appended (and its delta applied).
    StockMovementWritten {
        movement_id: String,
        product_id: String,
        clamped: bool,
    },
    /// An external invoice was inserted or merged.
    InvoiceIngested {
        idempotency_key: String,
        sale_id: String,
        vendor_id: String,
    },
    /// A session was opened, closed, or had its event metadata updated.
    SessionChanged { session_id: String },
    /// A RAZ snapshot was archived (and working state cleared).
    HistoryWritten { entry_id: String },
}

/// Broadcast bus for [`TableEvent`]s.
///
/// Cloning shares the underlying channel.
#[derive(Debug, Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<TableEvent>,
}

impl ChangeBus {
    /// Creates a bus with a bounded backlog per subscriber.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        ChangeBus { tx }
    }

    /// Publishes an event. A bus with no subscribers drops events silently;
    /// that is fine, services never depend on delivery.
    pub fn publish(&self, event: TableEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<TableEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        ChangeBus::new()
    }
}
