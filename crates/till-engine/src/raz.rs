//! # Reset/Archive Service ("RAZ")
//!
//! Snapshots working state into an immutable history entry, then clears it.
//!
//! ## State Machine & Ordering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        RAZ Execution                                    │
//! │                                                                         │
//! │   confirm ──► processing ──► completed                                  │
//! │      ▲            │                                                     │
//! │      └────────────┘ (any error aborts back to confirm)                 │
//! │                                                                         │
//! │   1. compute snapshot (totals by method, per-vendor, count, window)    │
//! │   2. INSERT raz_history  ──── MUST commit before step 3 ──┐            │
//! │   3. DELETE working state (one transaction):              │            │
//! │        daily:           sales, sale_lines, cart, invoices │            │
//! │        end-of-session:  + pending payments, close session │            │
//! │                                                           │            │
//! │   If (2) fails, (3) never runs: a failed archive leaves   │            │
//! │   ALL working state untouched.                            │            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both variants are user-confirmed; end-of-session requires double
//! confirmation and is gated on the session's declared event end date.

use std::sync::Arc;

use chrono::{Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use till_core::{RazHistoryEntry, RazKind, TotalsByMethod};
use till_db::Database;

use crate::aggregates::AggregateMaintainer;
use crate::error::{EngineError, EngineResult};
use crate::events::{ChangeBus, TableEvent};
use crate::session::SessionManager;

/// Where a reset run currently stands. The UI disables re-invocation while
/// `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RazPhase {
    Confirm,
    Processing,
    Completed,
}

/// A confirmed reset request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RazRequest {
    pub kind: RazKind,
    /// First confirmation, required for every variant.
    pub confirmed: bool,
    /// Second confirmation, required for the end-of-session variant.
    pub double_confirmed: bool,
    pub operator: Option<String>,
}

/// What a completed reset did, with enough counts to verify correctness.
#[derive(Debug, Clone, Serialize)]
pub struct RazReport {
    pub history_id: String,
    pub kind: RazKind,
    pub archived_sales: i64,
    pub archived_total_cents: i64,
    pub cleared_sales: u64,
    pub cleared_sale_lines: u64,
    pub cleared_cart_items: u64,
    pub cleared_invoices: u64,
    pub cleared_pending_payments: u64,
    pub closed_session_id: Option<String>,
}

/// The Reset/Archive Service.
#[derive(Debug)]
pub struct ResetService {
    db: Database,
    sessions: Arc<SessionManager>,
    maintainer: Arc<AggregateMaintainer>,
    bus: ChangeBus,
    phase: Mutex<RazPhase>,
}

impl ResetService {
    /// Creates a new ResetService.
    pub fn new(
        db: Database,
        sessions: Arc<SessionManager>,
        maintainer: Arc<AggregateMaintainer>,
        bus: ChangeBus,
    ) -> Self {
        ResetService {
            db,
            sessions,
            maintainer,
            bus,
            phase: Mutex::new(RazPhase::Confirm),
        }
    }

    /// Current phase of the state machine.
    pub async fn phase(&self) -> RazPhase {
        *self.phase.lock().await
    }

    /// Runs a reset against the device's current calendar date.
    pub async fn run(&self, request: RazRequest) -> EngineResult<RazReport> {
        self.run_at(request, Local::now().date_naive()).await
    }

    /// Runs a reset with an explicit "today" for the end-date gate.
    pub async fn run_at(&self, request: RazRequest, today: NaiveDate) -> EngineResult<RazReport> {
        {
            let mut phase = self.phase.lock().await;
            if *phase == RazPhase::Processing {
                return Err(EngineError::invariant("a reset is already in progress"));
            }
            *phase = RazPhase::Processing;
        }

        let result = self.execute(&request, today).await;

        let mut phase = self.phase.lock().await;
        *phase = match result {
            Ok(_) => RazPhase::Completed,
            Err(_) => RazPhase::Confirm, // abort back to confirm
        };
        result
    }

    async fn execute(&self, request: &RazRequest, today: NaiveDate) -> EngineResult<RazReport> {
        if !request.confirmed {
            return Err(EngineError::invariant(
                "reset requires explicit confirmation",
            ));
        }
        if request.kind == RazKind::EndOfSession && !request.double_confirmed {
            return Err(EngineError::invariant(
                "end-of-session reset requires double confirmation",
            ));
        }

        let session = self.sessions.current().await?;

        if request.kind == RazKind::EndOfSession {
            let Some(ref session) = session else {
                return Err(EngineError::invariant("no open session to close"));
            };
            SessionManager::check_end_of_session_allowed(session, today)?;
        }

        // ---- Step 1: snapshot --------------------------------------------
        let sales = self.db.sales();
        let mut totals = TotalsByMethod::default();
        for (method, cents) in sales.totals_by_method().await? {
            totals.add(method, cents);
        }
        let vendor_breakdown = sales.vendor_breakdown().await?;
        let sale_count = sales.count_active().await?;
        let now = Utc::now();

        let entry = RazHistoryEntry {
            id: Uuid::new_v4().to_string(),
            kind: request.kind,
            session_id: session.as_ref().map(|s| s.id.clone()),
            window_start: session.as_ref().map(|s| s.opened_at),
            window_end: Some(now),
            totals,
            vendor_breakdown,
            sale_count,
            created_at: now,
        };

        // The archive write must durably commit before anything is cleared;
        // a failure here aborts the whole reset with state untouched.
        self.db.history().insert(&entry).await?;

        // ---- Step 2: clear (one transaction) -----------------------------
        let mut tx = self.db.pool().begin().await?;

        let cleared_sale_lines = sqlx::query("DELETE FROM sale_lines")
            .execute(&mut *tx)
            .await
            .map_err(till_db::DbError::from)?
            .rows_affected();
        let cleared_sales = sqlx::query("DELETE FROM sales")
            .execute(&mut *tx)
            .await
            .map_err(till_db::DbError::from)?
            .rows_affected();
        let cleared_cart_items = sqlx::query("DELETE FROM cart_items")
            .execute(&mut *tx)
            .await
            .map_err(till_db::DbError::from)?
            .rows_affected();
        let cleared_invoices = sqlx::query("DELETE FROM invoices")
            .execute(&mut *tx)
            .await
            .map_err(till_db::DbError::from)?
            .rows_affected();

        // Rollups derive from the sales being cleared
        sqlx::query("DELETE FROM vendor_analytics")
            .execute(&mut *tx)
            .await
            .map_err(till_db::DbError::from)?;

        let cleared_pending_payments = if request.kind == RazKind::EndOfSession {
            sqlx::query("DELETE FROM pending_payments")
                .execute(&mut *tx)
                .await
                .map_err(till_db::DbError::from)?
                .rows_affected()
        } else {
            0
        };

        tx.commit().await.map_err(till_db::DbError::from)?;

        // Vendor aggregates are a pure function of the (now empty) log;
        // recompute every vendor the snapshot touched.
        for vendor in &entry.vendor_breakdown {
            self.maintainer.note_vendor(&vendor.vendor_id).await;
        }
        self.maintainer.drain_at(today).await;

        // ---- Step 3: end-of-session closes the session -------------------
        let closed_session_id = if request.kind == RazKind::EndOfSession {
            let closed = self
                .sessions
                .close_session(request.operator.as_deref(), entry.totals)
                .await?;
            Some(closed.id)
        } else {
            None
        };

        self.bus.publish(TableEvent::HistoryWritten {
            entry_id: entry.id.clone(),
        });

        info!(
            history = %entry.id,
            kind = ?request.kind,
            archived = sale_count,
            cleared_sales,
            "RAZ completed"
        );

        Ok(RazReport {
            history_id: entry.id,
            kind: request.kind,
            archived_sales: sale_count,
            archived_total_cents: entry.totals.total_cents(),
            cleared_sales,
            cleared_sale_lines,
            cleared_cart_items,
            cleared_invoices,
            cleared_pending_payments,
            closed_session_id,
        })
    }

    // =========================================================================
    // History viewer surface (presentation-only collaborator)
    // =========================================================================

    /// Writes a caller-built snapshot entry.
    pub async fn create_history_entry(&self, entry: &RazHistoryEntry) -> EngineResult<()> {
        self.db.history().insert(entry).await?;
        self.bus.publish(TableEvent::HistoryWritten {
            entry_id: entry.id.clone(),
        });
        Ok(())
    }

    /// All history entries, newest first.
    pub async fn list_history(&self) -> EngineResult<Vec<RazHistoryEntry>> {
        Ok(self.db.history().list().await?)
    }

    /// Deletes a history entry.
    pub async fn delete_history_entry(&self, id: &str) -> EngineResult<()> {
        Ok(self.db.history().delete(id).await?)
    }
}
