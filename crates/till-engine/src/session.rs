//! # Session Manager
//!
//! Enforces the single-open-session invariant.
//!
//! ## Why Defensive Re-checks
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Single-Open-Session Invariant                          │
//! │                                                                         │
//! │  SQLite has no "at most one row WHERE status='open'" constraint, and   │
//! │  transactions from independent call sites may interleave. So:          │
//! │                                                                         │
//! │  1. An in-process mutex serializes every session mutation              │
//! │  2. Each mutation re-reads the open set before acting                  │
//! │  3. open_session_safe reconciles survivors of past violations:         │
//! │     keep the most recent, close the rest with an audit note            │
//! │                                                                         │
//! │  ensure_session and open_session_safe are idempotent: repeated and     │
//! │  concurrent calls converge on the same single open session.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{Local, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use till_core::{Session, SessionEvent, SessionStatus, TotalsByMethod};
use till_db::Database;

use crate::error::{EngineError, EngineResult};
use crate::events::{ChangeBus, TableEvent};

/// Audit note written on sessions closed by duplicate reconciliation.
const RECONCILE_NOTE: &str = "auto-reconcile: duplicate open session";

/// Manages the session lifecycle: ensure / open-safe / close / update-event.
#[derive(Debug)]
pub struct SessionManager {
    db: Database,
    bus: ChangeBus,
    /// Serializes session mutations within the process.
    lock: Mutex<()>,
}

impl SessionManager {
    /// Creates a new SessionManager.
    pub fn new(db: Database, bus: ChangeBus) -> Self {
        SessionManager {
            db,
            bus,
            lock: Mutex::new(()),
        }
    }

    /// Returns the current open session without mutating anything.
    pub async fn current(&self) -> EngineResult<Option<Session>> {
        Ok(self.db.sessions().current_open().await?)
    }

    /// Opens a session if none is open; no-op returning the existing one
    /// otherwise. Safe under repeated and concurrent calls.
    pub async fn ensure_session(&self, opened_by: Option<&str>) -> EngineResult<Session> {
        let _guard = self.lock.lock().await;

        // Re-check inside the critical section
        if let Some(existing) = self.db.sessions().current_open().await? {
            return Ok(existing);
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            status: SessionStatus::Open,
            opened_at: Utc::now(),
            opened_by: opened_by.map(str::to_string),
            closed_at: None,
            closed_by: None,
            event: None,
            closing_totals: None,
        };
        self.db.sessions().insert(&session).await?;

        self.bus.publish(TableEvent::SessionChanged {
            session_id: session.id.clone(),
        });
        info!(id = %session.id, "Session opened");
        Ok(session)
    }

    /// Like [`ensure_session`](Self::ensure_session), but also reconciles
    /// the rare case of multiple open sessions: the most recent survives,
    /// duplicates are closed with an audit note.
    ///
    /// Returns the surviving session and how many duplicates were closed.
    pub async fn open_session_safe(
        &self,
        opened_by: Option<&str>,
    ) -> EngineResult<(Session, usize)> {
        let _guard = self.lock.lock().await;

        let open = self.db.sessions().open_sessions().await?;
        match open.len() {
            0 => {
                let session = Session {
                    id: Uuid::new_v4().to_string(),
                    status: SessionStatus::Open,
                    opened_at: Utc::now(),
                    opened_by: opened_by.map(str::to_string),
                    closed_at: None,
                    closed_by: None,
                    event: None,
                    closing_totals: None,
                };
                self.db.sessions().insert(&session).await?;
                self.bus.publish(TableEvent::SessionChanged {
                    session_id: session.id.clone(),
                });
                info!(id = %session.id, "Session opened");
                Ok((session, 0))
            }
            1 => Ok((open.into_iter().next().expect("len checked"), 0)),
            _ => {
                // Reconciliation anomaly: keep the newest, close the rest.
                let mut iter = open.into_iter();
                let survivor = iter.next().expect("len checked");
                let now = Utc::now();
                let mut closed = 0;

                for duplicate in iter {
                    warn!(
                        duplicate = %duplicate.id,
                        survivor = %survivor.id,
                        "Duplicate open session; closing with audit note"
                    );
                    self.db
                        .sessions()
                        .close(&duplicate.id, Some(RECONCILE_NOTE), None, now)
                        .await?;
                    closed += 1;
                }

                self.bus.publish(TableEvent::SessionChanged {
                    session_id: survivor.id.clone(),
                });
                Ok((survivor, closed))
            }
        }
    }

    /// Closes the open session with its computed totals.
    ///
    /// Errors with an invariant violation when no session is open (closing
    /// an already-closed session included).
    pub async fn close_session(
        &self,
        closed_by: Option<&str>,
        totals: TotalsByMethod,
    ) -> EngineResult<Session> {
        let _guard = self.lock.lock().await;

        let Some(current) = self.db.sessions().current_open().await? else {
            return Err(EngineError::invariant("no open session to close"));
        };

        self.db
            .sessions()
            .close(&current.id, closed_by, Some(&totals), Utc::now())
            .await?;

        self.bus.publish(TableEvent::SessionChanged {
            session_id: current.id.clone(),
        });
        info!(id = %current.id, total = totals.total_cents(), "Session closed");

        Ok(self
            .db
            .sessions()
            .get(&current.id)
            .await?
            .unwrap_or(current))
    }

    /// Updates event metadata of the open session only.
    pub async fn update_current_session_event(
        &self,
        event: SessionEvent,
    ) -> EngineResult<Session> {
        let _guard = self.lock.lock().await;

        let Some(current) = self.db.sessions().current_open().await? else {
            return Err(EngineError::invariant(
                "no open session to attach the event to",
            ));
        };

        self.db
            .sessions()
            .update_event(&current.id, &event.name, event.starts_on, event.ends_on)
            .await?;

        self.bus.publish(TableEvent::SessionChanged {
            session_id: current.id.clone(),
        });

        Ok(self
            .db
            .sessions()
            .get(&current.id)
            .await?
            .unwrap_or(current))
    }

    /// Gate for the end-of-session reset: permitted only once the session's
    /// declared event end date has passed.
    ///
    /// A session without a declared end date is not gated.
    pub fn check_end_of_session_allowed(
        session: &Session,
        today: NaiveDate,
    ) -> EngineResult<()> {
        if let Some(ends_on) = session.event.as_ref().and_then(|e| e.ends_on) {
            if today <= ends_on {
                let earliest = ends_on.succ_opt().unwrap_or(ends_on);
                return Err(EngineError::invariant_until(
                    format!("event runs until {ends_on}; end-of-session reset not yet allowed"),
                    earliest,
                ));
            }
        }
        Ok(())
    }

    /// [`check_end_of_session_allowed`](Self::check_end_of_session_allowed)
    /// against the device's current calendar date.
    pub fn check_end_of_session_allowed_now(session: &Session) -> EngineResult<()> {
        Self::check_end_of_session_allowed(session, Local::now().date_naive())
    }
}
