//! # Session Repository
//!
//! Session rows. The single-open-session invariant is enforced by the
//! Session Manager in till-engine; this repository provides the guarded
//! primitives it needs (status-filtered scans, status-guarded updates).

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use till_core::{Session, SessionEvent, TotalsByMethod};

/// Repository for session database operations.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

const SESSION_COLUMNS: &str = "id, status, opened_at, opened_by, closed_at, closed_by, \
     event_name, event_starts_on, event_ends_on, closing_totals";

fn session_from_row(row: &SqliteRow) -> DbResult<Session> {
    let id: String = row.try_get("id")?;

    let event_name: Option<String> = row.try_get("event_name")?;
    let event = event_name.map(|name| -> DbResult<SessionEvent> {
        Ok(SessionEvent {
            name,
            starts_on: row.try_get("event_starts_on")?,
            ends_on: row.try_get("event_ends_on")?,
        })
    });
    let event = event.transpose()?;

    let closing_totals: Option<String> = row.try_get("closing_totals")?;
    let closing_totals: Option<TotalsByMethod> = match closing_totals {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| DbError::corrupt_column("closing_totals", &id, e.to_string()))?,
        ),
        None => None,
    };

    Ok(Session {
        status: row.try_get("status")?,
        opened_at: row.try_get("opened_at")?,
        opened_by: row.try_get("opened_by")?,
        closed_at: row.try_get("closed_at")?,
        closed_by: row.try_get("closed_by")?,
        event,
        closing_totals,
        id,
    })
}

impl SessionRepository {
    /// Creates a new SessionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SessionRepository { pool }
    }

    /// Inserts a session.
    pub async fn insert(&self, session: &Session) -> DbResult<()> {
        debug!(id = %session.id, status = ?session.status, "Inserting session");

        let closing_totals = session
            .closing_totals
            .as_ref()
            .map(|t| serde_json::to_string(t).map_err(|e| DbError::Internal(e.to_string())))
            .transpose()?;

        sqlx::query(
            "INSERT INTO sessions (
                id, status, opened_at, opened_by, closed_at, closed_by,
                event_name, event_starts_on, event_ends_on, closing_totals
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&session.id)
        .bind(session.status)
        .bind(session.opened_at)
        .bind(&session.opened_by)
        .bind(session.closed_at)
        .bind(&session.closed_by)
        .bind(session.event.as_ref().map(|e| e.name.clone()))
        .bind(session.event.as_ref().and_then(|e| e.starts_on))
        .bind(session.event.as_ref().and_then(|e| e.ends_on))
        .bind(closing_totals)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a session by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    /// All open sessions, newest first.
    ///
    /// More than one element means the invariant was violated somewhere;
    /// `open_session_safe` reconciles from this very ordering.
    pub async fn open_sessions(&self) -> DbResult<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE status = 'open' ORDER BY opened_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_from_row).collect()
    }

    /// The current open session, if any (newest when duplicated).
    pub async fn current_open(&self) -> DbResult<Option<Session>> {
        Ok(self.open_sessions().await?.into_iter().next())
    }

    /// Closes an open session. Guarded on status: closing an already-closed
    /// session affects zero rows and surfaces as NotFound.
    pub async fn close(
        &self,
        id: &str,
        closed_by: Option<&str>,
        closing_totals: Option<&TotalsByMethod>,
        closed_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let totals_json = closing_totals
            .map(|t| serde_json::to_string(t).map_err(|e| DbError::Internal(e.to_string())))
            .transpose()?;

        let result = sqlx::query(
            "UPDATE sessions SET
                status = 'closed', closed_at = ?2, closed_by = ?3, closing_totals = ?4
             WHERE id = ?1 AND status = 'open'",
        )
        .bind(id)
        .bind(closed_at)
        .bind(closed_by)
        .bind(totals_json)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Session (open)", id));
        }

        debug!(id = %id, "Session closed");
        Ok(())
    }

    /// Updates event metadata of an open session only.
    pub async fn update_event(
        &self,
        id: &str,
        name: &str,
        starts_on: Option<NaiveDate>,
        ends_on: Option<NaiveDate>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET event_name = ?2, event_starts_on = ?3, event_ends_on = ?4
             WHERE id = ?1 AND status = 'open'",
        )
        .bind(id)
        .bind(name)
        .bind(starts_on)
        .bind(ends_on)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Session (open)", id));
        }

        Ok(())
    }
}
