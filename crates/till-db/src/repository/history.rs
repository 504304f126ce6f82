//! # RAZ History Repository
//!
//! Immutable reset snapshots. Entries are written by the Reset/Archive
//! Service BEFORE any destructive clear; delete is the only mutation allowed
//! after creation (exposed for the external history viewer).

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use till_core::{RazHistoryEntry, TotalsByMethod, VendorBreakdown};

/// Repository for RAZ history snapshots.
#[derive(Debug, Clone)]
pub struct HistoryRepository {
    pool: SqlitePool,
}

fn entry_from_row(row: &SqliteRow) -> DbResult<RazHistoryEntry> {
    let id: String = row.try_get("id")?;

    let totals_json: String = row.try_get("totals")?;
    let totals: TotalsByMethod = serde_json::from_str(&totals_json)
        .map_err(|e| DbError::corrupt_column("totals", &id, e.to_string()))?;

    let breakdown_json: String = row.try_get("vendor_breakdown")?;
    let vendor_breakdown: Vec<VendorBreakdown> = serde_json::from_str(&breakdown_json)
        .map_err(|e| DbError::corrupt_column("vendor_breakdown", &id, e.to_string()))?;

    Ok(RazHistoryEntry {
        kind: row.try_get("kind")?,
        session_id: row.try_get("session_id")?,
        window_start: row.try_get("window_start")?,
        window_end: row.try_get("window_end")?,
        totals,
        vendor_breakdown,
        sale_count: row.try_get("sale_count")?,
        created_at: row.try_get("created_at")?,
        id,
    })
}

impl HistoryRepository {
    /// Creates a new HistoryRepository.
    pub fn new(pool: SqlitePool) -> Self {
        HistoryRepository { pool }
    }

    /// Durably writes a snapshot entry.
    ///
    /// The caller must await this before clearing any working state.
    pub async fn insert(&self, entry: &RazHistoryEntry) -> DbResult<()> {
        debug!(id = %entry.id, kind = ?entry.kind, sales = entry.sale_count, "Writing RAZ snapshot");

        let totals =
            serde_json::to_string(&entry.totals).map_err(|e| DbError::Internal(e.to_string()))?;
        let breakdown = serde_json::to_string(&entry.vendor_breakdown)
            .map_err(|e| DbError::Internal(e.to_string()))?;

        sqlx::query(
            "INSERT INTO raz_history (
                id, kind, session_id, window_start, window_end,
                totals, vendor_breakdown, sale_count, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&entry.id)
        .bind(entry.kind)
        .bind(&entry.session_id)
        .bind(entry.window_start)
        .bind(entry.window_end)
        .bind(totals)
        .bind(breakdown)
        .bind(entry.sale_count)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All history entries, newest first.
    pub async fn list(&self) -> DbResult<Vec<RazHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT id, kind, session_id, window_start, window_end,
                    totals, vendor_breakdown, sale_count, created_at
             FROM raz_history ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Gets one history entry.
    pub async fn get(&self, id: &str) -> DbResult<Option<RazHistoryEntry>> {
        let row = sqlx::query(
            "SELECT id, kind, session_id, window_start, window_end,
                    totals, vendor_breakdown, sale_count, created_at
             FROM raz_history WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    /// Deletes a history entry (the only post-creation mutation).
    pub async fn delete(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM raz_history WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("History entry", id));
        }
        Ok(())
    }
}
