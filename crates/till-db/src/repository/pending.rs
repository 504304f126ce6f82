//! # Pending Payment Repository
//!
//! Check payments awaiting deposit. Rows are created when a sale settles by
//! check and purged only by the end-of-session RAZ.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use till_core::PendingPayment;

/// Repository for pending check payments.
#[derive(Debug, Clone)]
pub struct PendingPaymentRepository {
    pool: SqlitePool,
}

fn pending_from_row(row: &SqliteRow) -> DbResult<PendingPayment> {
    Ok(PendingPayment {
        id: row.try_get("id")?,
        sale_id: row.try_get("sale_id")?,
        vendor_id: row.try_get("vendor_id")?,
        amount_cents: row.try_get("amount_cents")?,
        check_count: row.try_get("check_count")?,
        created_at: row.try_get("created_at")?,
    })
}

impl PendingPaymentRepository {
    /// Creates a new PendingPaymentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PendingPaymentRepository { pool }
    }

    /// Records a pending payment.
    pub async fn insert(&self, pending: &PendingPayment) -> DbResult<()> {
        debug!(sale = %pending.sale_id, amount = pending.amount_cents, "Recording pending payment");

        sqlx::query(
            "INSERT INTO pending_payments (
                id, sale_id, vendor_id, amount_cents, check_count, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&pending.id)
        .bind(&pending.sale_id)
        .bind(&pending.vendor_id)
        .bind(pending.amount_cents)
        .bind(pending.check_count)
        .bind(pending.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All pending payments, oldest first.
    pub async fn list(&self) -> DbResult<Vec<PendingPayment>> {
        let rows = sqlx::query(
            "SELECT id, sale_id, vendor_id, amount_cents, check_count, created_at
             FROM pending_payments ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(pending_from_row).collect()
    }

    /// Number of pending payments.
    pub async fn count(&self) -> DbResult<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_payments")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}
