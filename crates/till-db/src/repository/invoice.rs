//! # External Invoice Repository
//!
//! Storage for ingested external invoices, keyed by idempotency key.
//! The gateway decides insert-vs-merge; this repository provides the keyed
//! primitives and keeps the normalized payload as JSON alongside the
//! materialized sale's id.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use till_core::NormalizedInvoice;

/// A stored external invoice row.
#[derive(Debug, Clone)]
pub struct StoredInvoice {
    pub id: String,
    pub idempotency_key: String,
    pub invoice_number: String,
    /// ISO date, `YYYY-MM-DD`.
    pub invoice_date: String,
    pub client_name: String,
    /// JSON-encoded [`NormalizedInvoice`].
    pub payload: String,
    /// The canonical sale materialized for this invoice.
    pub sale_id: String,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredInvoice {
    /// Decodes the stored normalized payload.
    pub fn decode_payload(&self) -> DbResult<NormalizedInvoice> {
        serde_json::from_str(&self.payload)
            .map_err(|e| DbError::corrupt_column("payload", &self.id, e.to_string()))
    }
}

fn invoice_from_row(row: &SqliteRow) -> DbResult<StoredInvoice> {
    Ok(StoredInvoice {
        id: row.try_get("id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        invoice_number: row.try_get("invoice_number")?,
        invoice_date: row.try_get("invoice_date")?,
        client_name: row.try_get("client_name")?,
        payload: row.try_get("payload")?,
        sale_id: row.try_get("sale_id")?,
        received_at: row.try_get("received_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Repository for external invoice operations.
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    /// Creates a new InvoiceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        InvoiceRepository { pool }
    }

    /// Looks up an invoice by idempotency key.
    pub async fn get_by_key(&self, idempotency_key: &str) -> DbResult<Option<StoredInvoice>> {
        let row = sqlx::query(
            "SELECT id, idempotency_key, invoice_number, invoice_date, client_name,
                    payload, sale_id, received_at, updated_at
             FROM invoices WHERE idempotency_key = ?1",
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(invoice_from_row).transpose()
    }

    /// Inserts a new invoice. A racing duplicate key surfaces as
    /// [`DbError::UniqueViolation`] for the gateway to turn into a merge.
    pub async fn insert(&self, invoice: &StoredInvoice) -> DbResult<()> {
        debug!(key = %invoice.idempotency_key, sale = %invoice.sale_id, "Inserting invoice");

        sqlx::query(
            "INSERT INTO invoices (
                id, idempotency_key, invoice_number, invoice_date, client_name,
                payload, sale_id, received_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&invoice.id)
        .bind(&invoice.idempotency_key)
        .bind(&invoice.invoice_number)
        .bind(&invoice.invoice_date)
        .bind(&invoice.client_name)
        .bind(&invoice.payload)
        .bind(&invoice.sale_id)
        .bind(invoice.received_at)
        .bind(invoice.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Merges redelivered fields into an existing invoice (new values win).
    pub async fn merge(&self, invoice: &StoredInvoice) -> DbResult<()> {
        debug!(key = %invoice.idempotency_key, "Merging redelivered invoice");

        let result = sqlx::query(
            "UPDATE invoices SET
                invoice_number = ?2, invoice_date = ?3, client_name = ?4,
                payload = ?5, updated_at = ?6
             WHERE idempotency_key = ?1",
        )
        .bind(&invoice.idempotency_key)
        .bind(&invoice.invoice_number)
        .bind(&invoice.invoice_date)
        .bind(&invoice.client_name)
        .bind(&invoice.payload)
        .bind(invoice.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Invoice", &invoice.idempotency_key));
        }

        Ok(())
    }

    /// Number of stored invoices.
    pub async fn count(&self) -> DbResult<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoices")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}
