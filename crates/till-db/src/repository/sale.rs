//! # Sale Repository
//!
//! Database operations for sales and their line items.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. RECORD                                                              │
//! │     └── insert() → sale + lines in ONE transaction                      │
//! │                                                                         │
//! │  2. (OPTIONAL) CANCEL                                                   │
//! │     └── set_canceled() → flips the flag, row is NEVER deleted           │
//! │                                                                         │
//! │  3. AGGREGATE READS                                                     │
//! │     └── vendor_stats() / totals_by_method() / vendor_breakdown()        │
//! │         always filter canceled = 0                                      │
//! │                                                                         │
//! │  4. RAZ                                                                 │
//! │     └── the only path that deletes sale rows (archive first)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use till_core::{CheckDetail, ManualInvoice, PaymentMethod, Sale, SaleLine, VendorBreakdown};

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

const SALE_COLUMNS: &str = "id, vendor_id, vendor_name, total_cents, payment_method, canceled, \
     created_at, timestamp_ms, sale_date, year, month, day_of_year, \
     check_detail, manual_invoice, cart_mode";

fn sale_from_row(row: &SqliteRow) -> DbResult<Sale> {
    let id: String = row.try_get("id")?;

    let check_detail: Option<String> = row.try_get("check_detail")?;
    let check_detail: Option<CheckDetail> = match check_detail {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| DbError::corrupt_column("check_detail", &id, e.to_string()))?,
        ),
        None => None,
    };

    let manual_invoice: Option<String> = row.try_get("manual_invoice")?;
    let manual_invoice: Option<ManualInvoice> = match manual_invoice {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| DbError::corrupt_column("manual_invoice", &id, e.to_string()))?,
        ),
        None => None,
    };

    Ok(Sale {
        vendor_id: row.try_get("vendor_id")?,
        vendor_name: row.try_get("vendor_name")?,
        total_cents: row.try_get("total_cents")?,
        payment_method: row.try_get("payment_method")?,
        canceled: row.try_get("canceled")?,
        created_at: row.try_get("created_at")?,
        timestamp_ms: row.try_get("timestamp_ms")?,
        sale_date: row.try_get("sale_date")?,
        year: row.try_get("year")?,
        month: row.try_get("month")?,
        day_of_year: row.try_get("day_of_year")?,
        check_detail,
        manual_invoice,
        cart_mode: row.try_get("cart_mode")?,
        id,
    })
}

fn line_from_row(row: &SqliteRow) -> DbResult<SaleLine> {
    Ok(SaleLine {
        id: row.try_get("id")?,
        sale_id: row.try_get("sale_id")?,
        product_id: row.try_get("product_id")?,
        name: row.try_get("name")?,
        unit_price_cents: row.try_get("unit_price_cents")?,
        quantity: row.try_get("quantity")?,
        category: row.try_get("category")?,
        line_total_cents: row.try_get("line_total_cents")?,
        created_at: row.try_get("created_at")?,
    })
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Inserts a sale and its lines in one transaction.
    ///
    /// Either everything is durable or nothing is; a duplicate id surfaces
    /// as [`DbError::UniqueViolation`].
    pub async fn insert(&self, sale: &Sale, lines: &[SaleLine]) -> DbResult<()> {
        debug!(id = %sale.id, vendor = %sale.vendor_id, total = sale.total_cents, "Inserting sale");

        let check_detail = encode_json(&sale.check_detail)?;
        let manual_invoice = encode_json(&sale.manual_invoice)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO sales (
                id, vendor_id, vendor_name, total_cents, payment_method, canceled,
                created_at, timestamp_ms, sale_date, year, month, day_of_year,
                check_detail, manual_invoice, cart_mode
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )
        .bind(&sale.id)
        .bind(&sale.vendor_id)
        .bind(&sale.vendor_name)
        .bind(sale.total_cents)
        .bind(sale.payment_method)
        .bind(sale.canceled)
        .bind(sale.created_at)
        .bind(sale.timestamp_ms)
        .bind(&sale.sale_date)
        .bind(sale.year)
        .bind(sale.month)
        .bind(sale.day_of_year)
        .bind(check_detail)
        .bind(manual_invoice)
        .bind(&sale.cart_mode)
        .execute(&mut *tx)
        .await?;

        for line in lines {
            insert_line(&mut tx, line).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Rewrites a sale and replaces its lines (idempotent ingestion merge).
    pub async fn replace(&self, sale: &Sale, lines: &[SaleLine]) -> DbResult<()> {
        debug!(id = %sale.id, "Replacing sale");

        let check_detail = encode_json(&sale.check_detail)?;
        let manual_invoice = encode_json(&sale.manual_invoice)?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE sales SET
                vendor_id = ?2, vendor_name = ?3, total_cents = ?4, payment_method = ?5,
                created_at = ?6, timestamp_ms = ?7, sale_date = ?8, year = ?9,
                month = ?10, day_of_year = ?11, check_detail = ?12, manual_invoice = ?13,
                cart_mode = ?14
            WHERE id = ?1",
        )
        .bind(&sale.id)
        .bind(&sale.vendor_id)
        .bind(&sale.vendor_name)
        .bind(sale.total_cents)
        .bind(sale.payment_method)
        .bind(sale.created_at)
        .bind(sale.timestamp_ms)
        .bind(&sale.sale_date)
        .bind(sale.year)
        .bind(sale.month)
        .bind(sale.day_of_year)
        .bind(check_detail)
        .bind(manual_invoice)
        .bind(&sale.cart_mode)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sale", &sale.id));
        }

        sqlx::query("DELETE FROM sale_lines WHERE sale_id = ?1")
            .bind(&sale.id)
            .execute(&mut *tx)
            .await?;

        for line in lines {
            insert_line(&mut tx, line).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Gets a sale by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let row = sqlx::query(&format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(sale_from_row).transpose()
    }

    /// Gets all lines for a sale, in insertion order.
    pub async fn get_lines(&self, sale_id: &str) -> DbResult<Vec<SaleLine>> {
        let rows = sqlx::query(
            "SELECT id, sale_id, product_id, name, unit_price_cents, quantity,
                    category, line_total_cents, created_at
             FROM sale_lines WHERE sale_id = ?1 ORDER BY created_at, id",
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(line_from_row).collect()
    }

    /// The most recent non-canceled sale, if any.
    pub async fn most_recent_active(&self) -> DbResult<Option<Sale>> {
        let row = sqlx::query(&format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE canceled = 0
             ORDER BY timestamp_ms DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(sale_from_row).transpose()
    }

    /// Flips the canceled flag of a non-canceled sale.
    ///
    /// Guarded: errors with NotFound when the sale doesn't exist or was
    /// already canceled, so double cancellation cannot slip through.
    pub async fn set_canceled(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE sales SET canceled = 1 WHERE id = ?1 AND canceled = 0")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sale (active)", id));
        }

        debug!(id = %id, "Sale canceled");
        Ok(())
    }

    /// Range scan: all sales of a vendor in a year, oldest first.
    pub async fn scan_vendor_year(&self, vendor_id: &str, year: i32) -> DbResult<Vec<Sale>> {
        let rows = sqlx::query(&format!(
            "SELECT {SALE_COLUMNS} FROM sales
             WHERE vendor_id = ?1 AND year = ?2 ORDER BY timestamp_ms"
        ))
        .bind(vendor_id)
        .bind(year)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(sale_from_row).collect()
    }

    /// Range scan: all sales of a vendor in a month (any year), oldest first.
    pub async fn scan_vendor_month(&self, vendor_id: &str, month: u32) -> DbResult<Vec<Sale>> {
        let rows = sqlx::query(&format!(
            "SELECT {SALE_COLUMNS} FROM sales
             WHERE vendor_id = ?1 AND month = ?2 ORDER BY timestamp_ms"
        ))
        .bind(vendor_id)
        .bind(month)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(sale_from_row).collect()
    }

    /// Range scan: all sales in a given year+month, oldest first.
    pub async fn scan_year_month(&self, year: i32, month: u32) -> DbResult<Vec<Sale>> {
        let rows = sqlx::query(&format!(
            "SELECT {SALE_COLUMNS} FROM sales
             WHERE year = ?1 AND month = ?2 ORDER BY timestamp_ms"
        ))
        .bind(year)
        .bind(month)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(sale_from_row).collect()
    }

    /// Aggregate source: (total cents, count, max sale_date) over
    /// non-canceled sales of one vendor.
    pub async fn vendor_stats(&self, vendor_id: &str) -> DbResult<(i64, i64, Option<String>)> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(total_cents), 0) AS total,
                    COUNT(*) AS n,
                    MAX(sale_date) AS last_date
             FROM sales WHERE vendor_id = ?1 AND canceled = 0",
        )
        .bind(vendor_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((
            row.try_get("total")?,
            row.try_get("n")?,
            row.try_get("last_date")?,
        ))
    }

    /// Aggregate source: (total cents, count) of a vendor's non-canceled
    /// sales on one calendar date.
    pub async fn vendor_daily_stats(&self, vendor_id: &str, iso_date: &str) -> DbResult<(i64, i64)> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(total_cents), 0) AS total, COUNT(*) AS n
             FROM sales WHERE vendor_id = ?1 AND sale_date = ?2 AND canceled = 0",
        )
        .bind(vendor_id)
        .bind(iso_date)
        .fetch_one(&self.pool)
        .await?;

        Ok((row.try_get("total")?, row.try_get("n")?))
    }

    /// Snapshot source: totals grouped by payment method over non-canceled
    /// sales.
    pub async fn totals_by_method(&self) -> DbResult<Vec<(PaymentMethod, i64)>> {
        let rows = sqlx::query(
            "SELECT payment_method, COALESCE(SUM(total_cents), 0) AS total
             FROM sales WHERE canceled = 0 GROUP BY payment_method",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("payment_method")?, row.try_get("total")?)))
            .collect()
    }

    /// Snapshot source: per-vendor totals over non-canceled sales.
    pub async fn vendor_breakdown(&self) -> DbResult<Vec<VendorBreakdown>> {
        let rows = sqlx::query(
            "SELECT vendor_id, vendor_name,
                    COALESCE(SUM(total_cents), 0) AS total, COUNT(*) AS n
             FROM sales WHERE canceled = 0
             GROUP BY vendor_id, vendor_name ORDER BY vendor_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(VendorBreakdown {
                    vendor_id: row.try_get("vendor_id")?,
                    vendor_name: row.try_get("vendor_name")?,
                    total_cents: row.try_get("total")?,
                    sales_count: row.try_get("n")?,
                })
            })
            .collect()
    }

    /// Number of non-canceled sales.
    pub async fn count_active(&self) -> DbResult<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales WHERE canceled = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Total number of sale rows, canceled included.
    pub async fn count_all(&self) -> DbResult<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

async fn insert_line(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    line: &SaleLine,
) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO sale_lines (
            id, sale_id, product_id, name, unit_price_cents, quantity,
            category, line_total_cents, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(&line.id)
    .bind(&line.sale_id)
    .bind(&line.product_id)
    .bind(&line.name)
    .bind(line.unit_price_cents)
    .bind(line.quantity)
    .bind(&line.category)
    .bind(line.line_total_cents)
    .bind(line.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn encode_json<T: serde::Serialize>(value: &Option<T>) -> DbResult<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(|e| DbError::Internal(e.to_string())))
        .transpose()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::{TimeZone, Utc};
    use till_core::{DateParts, PaymentMethod};

    pub(crate) fn sample_sale(id: &str, vendor: &str, total: i64) -> (Sale, Vec<SaleLine>) {
        let ts = Utc.with_ymd_and_hms(2026, 8, 6, 10, 0, 0).unwrap();
        let parts = DateParts::from_datetime(&ts);
        let sale = Sale {
            id: id.to_string(),
            vendor_id: vendor.to_string(),
            vendor_name: format!("Vendor {vendor}"),
            total_cents: total,
            payment_method: PaymentMethod::Card,
            canceled: false,
            created_at: ts,
            timestamp_ms: parts.timestamp_ms,
            sale_date: parts.iso_date,
            year: parts.year,
            month: parts.month,
            day_of_year: parts.day_of_year,
            check_detail: None,
            manual_invoice: None,
            cart_mode: None,
        };
        let line = SaleLine {
            id: format!("{id}-l1"),
            sale_id: id.to_string(),
            product_id: None,
            name: "Item".to_string(),
            unit_price_cents: total,
            quantity: 1,
            category: None,
            line_total_cents: total,
            created_at: ts,
        };
        (sale, vec![line])
    }

    #[tokio::test]
    async fn test_insert_and_fetch_roundtrip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales();

        let (sale, lines) = sample_sale("s1", "v1", 10_000);
        repo.insert(&sale, &lines).await.unwrap();

        let loaded = repo.get_by_id("s1").await.unwrap().unwrap();
        assert_eq!(loaded.total_cents, 10_000);
        assert_eq!(loaded.payment_method, PaymentMethod::Card);
        assert!(!loaded.canceled);
        assert_eq!(repo.get_lines("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_surfaces() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales();

        let (sale, lines) = sample_sale("s1", "v1", 100);
        repo.insert(&sale, &lines).await.unwrap();

        let err = repo.insert(&sale, &[]).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_cancel_is_guarded() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales();

        let (sale, lines) = sample_sale("s1", "v1", 100);
        repo.insert(&sale, &lines).await.unwrap();

        repo.set_canceled("s1").await.unwrap();
        assert!(repo.get_by_id("s1").await.unwrap().unwrap().canceled);

        // Second cancel and unknown id both fail
        assert!(repo.set_canceled("s1").await.is_err());
        assert!(repo.set_canceled("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_vendor_stats_exclude_canceled() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales();

        let (a, la) = sample_sale("a", "v1", 10_000);
        let (b, lb) = sample_sale("b", "v1", 5_000);
        repo.insert(&a, &la).await.unwrap();
        repo.insert(&b, &lb).await.unwrap();

        let (total, n, last) = repo.vendor_stats("v1").await.unwrap();
        assert_eq!((total, n), (15_000, 2));
        assert_eq!(last.as_deref(), Some("2026-08-06"));

        repo.set_canceled("b").await.unwrap();
        let (total, n, _) = repo.vendor_stats("v1").await.unwrap();
        assert_eq!((total, n), (10_000, 1));
    }

    #[tokio::test]
    async fn test_index_scans_ordered() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales();

        let (mut a, la) = sample_sale("a", "v1", 100);
        a.timestamp_ms += 1000;
        let (b, lb) = sample_sale("b", "v1", 200);
        repo.insert(&a, &la).await.unwrap();
        repo.insert(&b, &lb).await.unwrap();

        let scanned = repo.scan_vendor_year("v1", 2026).await.unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].id, "b"); // oldest first
        assert!(repo.scan_vendor_year("v2", 2026).await.unwrap().is_empty());
    }
}
