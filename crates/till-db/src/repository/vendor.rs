//! # Vendor Repository
//!
//! Vendor rows and their derived aggregate columns.
//!
//! The aggregate columns (`daily_sales_cents`, `total_sales_cents`,
//! `sales_count`, `average_ticket_cents`, `last_sale_date`) are owned by the
//! Aggregate Maintainer: repositories only provide the write; the values are
//! always a full recomputation from the sale log.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use till_core::{Vendor, VendorAnalytics};

/// Repository for vendor database operations.
#[derive(Debug, Clone)]
pub struct VendorRepository {
    pool: SqlitePool,
}

fn vendor_from_row(row: &SqliteRow) -> DbResult<Vendor> {
    Ok(Vendor {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        color: row.try_get("color")?,
        daily_sales_cents: row.try_get("daily_sales_cents")?,
        total_sales_cents: row.try_get("total_sales_cents")?,
        sales_count: row.try_get("sales_count")?,
        average_ticket_cents: row.try_get("average_ticket_cents")?,
        last_sale_date: row.try_get("last_sale_date")?,
        last_update: row.try_get("last_update")?,
    })
}

impl VendorRepository {
    /// Creates a new VendorRepository.
    pub fn new(pool: SqlitePool) -> Self {
        VendorRepository { pool }
    }

    /// Inserts a vendor, or updates name/color if the id already exists.
    ///
    /// Aggregate columns are left untouched on conflict; they belong to the
    /// maintainer.
    pub async fn upsert(&self, vendor: &Vendor) -> DbResult<()> {
        debug!(id = %vendor.id, name = %vendor.name, "Upserting vendor");

        sqlx::query(
            "INSERT INTO vendors (
                id, name, color, daily_sales_cents, total_sales_cents,
                sales_count, average_ticket_cents, last_sale_date, last_update
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                                          color = COALESCE(excluded.color, vendors.color)",
        )
        .bind(&vendor.id)
        .bind(&vendor.name)
        .bind(&vendor.color)
        .bind(vendor.daily_sales_cents)
        .bind(vendor.total_sales_cents)
        .bind(vendor.sales_count)
        .bind(vendor.average_ticket_cents)
        .bind(&vendor.last_sale_date)
        .bind(vendor.last_update)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a vendor by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<Vendor>> {
        let row = sqlx::query(
            "SELECT id, name, color, daily_sales_cents, total_sales_cents,
                    sales_count, average_ticket_cents, last_sale_date, last_update
             FROM vendors WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(vendor_from_row).transpose()
    }

    /// All vendors, ordered by name.
    pub async fn list(&self) -> DbResult<Vec<Vendor>> {
        let rows = sqlx::query(
            "SELECT id, name, color, daily_sales_cents, total_sales_cents,
                    sales_count, average_ticket_cents, last_sale_date, last_update
             FROM vendors ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(vendor_from_row).collect()
    }

    /// Writes freshly recomputed aggregates for one vendor.
    #[allow(clippy::too_many_arguments)]
    pub async fn write_aggregates(
        &self,
        id: &str,
        daily_sales_cents: i64,
        total_sales_cents: i64,
        sales_count: i64,
        average_ticket_cents: i64,
        last_sale_date: Option<&str>,
        last_update: chrono::DateTime<chrono::Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE vendors SET
                daily_sales_cents = ?2, total_sales_cents = ?3, sales_count = ?4,
                average_ticket_cents = ?5, last_sale_date = ?6, last_update = ?7
             WHERE id = ?1",
        )
        .bind(id)
        .bind(daily_sales_cents)
        .bind(total_sales_cents)
        .bind(sales_count)
        .bind(average_ticket_cents)
        .bind(last_sale_date)
        .bind(last_update)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Vendor", id));
        }

        Ok(())
    }

    /// Writes one vendor's rollup for one date (recomputed, like the
    /// aggregate columns).
    pub async fn upsert_analytics(&self, analytics: &VendorAnalytics) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO vendor_analytics (vendor_id, date, total_cents, sales_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(vendor_id, date) DO UPDATE SET
                total_cents = excluded.total_cents,
                sales_count = excluded.sales_count,
                updated_at = excluded.updated_at",
        )
        .bind(&analytics.vendor_id)
        .bind(&analytics.date)
        .bind(analytics.total_cents)
        .bind(analytics.sales_count)
        .bind(analytics.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Range scan: one vendor's daily rollups, oldest first.
    pub async fn analytics_for_vendor(&self, vendor_id: &str) -> DbResult<Vec<VendorAnalytics>> {
        let rows = sqlx::query(
            "SELECT vendor_id, date, total_cents, sales_count, updated_at
             FROM vendor_analytics WHERE vendor_id = ?1 ORDER BY date",
        )
        .bind(vendor_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(VendorAnalytics {
                    vendor_id: row.try_get("vendor_id")?,
                    date: row.try_get("date")?,
                    total_cents: row.try_get("total_cents")?,
                    sales_count: row.try_get("sales_count")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }
}
