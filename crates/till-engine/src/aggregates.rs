//! # Aggregate Maintainer
//!
//! Trigger logic keeping derived state consistent with the sale and
//! movement logs.
//!
//! ## Recompute, Never Patch
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Vendor Recomputation                                 │
//! │                                                                         │
//! │  trigger (sale written / canceled flag flipped)                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  dirty set ── drain() ──► for each vendor:                             │
//! │                              total_sales   = Σ total_cents (active)    │
//! │                              daily_sales   = Σ restricted to today     │
//! │                              sales_count   = COUNT(active)             │
//! │                              average_ticket= total / count (0 if none) │
//! │                              last_sale_date= MAX(sale_date)            │
//! │                                                                         │
//! │  A failed recompute stays in the dirty set and is retried on the next  │
//! │  trigger; it NEVER fails the write that scheduled it (that write has   │
//! │  already committed).                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Local, NaiveDate, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use till_core::{StockMovement, Vendor, VendorAnalytics};
use till_db::repository::stock::StockApplication;
use till_db::Database;

use crate::error::EngineResult;
use crate::events::{ChangeBus, TableEvent};

/// Maintains vendor aggregates and applies stock deltas.
#[derive(Debug)]
pub struct AggregateMaintainer {
    db: Database,
    /// Vendors awaiting recomputation (including failed attempts).
    dirty: Mutex<HashSet<String>>,
}

impl AggregateMaintainer {
    /// Creates a new maintainer over the given store.
    pub fn new(db: Database) -> Self {
        AggregateMaintainer {
            db,
            dirty: Mutex::new(HashSet::new()),
        }
    }

    /// Schedules a vendor for recomputation on the next drain.
    pub async fn note_vendor(&self, vendor_id: &str) {
        self.dirty.lock().await.insert(vendor_id.to_string());
    }

    /// Drains the dirty set using the device's current calendar date.
    pub async fn drain(&self) -> usize {
        self.drain_at(Local::now().date_naive()).await
    }

    /// Drains the dirty set, computing `daily_sales` against the given
    /// calendar date. Failed vendors are parked for the next drain.
    pub async fn drain_at(&self, today: NaiveDate) -> usize {
        let pending: Vec<String> = {
            let mut dirty = self.dirty.lock().await;
            dirty.drain().collect()
        };

        let mut recomputed = 0;
        for vendor_id in pending {
            match self.recompute_vendor_at(&vendor_id, today).await {
                Ok(()) => recomputed += 1,
                Err(err) => {
                    warn!(vendor = %vendor_id, error = %err, "Vendor recompute failed; will retry");
                    self.dirty.lock().await.insert(vendor_id);
                }
            }
        }
        recomputed
    }

    /// Fully recomputes one vendor's aggregates from the sale log.
    pub async fn recompute_vendor(&self, vendor_id: &str) -> EngineResult<()> {
        self.recompute_vendor_at(vendor_id, Local::now().date_naive())
            .await
    }

    /// Recompute with an explicit "today" (tests simulate midnight
    /// crossings through this).
    pub async fn recompute_vendor_at(&self, vendor_id: &str, today: NaiveDate) -> EngineResult<()> {
        let sales = self.db.sales();
        let (total_cents, count, last_sale_date) = sales.vendor_stats(vendor_id).await?;
        let today_iso = today.format("%Y-%m-%d").to_string();
        let (daily_cents, daily_count) = sales.vendor_daily_stats(vendor_id, &today_iso).await?;

        let average_ticket = if count > 0 { total_cents / count } else { 0 };
        let now = Utc::now();

        let vendors = self.db.vendors();
        let write = vendors
            .write_aggregates(
                vendor_id,
                daily_cents,
                total_cents,
                count,
                average_ticket,
                last_sale_date.as_deref(),
                now,
            )
            .await;

        match write {
            // Sales can reference a vendor the catalog never registered
            // (external ingestion); create the row and write again.
            Err(till_db::DbError::NotFound { .. }) => {
                vendors.upsert(&Vendor::new(vendor_id, vendor_id, now)).await?;
                vendors
                    .write_aggregates(
                        vendor_id,
                        daily_cents,
                        total_cents,
                        count,
                        average_ticket,
                        last_sale_date.as_deref(),
                        now,
                    )
                    .await?;
            }
            other => other?,
        }

        // The rollup row for today follows the same recompute discipline
        vendors
            .upsert_analytics(&VendorAnalytics {
                vendor_id: vendor_id.to_string(),
                date: today_iso,
                total_cents: daily_cents,
                sales_count: daily_count,
                updated_at: now,
            })
            .await?;

        debug!(
            vendor = %vendor_id,
            total_cents,
            daily_cents,
            count,
            "Vendor aggregates recomputed"
        );
        Ok(())
    }

    /// Applies a stock movement: appends to the log and applies the clamped
    /// delta, in one transaction.
    ///
    /// A clamped application is a reconciliation anomaly: auto-corrected,
    /// reported in the outcome, and logged for audit - never silently
    /// dropped, and never a reason to fail the originating sale.
    pub async fn apply_stock_movement(
        &self,
        movement: &StockMovement,
    ) -> EngineResult<StockApplication> {
        let outcome = self.db.stock().apply_movement(movement).await?;

        if outcome.clamped {
            warn!(
                product = %movement.product_id,
                delta = movement.quantity,
                previous = outcome.previous_physical,
                movement_id = %movement.id,
                "Stock movement clamped at zero; log keeps the raw quantity"
            );
        }
        Ok(outcome)
    }

    /// Spawns the bus listener: sale and invoice writes schedule the
    /// affected vendor and drain.
    ///
    /// Services drain directly after their own commits too; the listener
    /// covers independent call sites (background polls).
    pub fn spawn_listener(self: &Arc<Self>, bus: &ChangeBus) -> JoinHandle<()> {
        let maintainer = Arc::clone(self);
        let mut rx = bus.subscribe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(TableEvent::SaleWritten { vendor_id, .. })
                    | Ok(TableEvent::InvoiceIngested { vendor_id, .. }) => {
                        maintainer.note_vendor(&vendor_id).await;
                        maintainer.drain().await;
                    }
                    Ok(_) => {}
                    // Missed events cost freshness, not correctness:
                    // recomputes are always full.
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Maintainer listener lagged behind the bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use till_core::{DateParts, PaymentMethod, Sale, SaleLine};
    use till_db::DbConfig;

    async fn record_raw_sale(db: &Database, id: &str, vendor: &str, total: i64, ts_offset_h: i64) {
        let ts = Utc.with_ymd_and_hms(2026, 8, 6, 10, 0, 0).unwrap()
            + chrono::Duration::hours(ts_offset_h);
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
            id: format!("{id}-l"),
            sale_id: id.to_string(),
            product_id: None,
            name: "Item".into(),
            unit_price_cents: total,
            quantity: 1,
            category: None,
            line_total_cents: total,
            created_at: ts,
        };
        db.sales().insert(&sale, &[line]).await.unwrap();
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_full_recompute_from_log() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let maintainer = AggregateMaintainer::new(db.clone());

        record_raw_sale(&db, "a", "v1", 10_000, 0).await;
        record_raw_sale(&db, "b", "v1", 5_000, 1).await;
        record_raw_sale(&db, "c", "v2", 700, 2).await;

        maintainer
            .recompute_vendor_at("v1", day(2026, 8, 6))
            .await
            .unwrap();

        let v1 = db.vendors().get("v1").await.unwrap().unwrap();
        assert_eq!(v1.total_sales_cents, 15_000);
        assert_eq!(v1.sales_count, 2);
        assert_eq!(v1.average_ticket_cents, 7_500);
        assert_eq!(v1.daily_sales_cents, 15_000);
        assert_eq!(v1.last_sale_date.as_deref(), Some("2026-08-06"));

        // The daily rollup row follows
        let analytics = db.vendors().analytics_for_vendor("v1").await.unwrap();
        assert_eq!(analytics.len(), 1);
        assert_eq!(analytics[0].date, "2026-08-06");
        assert_eq!(analytics[0].total_cents, 15_000);
        assert_eq!(analytics[0].sales_count, 2);
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent() {
        // Draining twice must not double-count anything.
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let maintainer = AggregateMaintainer::new(db.clone());

        record_raw_sale(&db, "a", "v1", 10_000, 0).await;
        maintainer.note_vendor("v1").await;
        maintainer.drain_at(day(2026, 8, 6)).await;
        maintainer.note_vendor("v1").await;
        maintainer.drain_at(day(2026, 8, 6)).await;

        let v1 = db.vendors().get("v1").await.unwrap().unwrap();
        assert_eq!(v1.total_sales_cents, 10_000);
        assert_eq!(v1.sales_count, 1);
    }

    #[tokio::test]
    async fn test_midnight_crossing_moves_daily_sales() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let maintainer = AggregateMaintainer::new(db.clone());

        record_raw_sale(&db, "a", "v1", 10_000, 0).await; // 2026-08-06

        maintainer
            .recompute_vendor_at("v1", day(2026, 8, 6))
            .await
            .unwrap();
        assert_eq!(
            db.vendors().get("v1").await.unwrap().unwrap().daily_sales_cents,
            10_000
        );

        // Simulated midnight crossing: same log, next day
        maintainer
            .recompute_vendor_at("v1", day(2026, 8, 7))
            .await
            .unwrap();
        let v1 = db.vendors().get("v1").await.unwrap().unwrap();
        assert_eq!(v1.daily_sales_cents, 0);
        assert_eq!(v1.total_sales_cents, 10_000); // lifetime total untouched
    }

    #[tokio::test]
    async fn test_zero_sales_zero_average() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let maintainer = AggregateMaintainer::new(db.clone());

        db.vendors()
            .upsert(&Vendor::new("v1", "Alice", Utc::now()))
            .await
            .unwrap();
        maintainer
            .recompute_vendor_at("v1", day(2026, 8, 6))
            .await
            .unwrap();

        let v1 = db.vendors().get("v1").await.unwrap().unwrap();
        assert_eq!(v1.sales_count, 0);
        assert_eq!(v1.average_ticket_cents, 0);
        assert_eq!(v1.last_sale_date, None);
    }

    #[tokio::test]
    async fn test_unregistered_vendor_row_is_created() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let maintainer = AggregateMaintainer::new(db.clone());

        record_raw_sale(&db, "a", "ghost", 4_200, 0).await;
        maintainer
            .recompute_vendor_at("ghost", day(2026, 8, 6))
            .await
            .unwrap();

        let ghost = db.vendors().get("ghost").await.unwrap().unwrap();
        assert_eq!(ghost.total_sales_cents, 4_200);
    }
}
