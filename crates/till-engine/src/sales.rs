//! # Sale Recording
//!
//! The write path for point-of-sale sales: validate the draft, enrich it
//! with date partitions, persist sale + lines, then fan out the side
//! effects (pending check payments, stock movements, aggregate triggers).
//!
//! ## Write Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       record_sale                                       │
//! │                                                                         │
//! │  1. validate draft (total = Σ lines, non-empty, positive quantities)   │
//! │  2. Temporal Indexer: derive date partitions from the CALLER's         │
//! │     timestamp (backfilled sales keep their own date)                   │
//! │  3. upsert vendor row (zeroed aggregates when new)                     │
//! │  4. INSERT sale + lines (one transaction)      ← the commit point      │
//! │  5. pending payment row (check sales)                                  │
//! │  6. stock movements per product line           ← trigger: may warn,    │
//! │  7. publish + recompute vendor aggregates        never fails the sale  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{Local, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use till_core::validation::{validate_sale_draft, SaleDraft};
use till_core::{
    DateParts, MovementType, PaymentMethod, PendingPayment, Sale, SaleLine, StockMovement, Vendor,
};
use till_db::Database;

use crate::aggregates::AggregateMaintainer;
use crate::error::EngineResult;
use crate::events::{ChangeBus, TableEvent};

/// Service recording point-of-sale sales.
#[derive(Debug, Clone)]
pub struct SalesService {
    db: Database,
    maintainer: Arc<AggregateMaintainer>,
    bus: ChangeBus,
}

impl SalesService {
    /// Creates a new SalesService.
    pub fn new(db: Database, maintainer: Arc<AggregateMaintainer>, bus: ChangeBus) -> Self {
        SalesService {
            db,
            maintainer,
            bus,
        }
    }

    /// Records a sale from a validated draft and returns the stored row.
    ///
    /// The sale itself is synchronous (read-your-writes); only the vendor
    /// aggregate refresh is a trigger and may lag under failure.
    pub async fn record_sale(&self, draft: SaleDraft) -> EngineResult<Sale> {
        let total_cents = validate_sale_draft(&draft)?;

        let ts = draft.timestamp.unwrap_or_else(Utc::now);
        // Partitions follow the device's local calendar day
        let parts = DateParts::from_datetime(&ts.with_timezone(&Local));

        let sale_id = Uuid::new_v4().to_string();
        let sale = Sale {
            id: sale_id.clone(),
            vendor_id: draft.vendor_id.clone(),
            vendor_name: draft.vendor_name.clone(),
            total_cents,
            payment_method: draft.payment_method,
            canceled: false,
            created_at: ts,
            timestamp_ms: parts.timestamp_ms,
            sale_date: parts.iso_date,
            year: parts.year,
            month: parts.month,
            day_of_year: parts.day_of_year,
            check_detail: draft.check_detail.clone(),
            manual_invoice: draft.manual_invoice.clone(),
            cart_mode: draft.cart_mode.clone(),
        };

        let lines: Vec<SaleLine> = draft
            .lines
            .iter()
            .map(|line| SaleLine {
                id: Uuid::new_v4().to_string(),
                sale_id: sale_id.clone(),
                product_id: line.product_id.clone(),
                name: line.name.clone(),
                unit_price_cents: line.unit_price_cents,
                quantity: line.quantity,
                category: line.category.clone(),
                line_total_cents: line.line_total_cents(),
                created_at: ts,
            })
            .collect();

        self.db
            .vendors()
            .upsert(&Vendor::new(&draft.vendor_id, &draft.vendor_name, Utc::now()))
            .await?;

        self.db.sales().insert(&sale, &lines).await?;

        if sale.payment_method == PaymentMethod::Check {
            let check_count = sale.check_detail.as_ref().map(|c| c.check_count).unwrap_or(1);
            self.db
                .pending_payments()
                .insert(&PendingPayment {
                    id: Uuid::new_v4().to_string(),
                    sale_id: sale_id.clone(),
                    vendor_id: sale.vendor_id.clone(),
                    amount_cents: total_cents,
                    check_count,
                    created_at: ts,
                })
                .await?;
        }

        // Stock triggers: the sale has committed; a failing movement is
        // logged and retried by reconciliation, never unwound into the sale.
        for line in &lines {
            let Some(product_id) = &line.product_id else {
                continue;
            };
            let movement = StockMovement {
                id: Uuid::new_v4().to_string(),
                product_id: product_id.clone(),
                movement_type: MovementType::Sale,
                quantity: -line.quantity,
                vendor_id: Some(sale.vendor_id.clone()),
                sale_id: Some(sale_id.clone()),
                reason: None,
                created_at: ts,
            };
            match self.maintainer.apply_stock_movement(&movement).await {
                Ok(outcome) => self.bus.publish(TableEvent::StockMovementWritten {
                    movement_id: movement.id.clone(),
                    product_id: product_id.clone(),
                    clamped: outcome.clamped,
                }),
                Err(err) => {
                    warn!(sale = %sale_id, product = %product_id, error = %err,
                          "Stock movement failed after sale commit");
                }
            }
        }

        self.bus.publish(TableEvent::SaleWritten {
            sale_id: sale_id.clone(),
            vendor_id: sale.vendor_id.clone(),
            canceled: false,
        });
        self.maintainer.note_vendor(&sale.vendor_id).await;
        self.maintainer.drain().await;

        info!(
            id = %sale_id,
            vendor = %sale.vendor_id,
            total = total_cents,
            method = ?sale.payment_method,
            "Sale recorded"
        );
        Ok(sale)
    }

    /// Loads a sale and its lines.
    pub async fn sale_with_lines(&self, id: &str) -> EngineResult<Option<(Sale, Vec<SaleLine>)>> {
        let Some(sale) = self.db.sales().get_by_id(id).await? else {
            return Ok(None);
        };
        let lines = self.db.sales().get_lines(id).await?;
        Ok(Some((sale, lines)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use till_core::validation::LineDraft;
    use till_core::{CheckDetail, CoreError};
    use till_db::DbConfig;

    use crate::error::EngineError;

    pub(crate) async fn engine_parts(
    ) -> (Database, Arc<AggregateMaintainer>, ChangeBus, SalesService) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let maintainer = Arc::new(AggregateMaintainer::new(db.clone()));
        let bus = ChangeBus::new();
        let sales = SalesService::new(db.clone(), Arc::clone(&maintainer), bus.clone());
        (db, maintainer, bus, sales)
    }

    pub(crate) fn card_draft(vendor: &str, cents: i64) -> SaleDraft {
        SaleDraft {
            vendor_id: vendor.to_string(),
            vendor_name: format!("Vendor {vendor}"),
            payment_method: PaymentMethod::Card,
            lines: vec![LineDraft {
                product_id: None,
                name: "Item".into(),
                unit_price_cents: cents,
                quantity: 1,
                category: None,
            }],
            declared_total_cents: None,
            check_detail: None,
            manual_invoice: None,
            cart_mode: None,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_record_sale_updates_aggregates() {
        let (db, _, _, sales) = engine_parts().await;

        let sale = sales.record_sale(card_draft("v1", 10_000)).await.unwrap();
        assert_eq!(sale.total_cents, 10_000);
        assert!(!sale.canceled);

        let vendor = db.vendors().get("v1").await.unwrap().unwrap();
        assert_eq!(vendor.total_sales_cents, 10_000);
        assert_eq!(vendor.sales_count, 1);
    }

    #[tokio::test]
    async fn test_total_mismatch_rejected_pre_persistence() {
        let (db, _, _, sales) = engine_parts().await;

        let mut draft = card_draft("v1", 10_000);
        draft.declared_total_cents = Some(9_999);
        let err = sales.record_sale(draft).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(CoreError::TotalMismatch { .. })
        ));
        assert_eq!(db.sales().count_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_check_sale_creates_pending_payment() {
        let (db, _, _, sales) = engine_parts().await;

        let mut draft = card_draft("v1", 9_000);
        draft.payment_method = PaymentMethod::Check;
        draft.check_detail = Some(CheckDetail {
            check_count: 3,
            per_check_cents: 3_000,
            total_cents: 9_000,
            notes: None,
        });
        sales.record_sale(draft).await.unwrap();

        let pending = db.pending_payments().list().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].amount_cents, 9_000);
        assert_eq!(pending[0].check_count, 3);
    }

    #[tokio::test]
    async fn test_product_lines_decrement_stock_sale_survives_oversell() {
        let (db, _, _, sales) = engine_parts().await;

        db.stock()
            .upsert(&till_core::Stock {
                product_id: "p1".into(),
                category: None,
                product_name: "Bowl".into(),
                general_stock: 10,
                physical_stock: 1,
                min_stock: 0,
                last_update: Utc::now(),
            })
            .await
            .unwrap();

        let mut draft = card_draft("v1", 4_000);
        draft.lines[0].product_id = Some("p1".into());
        draft.lines[0].quantity = 4;
        draft.lines[0].unit_price_cents = 1_000;

        // Oversell: the sale proceeds, the stock clamps
        let sale = sales.record_sale(draft).await.unwrap();
        assert_eq!(sale.total_cents, 4_000);

        let stock = db.stock().get("p1").await.unwrap().unwrap();
        assert_eq!(stock.physical_stock, 0);
        let log = db.stock().movements_for_product("p1").await.unwrap();
        assert_eq!(log[0].quantity, -4);
        assert_eq!(log[0].sale_id.as_deref(), Some(sale.id.as_str()));
    }

    #[tokio::test]
    async fn test_backfilled_timestamp_is_honored() {
        use chrono::TimeZone;
        let (_, _, _, sales) = engine_parts().await;

        let mut draft = card_draft("v1", 100);
        draft.timestamp = Some(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
        let sale = sales.record_sale(draft).await.unwrap();
        assert_eq!(sale.year, 2025);
        assert_eq!(sale.month, 6);
    }
}
