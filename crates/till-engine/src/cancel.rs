//! # Cancellation Service
//!
//! Reverses a specific or most-recent sale by flipping its canceled flag.
//! Sales are never deleted; aggregates exclude canceled rows on the next
//! recomputation.
//!
//! The flag flip is synchronous and guarded (read-your-writes); only the
//! downstream aggregate refresh may lag.

use std::sync::Arc;

use tracing::info;

use till_core::Sale;
use till_db::{Database, DbError};

use crate::aggregates::AggregateMaintainer;
use crate::error::{EngineError, EngineResult};
use crate::events::{ChangeBus, TableEvent};

/// Service canceling sales.
#[derive(Debug, Clone)]
pub struct CancellationService {
    db: Database,
    maintainer: Arc<AggregateMaintainer>,
    bus: ChangeBus,
}

impl CancellationService {
    /// Creates a new CancellationService.
    pub fn new(db: Database, maintainer: Arc<AggregateMaintainer>, bus: ChangeBus) -> Self {
        CancellationService {
            db,
            maintainer,
            bus,
        }
    }

    /// Cancels the most recent non-canceled sale.
    pub async fn cancel_most_recent_sale(&self) -> EngineResult<Sale> {
        let Some(sale) = self.db.sales().most_recent_active().await? else {
            return Err(EngineError::NothingToCancel { id: None });
        };
        self.cancel(&sale.id).await
    }

    /// Cancels a specific sale. Fails when the sale does not exist or was
    /// already canceled.
    pub async fn cancel_specific_sale(&self, sale_id: &str) -> EngineResult<Sale> {
        self.cancel(sale_id).await
    }

    async fn cancel(&self, sale_id: &str) -> EngineResult<Sale> {
        // Guarded flip: zero rows affected means no matching active sale
        match self.db.sales().set_canceled(sale_id).await {
            Ok(()) => {}
            Err(DbError::NotFound { .. }) => {
                return Err(EngineError::NothingToCancel {
                    id: Some(sale_id.to_string()),
                })
            }
            Err(err) => return Err(err.into()),
        }

        let sale = self
            .db
            .sales()
            .get_by_id(sale_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", sale_id))?;

        self.bus.publish(TableEvent::SaleWritten {
            sale_id: sale.id.clone(),
            vendor_id: sale.vendor_id.clone(),
            canceled: true,
        });
        self.maintainer.note_vendor(&sale.vendor_id).await;
        self.maintainer.drain().await;

        info!(id = %sale.id, vendor = %sale.vendor_id, total = sale.total_cents, "Sale canceled");
        Ok(sale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sales::tests::{card_draft, engine_parts};

    #[tokio::test]
    async fn test_cancel_zeroes_vendor_aggregates() {
        // Scenario: Sale{vendor=V1, total=100, method=card, date=today}
        // then cancel → V1.totalSales=0, V1.salesCount=0.
        let (db, maintainer, bus, sales) = engine_parts().await;
        let cancel = CancellationService::new(db.clone(), maintainer, bus);

        let sale = sales.record_sale(card_draft("v1", 10_000)).await.unwrap();
        let canceled = cancel.cancel_specific_sale(&sale.id).await.unwrap();
        assert!(canceled.canceled);

        let vendor = db.vendors().get("v1").await.unwrap().unwrap();
        assert_eq!(vendor.total_sales_cents, 0);
        assert_eq!(vendor.sales_count, 0);
        assert_eq!(vendor.daily_sales_cents, 0);

        // The row still exists - canceled, never deleted
        assert_eq!(db.sales().count_all().await.unwrap(), 1);
        assert!(db.sales().get_by_id(&sale.id).await.unwrap().unwrap().canceled);
    }

    #[tokio::test]
    async fn test_cancel_decreases_by_exact_amount() {
        let (db, maintainer, bus, sales) = engine_parts().await;
        let cancel = CancellationService::new(db.clone(), maintainer, bus);

        sales.record_sale(card_draft("v1", 10_000)).await.unwrap();
        let second = sales.record_sale(card_draft("v1", 2_500)).await.unwrap();

        cancel.cancel_specific_sale(&second.id).await.unwrap();

        let vendor = db.vendors().get("v1").await.unwrap().unwrap();
        assert_eq!(vendor.total_sales_cents, 10_000);
        assert_eq!(vendor.sales_count, 1);
    }

    #[tokio::test]
    async fn test_cancel_most_recent_picks_latest_active() {
        use chrono::{Duration, Utc};
        let (db, maintainer, bus, sales) = engine_parts().await;
        let cancel = CancellationService::new(db.clone(), maintainer, bus);

        let mut older = card_draft("v1", 1_000);
        older.timestamp = Some(Utc::now() - Duration::hours(1));
        sales.record_sale(older).await.unwrap();
        let newest = sales.record_sale(card_draft("v1", 2_000)).await.unwrap();

        let canceled = cancel.cancel_most_recent_sale().await.unwrap();
        assert_eq!(canceled.id, newest.id);

        // Next most-recent-active is now the older sale
        let canceled = cancel.cancel_most_recent_sale().await.unwrap();
        assert_eq!(canceled.total_cents, 1_000);

        // Nothing left to cancel
        assert!(matches!(
            cancel.cancel_most_recent_sale().await,
            Err(EngineError::NothingToCancel { id: None })
        ));
    }

    #[tokio::test]
    async fn test_double_cancel_fails() {
        let (db, maintainer, bus, sales) = engine_parts().await;
        let cancel = CancellationService::new(db.clone(), maintainer, bus);

        let sale = sales.record_sale(card_draft("v1", 100)).await.unwrap();
        cancel.cancel_specific_sale(&sale.id).await.unwrap();

        assert!(matches!(
            cancel.cancel_specific_sale(&sale.id).await,
            Err(EngineError::NothingToCancel { id: Some(_) })
        ));
        assert!(matches!(
            cancel.cancel_specific_sale("ghost").await,
            Err(EngineError::NothingToCancel { id: Some(_) })
        ));
    }
}
