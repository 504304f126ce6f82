//! # External Ingestion Gateway
//!
//! Idempotent ingestion of externally generated invoices.
//!
//! ## Upsert Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Idempotent Invoice Upsert                            │
//! │                                                                         │
//! │  JSON payload ──► normalize (till-core) ──► reject ValidationError     │
//! │                        │                                                │
//! │                        ▼                                                │
//! │              lookup by idempotency key                                  │
//! │                   │            │                                        │
//! │               absent        present                                     │
//! │                   │            │                                        │
//! │                   ▼            ▼                                        │
//! │     INSERT invoice +     MERGE invoice (new values win) +              │
//! │     materialize Sale     rewrite the ONE linked sale                   │
//! │     + stock movements    (no new rows, no re-applied stock)            │
//! │                   │            │                                        │
//! │                   └─────┬──────┘                                        │
//! │                         ▼                                               │
//! │        change notification + vendor recompute                          │
//! │                                                                         │
//! │  Redelivery with the same key NEVER duplicates: the stored count is    │
//! │  monotone in distinct keys only.                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The materialized sale makes external invoices flow through the exact
//! same aggregate/stock machinery as point-of-sale sales.

use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use till_core::{
    DateParts, ManualInvoice, MovementType, NormalizedInvoice, RawInvoicePayload, Sale, SaleLine,
    StockMovement, ValidationError, Vendor,
};
use till_db::repository::invoice::StoredInvoice;
use till_db::{Database, DbError};

use crate::aggregates::AggregateMaintainer;
use crate::error::EngineResult;
use crate::events::{ChangeBus, TableEvent};

/// Result of ingesting one payload.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub idempotency_key: String,
    /// The materialized canonical sale.
    pub sale_id: String,
    /// False when the payload merged into an existing record.
    pub created: bool,
}

/// One rejected payload in a batch.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedPayload {
    pub index: usize,
    pub idempotency_key: Option<String>,
    pub reason: String,
}

/// Batch ingestion report: per-item outcomes, never a wholesale failure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub accepted: usize,
    pub rejected: Vec<RejectedPayload>,
}

/// Gateway normalizing and idempotently upserting external invoices.
#[derive(Debug)]
pub struct IngestGateway {
    db: Database,
    maintainer: Arc<AggregateMaintainer>,
    bus: ChangeBus,
    /// Serializes upserts so the key lookup and the insert/merge decision
    /// form one critical section (the store has no upsert-with-merge).
    lock: Mutex<()>,
}

impl IngestGateway {
    /// Creates a new IngestGateway.
    pub fn new(db: Database, maintainer: Arc<AggregateMaintainer>, bus: ChangeBus) -> Self {
        IngestGateway {
            db,
            maintainer,
            bus,
            lock: Mutex::new(()),
        }
    }

    /// Ingests a raw JSON payload string (polled delivery channel).
    pub async fn ingest_json(&self, json: &str) -> EngineResult<IngestOutcome> {
        let raw: RawInvoicePayload = serde_json::from_str(json)
            .map_err(|e| ValidationError::invalid_format("payload", e.to_string()))?;
        self.ingest(&raw).await
    }

    /// Ingests an already-parsed JSON value (direct call).
    pub async fn ingest_value(&self, value: serde_json::Value) -> EngineResult<IngestOutcome> {
        let raw: RawInvoicePayload = serde_json::from_value(value)
            .map_err(|e| ValidationError::invalid_format("payload", e.to_string()))?;
        self.ingest(&raw).await
    }

    /// Normalizes and idempotently upserts one payload.
    pub async fn ingest(&self, raw: &RawInvoicePayload) -> EngineResult<IngestOutcome> {
        let invoice = raw.normalize()?;
        self.upsert(invoice).await
    }

    /// Ingests a batch, reporting accepted/rejected per item.
    pub async fn ingest_batch(&self, payloads: &[RawInvoicePayload]) -> BatchReport {
        let mut report = BatchReport::default();

        for (index, raw) in payloads.iter().enumerate() {
            match self.ingest(raw).await {
                Ok(_) => report.accepted += 1,
                Err(err) => {
                    warn!(index, error = %err, "Invoice payload rejected");
                    report.rejected.push(RejectedPayload {
                        index,
                        idempotency_key: raw
                            .idempotency_key
                            .clone()
                            .or_else(|| raw.invoice_number.clone()),
                        reason: err.to_string(),
                    });
                }
            }
        }
        report
    }

    async fn upsert(&self, invoice: NormalizedInvoice) -> EngineResult<IngestOutcome> {
        let _guard = self.lock.lock().await;

        let now = Utc::now();
        let payload_json = serde_json::to_string(&invoice)
            .map_err(|e| DbError::Internal(e.to_string()))?;
        let key = invoice.idempotency_key.clone();

        let existing = self.db.invoices().get_by_key(&key).await?;

        let outcome = match existing {
            None => {
                let sale_id = Uuid::new_v4().to_string();
                let (sale, lines) = materialize_sale(&invoice, &sale_id, now);

                self.db
                    .vendors()
                    .upsert(&Vendor::new(&invoice.vendor_id, &invoice.vendor_name, now))
                    .await?;
                self.db.sales().insert(&sale, &lines).await?;

                self.db
                    .invoices()
                    .insert(&StoredInvoice {
                        id: Uuid::new_v4().to_string(),
                        idempotency_key: key.clone(),
                        invoice_number: invoice.invoice_number.clone(),
                        invoice_date: invoice.invoice_date.to_string(),
                        client_name: invoice.client_name.clone(),
                        payload: payload_json,
                        sale_id: sale_id.clone(),
                        received_at: now,
                        updated_at: now,
                    })
                    .await?;

                // First delivery only: apply invoice stock movements.
                // Redeliveries must not decrement twice.
                for line in &invoice.lines {
                    let Some(sku) = &line.sku else { continue };
                    let movement = StockMovement {
                        id: Uuid::new_v4().to_string(),
                        product_id: sku.clone(),
                        movement_type: MovementType::Invoice,
                        quantity: -line.quantity,
                        vendor_id: Some(invoice.vendor_id.clone()),
                        sale_id: Some(sale_id.clone()),
                        reason: Some(format!("invoice {}", invoice.invoice_number)),
                        created_at: now,
                    };
                    match self.maintainer.apply_stock_movement(&movement).await {
                        Ok(applied) => self.bus.publish(TableEvent::StockMovementWritten {
                            movement_id: movement.id.clone(),
                            product_id: sku.clone(),
                            clamped: applied.clamped,
                        }),
                        Err(err) => {
                            warn!(invoice = %key, sku = %sku, error = %err,
                                  "Invoice stock movement failed after commit");
                        }
                    }
                }

                info!(key = %key, sale = %sale_id, "External invoice ingested");
                IngestOutcome {
                    idempotency_key: key,
                    sale_id,
                    created: true,
                }
            }

            Some(existing) => {
                // The previous materialization may carry another vendor;
                // both sides need a recompute after the merge.
                let previous_vendor = self
                    .db
                    .sales()
                    .get_by_id(&existing.sale_id)
                    .await?
                    .map(|s| s.vendor_id);

                let (sale, lines) = materialize_sale(&invoice, &existing.sale_id, now);
                self.db
                    .vendors()
                    .upsert(&Vendor::new(&invoice.vendor_id, &invoice.vendor_name, now))
                    .await?;
                self.db.sales().replace(&sale, &lines).await?;

                self.db
                    .invoices()
                    .merge(&StoredInvoice {
                        id: existing.id.clone(),
                        idempotency_key: key.clone(),
                        invoice_number: invoice.invoice_number.clone(),
                        invoice_date: invoice.invoice_date.to_string(),
                        client_name: invoice.client_name.clone(),
                        payload: payload_json,
                        sale_id: existing.sale_id.clone(),
                        received_at: existing.received_at,
                        updated_at: now,
                    })
                    .await?;

                if let Some(previous) = previous_vendor {
                    if previous != invoice.vendor_id {
                        self.maintainer.note_vendor(&previous).await;
                    }
                }

                info!(key = %key, sale = %existing.sale_id, "External invoice merged");
                IngestOutcome {
                    idempotency_key: key,
                    sale_id: existing.sale_id.clone(),
                    created: false,
                }
            }
        };

        self.bus.publish(TableEvent::InvoiceIngested {
            idempotency_key: outcome.idempotency_key.clone(),
            sale_id: outcome.sale_id.clone(),
            vendor_id: invoice.vendor_id.clone(),
        });
        self.maintainer.note_vendor(&invoice.vendor_id).await;
        self.maintainer.drain().await;

        Ok(outcome)
    }
}

/// Builds the canonical sale materialized for an invoice.
///
/// Date partitions come from the invoice date (backfill semantics), pinned
/// to UTC noon so the calendar date survives timezone conversion.
fn materialize_sale(
    invoice: &NormalizedInvoice,
    sale_id: &str,
    now: chrono::DateTime<Utc>,
) -> (Sale, Vec<SaleLine>) {
    let ts = utc_noon(invoice.invoice_date);
    let parts = DateParts::from_datetime(&ts);

    let lines: Vec<SaleLine> = invoice
        .lines
        .iter()
        .map(|line| SaleLine {
            id: Uuid::new_v4().to_string(),
            sale_id: sale_id.to_string(),
            product_id: line.sku.clone(),
            name: line.name.clone(),
            unit_price_cents: if line.quantity > 0 {
                line.line_ttc_cents / line.quantity
            } else {
                line.unit_price_ht_cents
            },
            quantity: line.quantity,
            category: None,
            line_total_cents: line.line_ttc_cents,
            created_at: now,
        })
        .collect();

    let sale = Sale {
        id: sale_id.to_string(),
        vendor_id: invoice.vendor_id.clone(),
        vendor_name: invoice.vendor_name.clone(),
        total_cents: invoice.total_ttc_cents,
        payment_method: invoice.payment_method,
        canceled: false,
        created_at: ts,
        timestamp_ms: parts.timestamp_ms,
        sale_date: parts.iso_date,
        year: parts.year,
        month: parts.month,
        day_of_year: parts.day_of_year,
        check_detail: None,
        manual_invoice: Some(ManualInvoice {
            invoice_number: invoice.invoice_number.clone(),
            client_name: Some(invoice.client_name.clone()),
        }),
        cart_mode: None,
    };

    (sale, lines)
}

fn utc_noon(date: NaiveDate) -> chrono::DateTime<Utc> {
    let naive = date.and_hms_opt(12, 0, 0).expect("noon is always valid");
    Utc.from_utc_datetime(&naive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use till_db::DbConfig;

    async fn gateway() -> (Database, IngestGateway) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let maintainer = Arc::new(AggregateMaintainer::new(db.clone()));
        let bus = ChangeBus::new();
        let gateway = IngestGateway::new(db.clone(), maintainer, bus);
        (db, gateway)
    }

    fn payload(key: &str, ttc: f64) -> RawInvoicePayload {
        serde_json::from_value(serde_json::json!({
            "invoiceNumber": key,
            "invoiceDate": "2026-03-15",
            "clientName": "Dupont",
            "items": [
                {"sku": "p1", "name": "Bol", "qty": 2, "unitPriceHt": 10.0, "vatRate": 20.0}
            ],
            "totalTTC": ttc
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_redelivery_merges_never_duplicates() {
        // Scenario: ingest {key="INV-1", ttc=150}, then {key="INV-1", ttc=180}
        // → one stored sale, totalAmount=180.
        let (db, gateway) = gateway().await;

        let first = gateway.ingest(&payload("INV-1", 150.0)).await.unwrap();
        assert!(first.created);

        let second = gateway.ingest(&payload("INV-1", 180.0)).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.sale_id, first.sale_id);

        assert_eq!(db.invoices().count().await.unwrap(), 1);
        assert_eq!(db.sales().count_all().await.unwrap(), 1);

        let sale = db.sales().get_by_id(&first.sale_id).await.unwrap().unwrap();
        assert_eq!(sale.total_cents, 18_000);
    }

    #[tokio::test]
    async fn test_materialized_sale_feeds_aggregates() {
        let (db, gateway) = gateway().await;

        gateway.ingest(&payload("INV-1", 150.0)).await.unwrap();

        let vendor = db
            .vendors()
            .get(till_core::CHANNEL_VENDOR_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(vendor.total_sales_cents, 15_000);
        assert_eq!(vendor.sales_count, 1);

        let sale = db
            .sales()
            .scan_year_month(2026, 3)
            .await
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(sale.sale_date, "2026-03-15");
        assert_eq!(
            sale.manual_invoice.unwrap().invoice_number,
            "INV-1"
        );
    }

    #[tokio::test]
    async fn test_stock_movement_applied_once_across_redeliveries() {
        let (db, gateway) = gateway().await;

        gateway.ingest(&payload("INV-1", 150.0)).await.unwrap();
        gateway.ingest(&payload("INV-1", 180.0)).await.unwrap();

        let log = db.stock().movements_for_product("p1").await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].quantity, -2);
        assert_eq!(log[0].movement_type, MovementType::Invoice);
    }

    #[tokio::test]
    async fn test_batch_reports_per_item() {
        let (_, gateway) = gateway().await;

        let bad: RawInvoicePayload = serde_json::from_value(serde_json::json!({
            "invoiceDate": "2026-03-15",
            "clientName": "No number"
        }))
        .unwrap();

        let report = gateway
            .ingest_batch(&[payload("INV-1", 100.0), bad, payload("INV-2", 50.0)])
            .await;

        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].index, 1);
        assert!(report.rejected[0].reason.contains("invoice_number"));
    }

    #[tokio::test]
    async fn test_ingest_json_channel() {
        let (db, gateway) = gateway().await;

        let outcome = gateway
            .ingest_json(
                r#"{"number": "INV-9", "date": "01/04/2026", "client": "Martin",
                     "lines": [{"label": "Vase", "prix": 25.0}], "payment": "virement"}"#,
            )
            .await
            .unwrap();
        assert!(outcome.created);

        let sale = db.sales().get_by_id(&outcome.sale_id).await.unwrap().unwrap();
        assert_eq!(sale.payment_method, till_core::PaymentMethod::Transfer);
        assert_eq!(sale.sale_date, "2026-04-01");
    }
}
