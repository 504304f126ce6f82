//! # till-engine: Ledger Services for Till
//!
//! The consistency core over the record store: everything with real
//! invariants, concurrency concerns, and failure semantics lives here.
//!
//! ## Service Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         LedgerEngine                                    │
//! │                                                                         │
//! │  UI / collaborators                                                     │
//! │    │        │           │            │             │                    │
//! │    ▼        ▼           ▼            ▼             ▼                    │
//! │  Sales   Cancellation  Session    Ingestion     Reset/Archive          │
//! │  Service Service       Manager    Gateway       Service (RAZ)          │
//! │    │        │           │            │             │                    │
//! │    └────────┴─────┬─────┴────────────┴─────────────┘                    │
//! │                   ▼                                                     │
//! │          Record Store (till-db) ──► ChangeBus ──► Aggregate            │
//! │                                                   Maintainer           │
//! │                                                                         │
//! │  Raw log tables are synchronously consistent; derived aggregates are   │
//! │  eventually consistent (drained triggers, dirty-set retry).            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use till_db::{Database, DbConfig};
//! use till_engine::LedgerEngine;
//!
//! let db = Database::new(DbConfig::new("till.db")).await?;
//! let engine = LedgerEngine::new(db);
//! engine.start_maintainer();
//!
//! // Bracket the working period
//! engine.sessions().ensure_session(Some("operator")).await?;
//!
//! // Record and cancel sales, ingest invoices...
//! let sale = engine.sales().record_sale(draft).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod aggregates;
pub mod cancel;
pub mod error;
pub mod events;
pub mod ingest;
pub mod raz;
pub mod sales;
pub mod session;
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

pub use aggregates::AggregateMaintainer;
pub use cancel::CancellationService;
pub use error::{EngineError, EngineResult};
pub use events::{ChangeBus, TableEvent};
pub use ingest::{BatchReport, IngestGateway, IngestOutcome};
pub use raz::{RazPhase, RazReport, RazRequest, ResetService};
pub use sales::SalesService;
pub use session::SessionManager;
pub use telemetry::init_tracing;

use std::sync::Arc;

use till_db::Database;

/// The assembled ledger engine: one handle wiring every service to the
/// same store and change bus.
///
/// ## Lifecycle
/// Initialized once at startup; `ensure_session` brackets the working
/// period; all mutations flow through the service accessors. There is no
/// teardown state beyond what the store persists.
#[derive(Debug)]
pub struct LedgerEngine {
    db: Database,
    bus: ChangeBus,
    maintainer: Arc<AggregateMaintainer>,
    sessions: Arc<SessionManager>,
    sales: SalesService,
    cancel: CancellationService,
    ingest: IngestGateway,
    raz: ResetService,
}

impl LedgerEngine {
    /// Wires the services over an opened database.
    pub fn new(db: Database) -> Self {
        let bus = ChangeBus::new();
        let maintainer = Arc::new(AggregateMaintainer::new(db.clone()));
        let sessions = Arc::new(SessionManager::new(db.clone(), bus.clone()));

        let sales = SalesService::new(db.clone(), Arc::clone(&maintainer), bus.clone());
        let cancel = CancellationService::new(db.clone(), Arc::clone(&maintainer), bus.clone());
        let ingest = IngestGateway::new(db.clone(), Arc::clone(&maintainer), bus.clone());
        let raz = ResetService::new(
            db.clone(),
            Arc::clone(&sessions),
            Arc::clone(&maintainer),
            bus.clone(),
        );

        LedgerEngine {
            db,
            bus,
            maintainer,
            sessions,
            sales,
            cancel,
            ingest,
            raz,
        }
    }

    /// Spawns the maintainer's bus listener (background trigger path).
    pub fn start_maintainer(&self) -> tokio::task::JoinHandle<()> {
        self.maintainer.spawn_listener(&self.bus)
    }

    /// The underlying record store.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// The change bus (subscribe for dependent views).
    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    /// The aggregate maintainer.
    pub fn maintainer(&self) -> &Arc<AggregateMaintainer> {
        &self.maintainer
    }

    /// The sale recording service.
    pub fn sales(&self) -> &SalesService {
        &self.sales
    }

    /// The session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// The cancellation service.
    pub fn cancellation(&self) -> &CancellationService {
        &self.cancel
    }

    /// The external ingestion gateway.
    pub fn ingest(&self) -> &IngestGateway {
        &self.ingest
    }

    /// The reset/archive service.
    pub fn raz(&self) -> &ResetService {
        &self.raz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use till_core::PaymentMethod;
    use till_db::DbConfig;

    #[tokio::test]
    async fn test_engine_end_to_end() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = LedgerEngine::new(db);

        // Bracket the working period
        let session = engine.sessions().ensure_session(Some("operator")).await.unwrap();

        // Point-of-sale sale + external invoice through one machinery
        let sale = engine
            .sales()
            .record_sale(crate::sales::tests::card_draft("v1", 10_000))
            .await
            .unwrap();
        engine
            .ingest()
            .ingest_json(
                r#"{"number": "INV-1", "date": "2026-08-06", "client": "Dupont",
                     "items": [{"name": "Bol", "qty": 1, "price": 50.0}]}"#,
            )
            .await
            .unwrap();

        // Cancel the POS sale; its vendor zeroes out
        engine.cancellation().cancel_specific_sale(&sale.id).await.unwrap();
        let v1 = engine.db().vendors().get("v1").await.unwrap().unwrap();
        assert_eq!(v1.total_sales_cents, 0);

        // The invoice sale survives into the archive
        let report = engine
            .raz()
            .run(RazRequest {
                kind: till_core::RazKind::Daily,
                confirmed: true,
                double_confirmed: false,
                operator: None,
            })
            .await
            .unwrap();
        assert_eq!(report.archived_sales, 1);
        assert_eq!(report.archived_total_cents, 6_000); // 50.00 HT + 20% VAT
        assert_eq!(report.cleared_sales, 2);

        // Session survived the daily reset
        assert_eq!(
            engine.sessions().current().await.unwrap().unwrap().id,
            session.id
        );
    }

    #[tokio::test]
    async fn test_listener_recomputes_from_bus_events() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = LedgerEngine::new(db);
        let handle = engine.start_maintainer();

        engine
            .sales()
            .record_sale({
                let mut draft = crate::sales::tests::card_draft("v1", 700);
                draft.payment_method = PaymentMethod::Cash;
                draft
            })
            .await
            .unwrap();

        let v1 = engine.db().vendors().get("v1").await.unwrap().unwrap();
        assert_eq!(v1.total_sales_cents, 700);

        handle.abort();
    }
}
