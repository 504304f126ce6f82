//! # till-db: Record Store for the Till Ledger Engine
//!
//! Keyed persistent tables over SQLite, with range-queryable compound
//! indexes, embedded migrations, and one repository per table family.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Till Data Flow                                   │
//! │                                                                         │
//! │  till-engine service (record sale, ingest invoice, RAZ, ...)           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     till-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │ (sale, stock, │    │  (embedded)  │  │   │
//! │  │   │               │    │  session, ...)│    │              │  │   │
//! │  │   │ SqlitePool    │◄───│               │    │ 001_init.sql │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file (WAL mode) or :memory: in tests                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - A write is durable before success is observed (WAL + NORMAL synchronous)
//! - Index scans return all matches in index order, without duplicates
//! - Duplicate primary keys surface as [`DbError::UniqueViolation`], never
//!   silently dropped
//! - Store unavailability surfaces as retryable connection errors

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::cache::CacheRepository;
pub use repository::cart::CartRepository;
pub use repository::history::HistoryRepository;
pub use repository::invoice::InvoiceRepository;
pub use repository::pending::PendingPaymentRepository;
pub use repository::sale::SaleRepository;
pub use repository::session::SessionRepository;
pub use repository::stock::StockRepository;
pub use repository::vendor::VendorRepository;
