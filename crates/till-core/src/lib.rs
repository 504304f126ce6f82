//! # till-core: Pure Business Logic for the Till Ledger Engine
//!
//! This crate is the **heart** of Till. It contains all business logic as
//! pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Till Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 UI / external collaborators                     │   │
//! │  │   catalog views ── history viewer ── export/email stubs         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                   till-engine (services)                        │   │
//! │  │   record/cancel sales, sessions, ingestion, RAZ, triggers       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                ★ till-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │ temporal  │  │  invoice  │  │   │
//! │  │   │ Sale/Stock│  │   Money   │  │ DateParts │  │ normalize │  │   │
//! │  │   │ Session.. │  │  VatRate  │  │           │  │           │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK READS • PURE FUNCTIONS       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    till-db (Record Store)                       │   │
//! │  │              SQLite queries, migrations, repositories           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain records (Sale, Vendor, Stock, Session, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`temporal`] - Date partition derivation for sales
//! - [`invoice`] - External invoice payload normalization
//! - [`validation`] - Business rule validation
//! - [`error`] - Domain error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod invoice;
pub mod money;
pub mod temporal;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use invoice::{NormalizedInvoice, NormalizedInvoiceLine, RawInvoiceLine, RawInvoicePayload};
pub use money::{Money, VatRate};
pub use temporal::DateParts;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Assumed VAT rate in basis points (2000 bps = 20%), applied when an
/// external invoice line does not declare its own rate.
pub const ASSUMED_VAT_BPS: u32 = 2000;

/// Fallback article name for external invoice lines that carry no label.
pub const GENERIC_ARTICLE_NAME: &str = "Article";

/// Vendor identity that external invoices are attributed to when the
/// payload names no vendor of its own.
pub const CHANNEL_VENDOR_ID: &str = "online";
pub const CHANNEL_VENDOR_NAME: &str = "Online channel";
