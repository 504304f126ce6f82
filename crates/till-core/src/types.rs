//! # Domain Types
//!
//! Core record types for the Till ledger engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Records                                  │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Sale       │   │     Vendor      │   │      Stock      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id             │   │  product_id     │       │
//! │  │  total_cents    │   │  aggregates     │   │  physical_stock │       │
//! │  │  date partitions│   │  (recomputed)   │   │  (clamped ≥ 0)  │       │
//! │  │  canceled flag  │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  StockMovement  │   │     Session     │   │ RazHistoryEntry │       │
//! │  │  append-only    │   │  at most one    │   │  immutable      │       │
//! │  │  signed deltas  │   │  open at a time │   │  snapshot       │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Log vs. Derived
//! `sales`, `sale_lines` and `stock_movements` are the raw log: append-only
//! (sales gain a `canceled` flag but are never deleted outside RAZ). Vendor
//! aggregates and `physical_stock` are derived from the log by the engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Payment Method
// =============================================================================

/// How a sale was settled.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Cash,
    Check,
    /// Split tender across several methods.
    Multi,
    /// Bank transfer, the usual settlement for ingested external invoices.
    Transfer,
}

impl PaymentMethod {
    /// Loose parsing for external payloads ("CB", "espèces", "cheque", ...).
    ///
    /// Returns `None` for unrecognized spellings so callers can apply their
    /// own default.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "card" | "cb" | "carte" | "credit" | "debit" => Some(PaymentMethod::Card),
            "cash" | "especes" | "espèces" | "liquide" => Some(PaymentMethod::Cash),
            "check" | "cheque" | "chèque" => Some(PaymentMethod::Check),
            "multi" | "mixte" | "mixed" => Some(PaymentMethod::Multi),
            "transfer" | "virement" | "wire" => Some(PaymentMethod::Transfer),
            _ => None,
        }
    }

    /// Stable storage label, matching the TEXT column values.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Check => "check",
            PaymentMethod::Multi => "multi",
            PaymentMethod::Transfer => "transfer",
        }
    }
}

// =============================================================================
// Totals by Payment Method
// =============================================================================

/// Cents totals broken down per payment method.
///
/// Used for session closing totals and RAZ snapshots (JSON column).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalsByMethod {
    pub card_cents: i64,
    pub cash_cents: i64,
    pub check_cents: i64,
    pub multi_cents: i64,
    pub transfer_cents: i64,
}

impl TotalsByMethod {
    /// Adds an amount under the given method.
    pub fn add(&mut self, method: PaymentMethod, amount_cents: i64) {
        match method {
            PaymentMethod::Card => self.card_cents += amount_cents,
            PaymentMethod::Cash => self.cash_cents += amount_cents,
            PaymentMethod::Check => self.check_cents += amount_cents,
            PaymentMethod::Multi => self.multi_cents += amount_cents,
            PaymentMethod::Transfer => self.transfer_cents += amount_cents,
        }
    }

    /// Grand total across all methods.
    pub fn total_cents(&self) -> i64 {
        self.card_cents + self.cash_cents + self.check_cents + self.multi_cents + self.transfer_cents
    }
}

// =============================================================================
// Sale
// =============================================================================

/// A recorded sale.
///
/// Line items live in `sale_lines` (see [`SaleLine`]); nested optional
/// detail (check payment, manual invoice metadata) is stored as JSON.
///
/// ## Invariants
/// - `total_cents` equals the sum of line totals at creation time
/// - canceled sales are excluded from aggregates but never deleted
/// - date partition fields are derived once, at creation, from the
///   caller-supplied timestamp (backfilled sales keep their own date)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    pub id: String,
    pub vendor_id: String,
    pub vendor_name: String,
    pub total_cents: i64,
    pub payment_method: PaymentMethod,
    pub canceled: bool,
    pub created_at: DateTime<Utc>,

    // Derived date partitions (Temporal Indexer output)
    pub timestamp_ms: i64,
    /// ISO calendar date, `YYYY-MM-DD`.
    pub sale_date: String,
    pub year: i32,
    /// 1-12.
    pub month: u32,
    /// 0-based from Jan 1 of `year`.
    pub day_of_year: u32,

    /// Check payment breakdown, when `payment_method` is `Check`.
    pub check_detail: Option<CheckDetail>,
    /// Metadata for sales entered as manual invoices.
    pub manual_invoice: Option<ManualInvoice>,
    /// Tag set when the sale was produced from cart mode.
    pub cart_mode: Option<String>,
}

/// A line item of a sale.
///
/// Product data is frozen at sale time (snapshot pattern): later catalog
/// changes never rewrite history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleLine {
    pub id: String,
    pub sale_id: String,
    /// Product reference, when the line maps to tracked stock.
    pub product_id: Option<String>,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub category: Option<String>,
    pub line_total_cents: i64,
    pub created_at: DateTime<Utc>,
}

/// Check payment breakdown attached to a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDetail {
    pub check_count: i64,
    pub per_check_cents: i64,
    pub total_cents: i64,
    pub notes: Option<String>,
}

/// Metadata for sales entered as manual invoices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualInvoice {
    pub invoice_number: String,
    pub client_name: Option<String>,
}

// =============================================================================
// Cart Item
// =============================================================================

/// A working-cart line, persisted so an interrupted cart survives restart.
///
/// Cleared by RAZ. Indexed by (category, added_at).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub id: String,
    pub product_id: Option<String>,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub category: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl CartItem {
    /// Line total (unit price × quantity).
    #[inline]
    pub fn line_total_cents(&self) -> i64 {
        self.unit_price_cents * self.quantity
    }
}

// =============================================================================
// Vendor
// =============================================================================

/// A vendor and their derived sale aggregates.
///
/// ## Invariant
/// Aggregate columns are a pure function of non-canceled sales for this
/// vendor. They are always fully recomputed on trigger, never incrementally
/// patched: incremental patching diverges as soon as a trigger fires twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub id: String,
    pub name: String,
    /// UI color tag.
    pub color: Option<String>,
    pub daily_sales_cents: i64,
    pub total_sales_cents: i64,
    pub sales_count: i64,
    pub average_ticket_cents: i64,
    /// ISO date of the most recent non-canceled sale.
    pub last_sale_date: Option<String>,
    pub last_update: DateTime<Utc>,
}

impl Vendor {
    /// A fresh vendor with zeroed aggregates.
    pub fn new(id: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Vendor {
            id: id.into(),
            name: name.into(),
            color: None,
            daily_sales_cents: 0,
            total_sales_cents: 0,
            sales_count: 0,
            average_ticket_cents: 0,
            last_sale_date: None,
            last_update: now,
        }
    }
}

/// One vendor's rollup for one calendar date.
///
/// Derived by the Aggregate Maintainer alongside the vendor aggregates;
/// like them, always recomputed from the sale log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorAnalytics {
    pub vendor_id: String,
    /// ISO calendar date, `YYYY-MM-DD`.
    pub date: String,
    pub total_cents: i64,
    pub sales_count: i64,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Stock
// =============================================================================

/// Stock position for one product.
///
/// ## Invariant
/// `physical_stock` ≥ 0 always. Movements that would drive it negative are
/// clamped at zero; the movement log keeps the unclamped quantity for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stock {
    pub product_id: String,
    pub category: Option<String>,
    pub product_name: String,
    pub general_stock: i64,
    pub physical_stock: i64,
    pub min_stock: i64,
    pub last_update: DateTime<Utc>,
}

/// Kind of stock movement.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Sale,
    Restock,
    Adjustment,
    Invoice,
}

impl MovementType {
    /// Decrementing types clamp `physical_stock` at zero instead of going
    /// negative; incrementing types apply as-is.
    pub fn clamps_at_zero(&self) -> bool {
        matches!(self, MovementType::Sale | MovementType::Invoice)
    }
}

/// An append-only signed stock delta.
///
/// Never mutated or deleted, even when the derived stock level was clamped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: String,
    pub product_id: String,
    pub movement_type: MovementType,
    /// Signed quantity delta (negative for outgoing stock).
    pub quantity: i64,
    pub vendor_id: Option<String>,
    pub sale_id: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Session
// =============================================================================

/// Session lifecycle status.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Closed,
}

/// Event metadata attached to a session (fair, market, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub name: String,
    pub starts_on: Option<NaiveDate>,
    pub ends_on: Option<NaiveDate>,
}

/// A bounded working period.
///
/// ## Invariant
/// At most one session has `status = open`. The store offers no cross-row
/// uniqueness constraint, so every mutation path re-checks this defensively
/// (see the Session Manager).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub opened_at: DateTime<Utc>,
    pub opened_by: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
    pub event: Option<SessionEvent>,
    /// Totals per payment method, computed at close.
    pub closing_totals: Option<TotalsByMethod>,
}

impl Session {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }
}

// =============================================================================
// Settings & Cache
// =============================================================================

/// A key-value setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// A TTL cache entry with tag-based invalidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// JSON-encoded value.
    pub value: String,
    /// `None` = never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

impl CacheEntry {
    /// Whether the entry is expired at the given instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }
}

// =============================================================================
// Pending Payments
// =============================================================================

/// A check payment awaiting deposit.
///
/// Created when a sale settles by check; purged only by the end-of-session
/// RAZ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPayment {
    pub id: String,
    pub sale_id: String,
    pub vendor_id: String,
    pub amount_cents: i64,
    pub check_count: i64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// RAZ History
// =============================================================================

/// Which reset variant produced a history entry.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RazKind {
    /// Clears working sales/cart/invoice state; the session stays open.
    Daily,
    /// Additionally purges pending payments and closes the session.
    EndOfSession,
}

/// Per-vendor slice of a RAZ snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorBreakdown {
    pub vendor_id: String,
    pub vendor_name: String,
    pub total_cents: i64,
    pub sales_count: i64,
}

/// Immutable snapshot written by the Reset/Archive Service before clearing.
///
/// Created only by RAZ; delete is the only post-creation mutation allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RazHistoryEntry {
    pub id: String,
    pub kind: RazKind,
    pub session_id: Option<String>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub totals: TotalsByMethod,
    pub vendor_breakdown: Vec<VendorBreakdown>,
    pub sale_count: i64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_method_parse_loose() {
        assert_eq!(PaymentMethod::parse_loose("CB"), Some(PaymentMethod::Card));
        assert_eq!(
            PaymentMethod::parse_loose("Virement"),
            Some(PaymentMethod::Transfer)
        );
        assert_eq!(
            PaymentMethod::parse_loose(" chèque "),
            Some(PaymentMethod::Check)
        );
        assert_eq!(PaymentMethod::parse_loose("bitcoin"), None);
    }

    #[test]
    fn test_totals_by_method() {
        let mut totals = TotalsByMethod::default();
        totals.add(PaymentMethod::Card, 1000);
        totals.add(PaymentMethod::Cash, 500);
        totals.add(PaymentMethod::Card, 250);
        assert_eq!(totals.card_cents, 1250);
        assert_eq!(totals.total_cents(), 1750);
    }

    #[test]
    fn test_movement_clamping_types() {
        assert!(MovementType::Sale.clamps_at_zero());
        assert!(MovementType::Invoice.clamps_at_zero());
        assert!(!MovementType::Restock.clamps_at_zero());
        assert!(!MovementType::Adjustment.clamps_at_zero());
    }

    #[test]
    fn test_cache_entry_expiry() {
        let now = Utc::now();
        let live = CacheEntry {
            key: "k".into(),
            value: "1".into(),
            expires_at: Some(now + chrono::Duration::seconds(60)),
            tags: vec![],
        };
        let dead = CacheEntry {
            expires_at: Some(now - chrono::Duration::seconds(1)),
            ..live.clone()
        };
        let eternal = CacheEntry {
            expires_at: None,
            ..live.clone()
        };
        assert!(!live.is_expired(now));
        assert!(dead.is_expired(now));
        assert!(!eternal.is_expired(now));
    }
}
