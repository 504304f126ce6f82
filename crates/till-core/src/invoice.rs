//! # External Invoice Normalization
//!
//! External sale events arrive as JSON invoices with heterogeneous field
//! spellings (different export tools, different generations of the online
//! channel). This module is the single adapter that turns them into one
//! canonical shape; no call site probes raw fields.
//!
//! ## Normalization Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Invoice Normalization                               │
//! │                                                                         │
//! │  raw JSON ──► RawInvoicePayload (serde aliases absorb spellings)       │
//! │                    │                                                    │
//! │                    ▼                                                    │
//! │              normalize()                                                │
//! │                    │  reject: missing invoice number / date / client   │
//! │                    │  default: 0 price, generic name, 20% VAT, qty 1   │
//! │                    │  convert: float euros → integer cents (once)      │
//! │                    ▼                                                    │
//! │              NormalizedInvoice (canonical, validated)                  │
//! │                    │                                                    │
//! │                    ▼                                                    │
//! │              Ingestion Gateway (idempotent upsert)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::money::{Money, VatRate};
use crate::types::PaymentMethod;
use crate::{ASSUMED_VAT_BPS, CHANNEL_VENDOR_ID, CHANNEL_VENDOR_NAME, GENERIC_ARTICLE_NAME};

// =============================================================================
// Raw Payload (wire shape)
// =============================================================================

/// An external invoice payload as delivered, before validation.
///
/// Aliases cover the spellings observed across delivery channels; absent
/// fields stay `None` and receive documented defaults during normalization.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawInvoicePayload {
    #[serde(alias = "invoiceNumber", alias = "number", alias = "numero")]
    pub invoice_number: Option<String>,

    #[serde(alias = "invoiceDate", alias = "date")]
    pub invoice_date: Option<String>,

    #[serde(alias = "clientName", alias = "client", alias = "customer")]
    pub client_name: Option<String>,

    #[serde(alias = "lines", alias = "articles")]
    pub items: Vec<RawInvoiceLine>,

    #[serde(alias = "totalHt", alias = "totalHT")]
    pub total_ht: Option<f64>,

    #[serde(alias = "totalVat", alias = "totalTva", alias = "totalTVA")]
    pub total_vat: Option<f64>,

    #[serde(alias = "totalTtc", alias = "totalTTC", alias = "total")]
    pub total_ttc: Option<f64>,

    #[serde(alias = "paymentMethod", alias = "payment")]
    pub payment_method: Option<String>,

    /// Deduplication key; defaults to the invoice number when absent.
    #[serde(alias = "idempotencyKey")]
    pub idempotency_key: Option<String>,

    #[serde(alias = "vendorId")]
    pub vendor_id: Option<String>,

    #[serde(alias = "vendorName", alias = "vendor")]
    pub vendor_name: Option<String>,

    /// Delivery channel metadata (informational only).
    pub channel: Option<String>,
}

/// One line of a raw invoice payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawInvoiceLine {
    pub sku: Option<String>,

    #[serde(alias = "label", alias = "designation")]
    pub name: Option<String>,

    #[serde(alias = "qty", alias = "quantite")]
    pub quantity: Option<f64>,

    #[serde(alias = "unitPriceHt", alias = "unitPrice", alias = "price", alias = "prix")]
    pub unit_price_ht: Option<f64>,

    #[serde(alias = "vatRate", alias = "tva")]
    pub vat_rate: Option<f64>,
}

// =============================================================================
// Canonical Shape
// =============================================================================

/// A validated, canonical external invoice. All amounts in cents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedInvoice {
    pub idempotency_key: String,
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub client_name: String,
    pub vendor_id: String,
    pub vendor_name: String,
    pub lines: Vec<NormalizedInvoiceLine>,
    pub total_ht_cents: i64,
    pub total_vat_cents: i64,
    pub total_ttc_cents: i64,
    pub payment_method: PaymentMethod,
    pub channel: Option<String>,
}

/// One canonical invoice line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedInvoiceLine {
    pub sku: Option<String>,
    pub name: String,
    pub quantity: i64,
    pub unit_price_ht_cents: i64,
    pub vat_rate_bps: u32,
    pub line_ht_cents: i64,
    pub line_ttc_cents: i64,
}

// =============================================================================
// Normalization
// =============================================================================

/// Date formats accepted from delivery channels, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];

fn parse_invoice_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    // RFC3339 timestamps keep only their date part
    let candidate = raw.split('T').next().unwrap_or(raw).trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(candidate, format) {
            return Ok(date);
        }
    }
    Err(ValidationError::invalid_format("invoice_date", raw))
}

fn require<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::required(field)),
    }
}

impl RawInvoicePayload {
    /// Normalizes the payload into the canonical invoice shape.
    ///
    /// ## Rejections
    /// Missing invoice number, invoice date, or client name.
    ///
    /// ## Defaults (best effort, documented)
    /// - line name: `"Article"`
    /// - unit price: 0
    /// - quantity: 1
    /// - VAT rate: assumed 20%
    /// - payment method: transfer
    /// - vendor: the online channel vendor
    /// - idempotency key: the invoice number
    pub fn normalize(&self) -> Result<NormalizedInvoice, ValidationError> {
        let invoice_number = require(&self.invoice_number, "invoice_number")?.to_string();
        let invoice_date = parse_invoice_date(require(&self.invoice_date, "invoice_date")?)?;
        let client_name = require(&self.client_name, "client_name")?.to_string();

        let mut lines = Vec::with_capacity(self.items.len());
        let mut computed_ht = Money::zero();
        let mut computed_vat = Money::zero();

        for item in &self.items {
            let quantity = item.quantity.map(|q| q.round() as i64).unwrap_or(1).max(1);
            let unit_price = Money::from_euros(item.unit_price_ht.unwrap_or(0.0));
            let vat_rate = item
                .vat_rate
                .map(VatRate::from_percentage)
                .unwrap_or(VatRate::from_bps(ASSUMED_VAT_BPS));

            let line_ht = unit_price * quantity;
            let line_vat = line_ht.vat(vat_rate);
            computed_ht += line_ht;
            computed_vat += line_vat;

            lines.push(NormalizedInvoiceLine {
                sku: item.sku.clone(),
                name: item
                    .name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .unwrap_or(GENERIC_ARTICLE_NAME)
                    .to_string(),
                quantity,
                unit_price_ht_cents: unit_price.cents(),
                vat_rate_bps: vat_rate.bps(),
                line_ht_cents: line_ht.cents(),
                line_ttc_cents: (line_ht + line_vat).cents(),
            });
        }

        // Declared totals win over computed ones; the channel's accounting
        // is authoritative for what was actually billed.
        let total_ht = self.total_ht.map(Money::from_euros).unwrap_or(computed_ht);
        let total_vat = self
            .total_vat
            .map(Money::from_euros)
            .unwrap_or(computed_vat);
        let total_ttc = self
            .total_ttc
            .map(Money::from_euros)
            .unwrap_or(total_ht + total_vat);

        let payment_method = self
            .payment_method
            .as_deref()
            .and_then(PaymentMethod::parse_loose)
            .unwrap_or(PaymentMethod::Transfer);

        Ok(NormalizedInvoice {
            idempotency_key: self
                .idempotency_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .unwrap_or(&invoice_number)
                .to_string(),
            invoice_number,
            invoice_date,
            client_name,
            vendor_id: self
                .vendor_id
                .clone()
                .unwrap_or_else(|| CHANNEL_VENDOR_ID.to_string()),
            vendor_name: self
                .vendor_name
                .clone()
                .unwrap_or_else(|| CHANNEL_VENDOR_NAME.to_string()),
            lines,
            total_ht_cents: total_ht.cents(),
            total_vat_cents: total_vat.cents(),
            total_ttc_cents: total_ttc.cents(),
            payment_method,
            channel: self.channel.clone(),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{
            "invoiceNumber": "INV-1",
            "invoiceDate": "2026-03-15",
            "clientName": "Dupont",
            "items": [
                {"name": "Bol", "qty": 2, "unitPriceHt": 10.0, "vatRate": 20.0}
            ]
        }"#
    }

    #[test]
    fn test_normalizes_aliased_fields() {
        let raw: RawInvoicePayload = serde_json::from_str(minimal_json()).unwrap();
        let invoice = raw.normalize().unwrap();

        assert_eq!(invoice.invoice_number, "INV-1");
        assert_eq!(invoice.idempotency_key, "INV-1"); // defaults to number
        assert_eq!(invoice.invoice_date, NaiveDate::from_ymd_opt(2026, 3, 15).unwrap());
        assert_eq!(invoice.client_name, "Dupont");
        assert_eq!(invoice.lines.len(), 1);
        assert_eq!(invoice.lines[0].quantity, 2);
        assert_eq!(invoice.lines[0].line_ht_cents, 2000);
        assert_eq!(invoice.total_ht_cents, 2000);
        assert_eq!(invoice.total_vat_cents, 400);
        assert_eq!(invoice.total_ttc_cents, 2400);
        assert_eq!(invoice.payment_method, PaymentMethod::Transfer);
    }

    #[test]
    fn test_rejects_missing_required_fields() {
        let raw: RawInvoicePayload =
            serde_json::from_str(r#"{"invoiceDate": "2026-03-15", "client": "Dupont"}"#).unwrap();
        assert!(matches!(
            raw.normalize(),
            Err(ValidationError::Required { ref field }) if field == "invoice_number"
        ));

        let raw: RawInvoicePayload =
            serde_json::from_str(r#"{"number": "INV-2", "client": "Dupont"}"#).unwrap();
        assert!(matches!(
            raw.normalize(),
            Err(ValidationError::Required { ref field }) if field == "invoice_date"
        ));

        let raw: RawInvoicePayload =
            serde_json::from_str(r#"{"number": "INV-2", "date": "2026-03-15"}"#).unwrap();
        assert!(matches!(
            raw.normalize(),
            Err(ValidationError::Required { ref field }) if field == "client_name"
        ));
    }

    #[test]
    fn test_best_effort_defaults() {
        let raw: RawInvoicePayload = serde_json::from_str(
            r#"{
                "number": "INV-3",
                "date": "15/03/2026",
                "client": "Martin",
                "articles": [{}]
            }"#,
        )
        .unwrap();
        let invoice = raw.normalize().unwrap();

        let line = &invoice.lines[0];
        assert_eq!(line.name, GENERIC_ARTICLE_NAME);
        assert_eq!(line.quantity, 1);
        assert_eq!(line.unit_price_ht_cents, 0);
        assert_eq!(line.vat_rate_bps, ASSUMED_VAT_BPS);
        assert_eq!(invoice.vendor_id, CHANNEL_VENDOR_ID);
    }

    #[test]
    fn test_declared_totals_win() {
        let raw: RawInvoicePayload = serde_json::from_str(
            r#"{
                "number": "INV-4",
                "date": "2026-03-15",
                "client": "Durand",
                "items": [{"name": "Vase", "qty": 1, "price": 100.0}],
                "totalTTC": 150.0
            }"#,
        )
        .unwrap();
        let invoice = raw.normalize().unwrap();
        assert_eq!(invoice.total_ttc_cents, 15_000);
    }

    #[test]
    fn test_rfc3339_date_accepted() {
        let raw: RawInvoicePayload = serde_json::from_str(
            r#"{"number": "INV-5", "date": "2026-03-15T10:30:00Z", "client": "X"}"#,
        )
        .unwrap();
        let invoice = raw.normalize().unwrap();
        assert_eq!(invoice.invoice_date, NaiveDate::from_ymd_opt(2026, 3, 15).unwrap());
    }

    #[test]
    fn test_unparseable_date_rejected() {
        let raw: RawInvoicePayload = serde_json::from_str(
            r#"{"number": "INV-6", "date": "yesterday", "client": "X"}"#,
        )
        .unwrap();
        assert!(matches!(
            raw.normalize(),
            Err(ValidationError::InvalidFormat { ref field, .. }) if field == "invoice_date"
        ));
    }
}
