//! # Sale Draft Validation
//!
//! Input shapes for recording a sale, and the rules checked before anything
//! is persisted.

use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{CheckDetail, ManualInvoice, PaymentMethod};

// =============================================================================
// Draft Types
// =============================================================================

/// A sale as submitted by a caller, before enrichment and persistence.
#[derive(Debug, Clone)]
pub struct SaleDraft {
    pub vendor_id: String,
    pub vendor_name: String,
    pub payment_method: PaymentMethod,
    pub lines: Vec<LineDraft>,
    /// When set, must equal the computed sum of line totals.
    pub declared_total_cents: Option<i64>,
    pub check_detail: Option<CheckDetail>,
    pub manual_invoice: Option<ManualInvoice>,
    pub cart_mode: Option<String>,
    /// Caller-supplied timestamp; `None` means "now". Backfilled and
    /// imported sales pass their own.
    pub timestamp: Option<DateTime<Utc>>,
}

/// One line of a sale draft.
#[derive(Debug, Clone)]
pub struct LineDraft {
    pub product_id: Option<String>,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub category: Option<String>,
}

impl LineDraft {
    #[inline]
    pub fn line_total_cents(&self) -> i64 {
        self.unit_price_cents * self.quantity
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Validates a sale draft and returns its computed total in cents.
///
/// ## Rules
/// - vendor id and name are required
/// - at least one line, each with a name and positive quantity
/// - a declared total, when present, must equal the sum of line totals
pub fn validate_sale_draft(draft: &SaleDraft) -> CoreResult<i64> {
    if draft.vendor_id.trim().is_empty() {
        return Err(ValidationError::required("vendor_id").into());
    }
    if draft.vendor_name.trim().is_empty() {
        return Err(ValidationError::required("vendor_name").into());
    }
    if draft.lines.is_empty() {
        return Err(CoreError::EmptySale);
    }

    for line in &draft.lines {
        if line.name.trim().is_empty() {
            return Err(ValidationError::required("line.name").into());
        }
        if line.quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "line.quantity".to_string(),
            }
            .into());
        }
    }

    let computed: i64 = draft.lines.iter().map(LineDraft::line_total_cents).sum();
    if let Some(declared) = draft.declared_total_cents {
        if declared != computed {
            return Err(CoreError::TotalMismatch {
                declared,
                computed,
            });
        }
    }

    Ok(computed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> SaleDraft {
        SaleDraft {
            vendor_id: "v1".into(),
            vendor_name: "Alice".into(),
            payment_method: PaymentMethod::Card,
            lines: vec![LineDraft {
                product_id: None,
                name: "Mug".into(),
                unit_price_cents: 1200,
                quantity: 2,
                category: Some("ceramics".into()),
            }],
            declared_total_cents: None,
            check_detail: None,
            manual_invoice: None,
            cart_mode: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_computes_total_from_lines() {
        assert_eq!(validate_sale_draft(&draft()).unwrap(), 2400);
    }

    #[test]
    fn test_declared_total_must_match() {
        let mut d = draft();
        d.declared_total_cents = Some(2400);
        assert!(validate_sale_draft(&d).is_ok());

        d.declared_total_cents = Some(2500);
        assert!(matches!(
            validate_sale_draft(&d),
            Err(CoreError::TotalMismatch {
                declared: 2500,
                computed: 2400
            })
        ));
    }

    #[test]
    fn test_rejects_empty_sale() {
        let mut d = draft();
        d.lines.clear();
        assert!(matches!(validate_sale_draft(&d), Err(CoreError::EmptySale)));
    }

    #[test]
    fn test_rejects_non_positive_quantity() {
        let mut d = draft();
        d.lines[0].quantity = 0;
        assert!(validate_sale_draft(&d).is_err());
    }
}
