use crate::error::{Result, RollupError};
use crate::invoices::{InvoiceGroup, InvoiceKey};
use crate::schema::{PaymentStatus, SupplierInvoicePayment};
use chrono::{DateTime, Utc};
use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InvoicePaymentView {
    pub key: InvoiceKey,
    pub invoice_total: f64,
    pub status: PaymentStatus,
    pub paid_amount: f64,
    pub pending_amount: f64,
    pub payment_reference: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SupplierPaymentSummary {
    pub supplier_id: String,
    pub supplier_name: String,
    pub pending_count: usize,
    pub partial_count: usize,
    pub paid_count: usize,
    pub pending_amount: f64,
    pub paid_amount: f64,
    pub invoices: Vec<InvoicePaymentView>,
}

impl SupplierPaymentSummary {
    pub fn invoice_count(&self) -> usize {
        self.pending_count + self.partial_count + self.paid_count
    }
}

/// Payment view of one invoice group against its ledger row, if any.
///
/// A stored `partial` row whose amount already covers the total shows a zero
/// balance rather than a negative one; `ReportVerifier` flags that row.
pub fn invoice_payment_view(
    group: &InvoiceGroup,
    payment: Option<&SupplierInvoicePayment>,
) -> InvoicePaymentView {
    let total = group.total_with_gst;

    let (status, paid_amount, pending_amount) = match payment {
        None => (PaymentStatus::Pending, 0.0, total),
        Some(p) => match p.payment_status {
            PaymentStatus::Pending => (PaymentStatus::Pending, 0.0, total),
            PaymentStatus::Partial => {
                let balance = (total - p.payment_amount).max(0.0);
                (PaymentStatus::Partial, p.payment_amount, balance)
            }
            PaymentStatus::Paid => (PaymentStatus::Paid, total, 0.0),
        },
    };

    InvoicePaymentView {
        key: group.key.clone(),
        invoice_total: total,
        status,
        paid_amount,
        pending_amount,
        payment_reference: payment.and_then(|p| p.payment_reference.clone()),
        paid_at: payment.and_then(|p| p.paid_at),
    }
}

/// Merges invoice groups with payment ledger rows into per-supplier summaries,
/// ordered by supplier name.
pub fn summarize_payments(
    groups: &[InvoiceGroup],
    payments: &[SupplierInvoicePayment],
) -> Vec<SupplierPaymentSummary> {
    let ledger: BTreeMap<InvoiceKey, &SupplierInvoicePayment> = payments
        .iter()
        .map(|p| (InvoiceKey::new(p.supplier_id.clone(), p.invoice_number.trim()), p))
        .collect();

    let mut by_supplier: BTreeMap<&str, SupplierPaymentSummary> = BTreeMap::new();

    for group in groups {
        let view = invoice_payment_view(group, ledger.get(&group.key).copied());
        let summary = by_supplier
            .entry(group.key.supplier_id.as_str())
            .or_insert_with(|| SupplierPaymentSummary {
                supplier_id: group.key.supplier_id.clone(),
                supplier_name: group.supplier_name.clone(),
                ..Default::default()
            });

        match view.status {
            PaymentStatus::Pending => summary.pending_count += 1,
            PaymentStatus::Partial => summary.partial_count += 1,
            PaymentStatus::Paid => summary.paid_count += 1,
        }
        summary.pending_amount += view.pending_amount;
        summary.paid_amount += view.paid_amount;
        summary.invoices.push(view);
    }

    let mut summaries: Vec<SupplierPaymentSummary> = by_supplier.into_values().collect();
    summaries.sort_by(|a, b| {
        a.supplier_name
            .cmp(&b.supplier_name)
            .then_with(|| a.supplier_id.cmp(&b.supplier_id))
    });
    summaries
}

/// A payment as entered by the user, before it is folded into the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PaymentEntry {
    pub amount: f64,
    #[serde(default)]
    pub reference: Option<String>,
    pub paid_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Payment ledger of one site: at most one row per supplier invoice.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PaymentLedger {
    site_id: String,
    rows: BTreeMap<InvoiceKey, SupplierInvoicePayment>,
}

impl PaymentLedger {
    pub fn new(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            rows: BTreeMap::new(),
        }
    }

    /// Builds the ledger from fetched rows. Rows for other sites are ignored;
    /// duplicate rows for one invoice keep the larger cumulative amount.
    pub fn from_records(site_id: impl Into<String>, records: &[SupplierInvoicePayment]) -> Self {
        let site_id: String = site_id.into();
        let mut ledger = Self::new(site_id.clone());
        for record in records.iter().filter(|r| r.site_id == site_id) {
            let key = InvoiceKey::new(record.supplier_id.clone(), record.invoice_number.trim());
            let kept = ledger
                .rows
                .get(&key)
                .filter(|existing| existing.payment_amount >= record.payment_amount)
                .map(|existing| existing.id.clone());
            match kept {
                Some(kept_id) => warn!(
                    "Duplicate payment row {} for invoice {} of supplier {}; keeping {}",
                    record.id, key.invoice_number, key.supplier_id, kept_id
                ),
                None => {
                    ledger.rows.insert(key, record.clone());
                }
            }
        }
        ledger
    }

    pub fn get(&self, key: &InvoiceKey) -> Option<&SupplierInvoicePayment> {
        self.rows.get(key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Adds a payment to the invoice's cumulative amount and re-derives its
    /// status, inserting the ledger row on first payment.
    pub fn record_payment(
        &mut self,
        key: &InvoiceKey,
        invoice_total: f64,
        entry: PaymentEntry,
    ) -> Result<&SupplierInvoicePayment> {
        if !entry.amount.is_finite() || entry.amount <= 0.0 {
            return Err(RollupError::validation(
                format!("payment for invoice {}", key.invoice_number),
                format!("amount must be a positive number, got {}", entry.amount),
            ));
        }
        if key.invoice_number.trim().is_empty() {
            return Err(RollupError::validation(
                "payment",
                "invoice number must not be empty",
            ));
        }

        let site_id = self.site_id.clone();
        let row = self
            .rows
            .entry(key.clone())
            .or_insert_with(|| SupplierInvoicePayment {
                id: format!("{}:{}:{}", site_id, key.supplier_id, key.invoice_number),
                site_id,
                supplier_id: key.supplier_id.clone(),
                invoice_number: key.invoice_number.clone(),
                payment_status: PaymentStatus::Pending,
                payment_amount: 0.0,
                payment_reference: None,
                paid_at: None,
                notes: None,
            });

        row.payment_amount += entry.amount;
        row.payment_status = PaymentStatus::derive(row.payment_amount, invoice_total);
        row.paid_at = Some(entry.paid_at);
        if entry.reference.is_some() {
            row.payment_reference = entry.reference;
        }
        if entry.notes.is_some() {
            row.notes = entry.notes;
        }

        info!(
            "Recorded payment of {:.2} against invoice {} ({}): cumulative {:.2} of {:.2}, status {}",
            entry.amount,
            key.invoice_number,
            key.supplier_id,
            row.payment_amount,
            invoice_total,
            row.payment_status.label()
        );

        Ok(row)
    }

    pub fn into_records(self) -> Vec<SupplierInvoicePayment> {
        self.rows.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoices::ComplianceCounts;
    use crate::documents::FacetStatus;
    use chrono::NaiveDate;

    fn group(supplier: &str, name: &str, number: &str, total: f64) -> InvoiceGroup {
        InvoiceGroup {
            key: InvoiceKey::new(supplier, number),
            supplier_name: name.to_string(),
            entries: vec![],
            latest_grn_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            total_without_gst: total,
            total_with_gst: total,
            dc_status: FacetStatus::N,
            dc_counts: ComplianceCounts::default(),
            line_item_compliance: ComplianceCounts::default(),
            total_compliance: ComplianceCounts::default(),
        }
    }

    fn entry(amount: f64) -> PaymentEntry {
        PaymentEntry {
            amount,
            reference: Some("UTR-1".to_string()),
            paid_at: Utc::now(),
            notes: None,
        }
    }

    #[test]
    fn test_partial_then_paid() {
        let key = InvoiceKey::new("acme", "INV-100");
        let mut ledger = PaymentLedger::new("s1");

        let row = ledger.record_payment(&key, 15_000.0, entry(12_000.0)).unwrap();
        assert_eq!(row.payment_status, PaymentStatus::Partial);
        assert!((row.payment_amount - 12_000.0).abs() < 1e-9);

        let row = ledger.record_payment(&key, 15_000.0, entry(3_000.0)).unwrap();
        assert_eq!(row.payment_status, PaymentStatus::Paid);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_overpaid_partial_row_shows_zero_balance() {
        let key = InvoiceKey::new("acme", "INV-9");
        let mut ledger = PaymentLedger::new("s1");
        ledger.record_payment(&key, 5_000.0, entry(1_000.0)).unwrap();
        let mut row = ledger.get(&key).unwrap().clone();
        row.payment_amount = 1_200.0;

        let view = invoice_payment_view(&group("acme", "Acme", "INV-9", 1_000.0), Some(&row));
        assert_eq!(view.status, PaymentStatus::Partial);
        assert!((view.paid_amount - 1_200.0).abs() < 1e-9);
        assert_eq!(view.pending_amount, 0.0);
    }

    #[test]
    fn test_rejects_non_positive_amounts() {
        let key = InvoiceKey::new("acme", "INV-100");
        let mut ledger = PaymentLedger::new("s1");
        assert!(ledger.record_payment(&key, 100.0, entry(0.0)).is_err());
        assert!(ledger.record_payment(&key, 100.0, entry(-5.0)).is_err());
        assert!(ledger.record_payment(&key, 100.0, entry(f64::NAN)).is_err());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_summary_amounts_per_status() {
        let groups = vec![
            group("acme", "Acme", "INV-1", 15_000.0),
            group("acme", "Acme", "INV-2", 2_000.0),
            group("acme", "Acme", "INV-3", 500.0),
            group("bolt", "Bolt Traders", "B-1", 700.0),
        ];
        let mut ledger = PaymentLedger::new("s1");
        ledger
            .record_payment(&InvoiceKey::new("acme", "INV-1"), 15_000.0, entry(12_000.0))
            .unwrap();
        ledger
            .record_payment(&InvoiceKey::new("acme", "INV-2"), 2_000.0, entry(2_000.0))
            .unwrap();

        let summaries = summarize_payments(&groups, &ledger.into_records());
        assert_eq!(summaries.len(), 2);

        let acme = &summaries[0];
        assert_eq!(acme.supplier_name, "Acme");
        assert_eq!((acme.pending_count, acme.partial_count, acme.paid_count), (1, 1, 1));
        assert!((acme.pending_amount - 3_500.0).abs() < 1e-9);
        assert!((acme.paid_amount - 14_000.0).abs() < 1e-9);

        let inv1 = acme
            .invoices
            .iter()
            .find(|v| v.key.invoice_number == "INV-1")
            .unwrap();
        assert!((inv1.pending_amount - 3_000.0).abs() < 1e-9);
        assert_eq!(inv1.payment_reference.as_deref(), Some("UTR-1"));

        let bolt = &summaries[1];
        assert_eq!(bolt.pending_count, 1);
        assert!((bolt.pending_amount - 700.0).abs() < 1e-9);
    }

    #[test]
    fn test_ledger_ignores_other_sites_and_duplicates() {
        let row = |id: &str, site: &str, amount: f64| SupplierInvoicePayment {
            id: id.to_string(),
            site_id: site.to_string(),
            supplier_id: "acme".to_string(),
            invoice_number: "INV-1".to_string(),
            payment_status: PaymentStatus::Partial,
            payment_amount: amount,
            payment_reference: None,
            paid_at: None,
            notes: None,
        };
        let ledger = PaymentLedger::from_records(
            "s1",
            &[row("a", "s1", 100.0), row("b", "s1", 400.0), row("c", "s2", 900.0)],
        );
        assert_eq!(ledger.len(), 1);
        let kept = ledger.get(&InvoiceKey::new("acme", "INV-1")).unwrap();
        assert_eq!(kept.id, "b");
    }
}
