//! # Construction Roll-up
//!
//! Billing readiness, invoice, payment and expense aggregation for
//! construction sites.
//!
//! ## Core Concepts
//!
//! - **Readiness facets**: every BOQ line item is scored on six facets (DC,
//!   MIR, test certificate, TDS, checklist, JMR), each resolving to `Y`, `N` or
//!   `NA`. `Y` and `NA` count as satisfied.
//! - **Roll-up**: line item progress averages into headline progress, and
//!   headline progress (unweighted) into site progress.
//! - **Invoice groups**: GRN rows sharing a supplier and invoice number form
//!   one commercial invoice with GST totals, document compliance and a payment
//!   status.
//! - **Expense series**: one bucket per calendar day across four categories.
//!
//! Aggregation is a pure function of a [`SiteSnapshot`]: fetch, then
//! aggregate from scratch.
//!
//! ## Example
//!
//! ```rust,ignore
//! use construction_rollup::*;
//!
//! let snapshot: SiteSnapshot = serde_json::from_str(&json)?;
//! let report = SiteRollupProcessor::process(&snapshot, &RollupConfig::default())?;
//!
//! println!("{}% ready", report.rollup.overall_progress);
//! print!("{}", report.billing_summary().to_csv());
//! ```

pub mod config;
pub mod documents;
pub mod error;
pub mod expenses;
pub mod fetch;
pub mod ingestion;
pub mod invoices;
pub mod mutations;
pub mod payments;
pub mod readiness;
pub mod report;
pub mod rollup;
pub mod schema;
pub mod storage;
pub mod utils;
pub mod verification;

#[cfg(feature = "rest")]
pub mod rest;

pub use config::RollupConfig;
pub use documents::*;
pub use error::{Result, RollupError};
pub use expenses::{build_daily_series, ExpenseAnalyzer, ExpenseDashboard, ExpenseSeries};
pub use fetch::{InMemorySource, Loaded, RequestToken, RollupSession, SiteDataSource, View};
pub use ingestion::{normalize_grn_rows, parse_grn_rows, ZeroOrOne};
pub use invoices::{group_invoices, resolve_legacy_records, InvoiceGroup, InvoiceKey};
pub use mutations::{MutationBatch, MutationOutcome, SiteMutation};
pub use payments::{summarize_payments, PaymentEntry, PaymentLedger, SupplierPaymentSummary};
pub use readiness::{evaluate_line_items, LineItemReadiness, ReadinessVector};
pub use report::{BillingReadinessRow, BillingReadinessSummary, SiteReport};
pub use rollup::{rollup_site, HeadlineRollup, ReadinessBadge, SiteRollup};
pub use schema::*;
pub use storage::{BlobStore, InMemoryBlobStore, SignedUrl, StorageErrorKind};
pub use verification::{verify_report, ReportVerifier, VerificationResult};

use log::{debug, info};

pub struct SiteRollupProcessor;

impl SiteRollupProcessor {
    pub fn process(snapshot: &SiteSnapshot, config: &RollupConfig) -> Result<SiteReport> {
        config.validate()?;
        validate_snapshot(snapshot)?;

        let site = &snapshot.site;
        info!("Processing site roll-up for: {}", site.name);
        debug!(
            "Snapshot contains {} line items, {} materials, {} GRNs, {} legacy GRNs and {} payment rows",
            snapshot.boq.line_items.len(),
            snapshot.boq.materials.len(),
            snapshot.grn.invoices.len(),
            snapshot.grn.legacy.len(),
            snapshot.payments.len()
        );

        let rollup = rollup_site(snapshot, config);

        let site_invoices: Vec<GrnInvoice> = snapshot
            .grn
            .invoices
            .iter()
            .filter(|i| i.site_id == site.id)
            .cloned()
            .collect();
        let invoice_groups = group_invoices(&site_invoices, &snapshot.grn.suppliers);

        let site_legacy: Vec<LegacyGrnRecord> = snapshot
            .grn
            .legacy
            .iter()
            .filter(|r| r.site_id == site.id)
            .cloned()
            .collect();
        let legacy_grns = resolve_legacy_records(&site_legacy);

        let ledger = PaymentLedger::from_records(site.id.clone(), &snapshot.payments);
        let supplier_payments = summarize_payments(&invoice_groups, &ledger.into_records());

        debug!(
            "Grouped {} GRN(s) into {} invoice(s) across {} supplier(s)",
            site_invoices.len(),
            invoice_groups.len(),
            supplier_payments.len()
        );

        Ok(SiteReport {
            site_id: site.id.clone(),
            site_name: site.name.clone(),
            rollup,
            invoice_groups,
            legacy_grns,
            supplier_payments,
            expenses: None,
        })
    }

    /// [`Self::process`] plus the expense dashboard for `range`.
    pub fn process_with_expenses(
        snapshot: &SiteSnapshot,
        range: DateRange,
        config: &RollupConfig,
    ) -> Result<SiteReport> {
        if range.end < range.start {
            return Err(RollupError::InvalidDateRange {
                start: range.start.to_string(),
                end: range.end.to_string(),
            });
        }

        let mut report = Self::process(snapshot, config)?;

        let site_id = &snapshot.site.id;
        let expenses = &snapshot.expenses;
        let collections = ExpenseCollections {
            material: expenses.material.iter().filter(|e| &e.site_id == site_id).cloned().collect(),
            manpower: expenses.manpower.iter().filter(|e| &e.site_id == site_id).cloned().collect(),
            equipment: expenses.equipment.iter().filter(|e| &e.site_id == site_id).cloned().collect(),
            other: expenses.other.iter().filter(|e| &e.site_id == site_id).cloned().collect(),
        };

        let dashboard = ExpenseAnalyzer::new(config.rolling_window_days).analyze(range, &collections);
        info!(
            "Expenses for {} over {} day(s): total {:.2}, daily average {:.2}",
            snapshot.site.name,
            dashboard.days.len(),
            dashboard.grand_total,
            dashboard.daily_average
        );
        report.expenses = Some(dashboard);

        Ok(report)
    }

    pub fn process_with_verification(
        snapshot: &SiteSnapshot,
        config: &RollupConfig,
        tolerance: f64,
    ) -> Result<SiteReport> {
        let report = Self::process(snapshot, config)?;

        let verification = verify_report(&report, tolerance)?;
        debug!(
            "Verified {} line item(s) and {} invoice(s)",
            verification.checked_line_items, verification.checked_invoices
        );

        Ok(report)
    }
}

pub fn process_site(snapshot: &SiteSnapshot, config: &RollupConfig) -> Result<SiteReport> {
    SiteRollupProcessor::process(snapshot, config)
}

pub fn process_with_verification(
    snapshot: &SiteSnapshot,
    config: &RollupConfig,
    tolerance: f64,
) -> Result<SiteReport> {
    SiteRollupProcessor::process_with_verification(snapshot, config, tolerance)
}

fn validate_snapshot(snapshot: &SiteSnapshot) -> Result<()> {
    if snapshot.site.id.trim().is_empty() {
        return Err(RollupError::validation("site", "site id is required"));
    }

    for line in snapshot.grn.invoices.iter().flat_map(|i| i.line_items.iter()) {
        if !line.quantity.is_finite() || !line.rate.is_finite() {
            return Err(RollupError::validation(
                format!("GRN line item {}", line.id),
                "quantity and rate must be finite numbers",
            ));
        }
    }

    Ok(())
}
