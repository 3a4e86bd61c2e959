//! Post-hoc invariant checks over a finished [`SiteReport`].
//!
//! Aggregation cannot fail on well-formed input, so a violation found here is
//! a bug in the crate rather than bad data.

use crate::error::{Result, RollupError};
use crate::readiness::LineItemReadiness;
use crate::report::SiteReport;
use crate::rollup::headline_progress;
use crate::schema::PaymentStatus;
use crate::utils::mean_rounded;
use log::warn;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerificationResult {
    pub checked_line_items: usize,
    pub checked_invoices: usize,
    pub checked_days: usize,
    /// Data oddities that do not break an invariant, e.g. a stored payment
    /// status that disagrees with the stored amount.
    pub warnings: Vec<String>,
}

pub struct ReportVerifier {
    tolerance: f64,
}

fn violation(entity: impl Into<String>, details: impl Into<String>) -> RollupError {
    RollupError::InvariantViolation {
        entity: entity.into(),
        details: details.into(),
    }
}

impl ReportVerifier {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.abs(),
        }
    }

    pub fn verify(&self, report: &SiteReport) -> Result<VerificationResult> {
        let mut result = VerificationResult::default();

        self.verify_rollup(report, &mut result)?;
        self.verify_invoices(report, &mut result)?;
        self.verify_payments(report, &mut result)?;
        self.verify_expenses(report, &mut result)?;

        for warning in &result.warnings {
            warn!("Site {}: {}", report.site_id, warning);
        }

        Ok(result)
    }

    fn verify_line_item(&self, item: &LineItemReadiness) -> Result<()> {
        let entity = || format!("line item {}", item.item_number);
        if item.progress > 100 {
            return Err(violation(entity(), format!("progress {} exceeds 100", item.progress)));
        }
        let expected = item.readiness.progress();
        if item.progress != expected {
            return Err(violation(
                entity(),
                format!("progress {} does not match facets ({})", item.progress, expected),
            ));
        }
        if item.ready_for_billing != item.readiness.is_ready_for_billing() {
            return Err(violation(entity(), "ready-for-billing flag disagrees with facets"));
        }
        Ok(())
    }

    fn verify_rollup(&self, report: &SiteReport, result: &mut VerificationResult) -> Result<()> {
        let rollup = &report.rollup;
        let mut headline_values = Vec::with_capacity(rollup.headlines.len());

        for headline in &rollup.headlines {
            for item in &headline.line_items {
                self.verify_line_item(item)?;
                result.checked_line_items += 1;
            }
            let expected = headline_progress(&headline.line_items);
            if headline.progress != expected {
                return Err(violation(
                    format!("headline {}", headline.name),
                    format!("progress {} is not the mean of its line items ({})", headline.progress, expected),
                ));
            }
            headline_values.push(headline.progress);
        }

        let expected_overall = mean_rounded(&headline_values);
        if rollup.overall_progress != expected_overall {
            return Err(violation(
                format!("site {}", rollup.site_name),
                format!(
                    "overall progress {} is not the mean of headlines ({})",
                    rollup.overall_progress, expected_overall
                ),
            ));
        }
        Ok(())
    }

    fn verify_invoices(&self, report: &SiteReport, result: &mut VerificationResult) -> Result<()> {
        for group in &report.invoice_groups {
            let entity = || format!("invoice {} of {}", group.key.invoice_number, group.key.supplier_id);
            let without: f64 = group.entries.iter().map(|e| e.amount_without_gst).sum();
            let with: f64 = group.entries.iter().map(|e| e.amount_with_gst).sum();
            if (without - group.total_without_gst).abs() > self.tolerance
                || (with - group.total_with_gst).abs() > self.tolerance
            {
                return Err(violation(entity(), "group totals differ from the sum of its GRNs"));
            }
            if group.total_with_gst + self.tolerance < group.total_without_gst {
                return Err(violation(entity(), "amount with GST is below amount without GST"));
            }
            let newest = group.entries.iter().map(|e| e.grn_date).max();
            if newest.is_some_and(|d| d != group.latest_grn_date) {
                return Err(violation(entity(), "latest GRN date is not the newest entry"));
            }
            result.checked_invoices += 1;
        }
        Ok(())
    }

    fn verify_payments(&self, report: &SiteReport, result: &mut VerificationResult) -> Result<()> {
        for summary in &report.supplier_payments {
            for view in &summary.invoices {
                let entity = || format!("payment of invoice {}", view.key.invoice_number);
                if view.pending_amount < -self.tolerance || view.paid_amount < -self.tolerance {
                    return Err(violation(entity(), "negative paid or pending amount"));
                }
                match view.status {
                    PaymentStatus::Pending | PaymentStatus::Paid => {
                        if (view.paid_amount + view.pending_amount - view.invoice_total).abs() > self.tolerance {
                            return Err(violation(entity(), "paid and pending do not add up to the invoice total"));
                        }
                    }
                    PaymentStatus::Partial => {
                        let derived = PaymentStatus::derive(view.paid_amount, view.invoice_total);
                        if derived != PaymentStatus::Partial {
                            result.warnings.push(format!(
                                "invoice {} of {} is stored as partial but {:.2} paid of {:.2} derives {}",
                                view.key.invoice_number,
                                summary.supplier_name,
                                view.paid_amount,
                                view.invoice_total,
                                derived.label()
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn verify_expenses(&self, report: &SiteReport, result: &mut VerificationResult) -> Result<()> {
        let Some(dashboard) = &report.expenses else {
            return Ok(());
        };
        if dashboard.days.len() != dashboard.range.len_days() {
            return Err(violation(
                "expense series",
                format!(
                    "{} buckets for a {}-day range",
                    dashboard.days.len(),
                    dashboard.range.len_days()
                ),
            ));
        }
        let sum: f64 = dashboard.days.iter().map(|d| d.total).sum();
        if (sum - dashboard.grand_total).abs() > self.tolerance {
            return Err(violation(
                "expense series",
                format!("daily totals sum to {:.2}, grand total is {:.2}", sum, dashboard.grand_total),
            ));
        }
        result.checked_days = dashboard.days.len();
        Ok(())
    }
}

pub fn verify_report(report: &SiteReport, tolerance: f64) -> Result<VerificationResult> {
    ReportVerifier::new(tolerance).verify(report)
}
