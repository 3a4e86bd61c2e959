use crate::documents::FacetStatus;
use crate::expenses::ExpenseDashboard;
use crate::invoices::{InvoiceGroup, LegacyGrnStatus};
use crate::payments::SupplierPaymentSummary;
use crate::rollup::SiteRollup;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Everything the site dashboard shows, computed from one snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SiteReport {
    pub site_id: String,
    pub site_name: String,
    pub rollup: SiteRollup,
    pub invoice_groups: Vec<InvoiceGroup>,
    pub legacy_grns: Vec<LegacyGrnStatus>,
    pub supplier_payments: Vec<SupplierPaymentSummary>,
    #[serde(default)]
    pub expenses: Option<ExpenseDashboard>,
}

impl SiteReport {
    /// Zeroed report shown when a fetch fails.
    pub fn empty(site_id: impl Into<String>) -> Self {
        let site_id = site_id.into();
        Self {
            rollup: SiteRollup {
                site_id: site_id.clone(),
                ..Default::default()
            },
            site_id,
            ..Default::default()
        }
    }

    pub fn billing_summary(&self) -> BillingReadinessSummary {
        BillingReadinessSummary::from_rollup(&self.rollup)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BillingReadinessRow {
    pub headline_serial: u32,
    pub headline_name: String,
    pub item_number: String,
    pub description: String,
    pub unit: String,
    pub quantity: f64,
    pub dc: FacetStatus,
    pub mir: FacetStatus,
    pub test_certificate: FacetStatus,
    pub tds: FacetStatus,
    pub checklist: FacetStatus,
    pub jmr: FacetStatus,
    pub progress: u8,
    pub ready_for_billing: bool,
}

/// Flat per-line-item readiness table, in headline then item number order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BillingReadinessSummary {
    pub site_id: String,
    pub site_name: String,
    pub overall_progress: u8,
    pub total_line_items: usize,
    pub ready_for_billing: usize,
    pub rows: Vec<BillingReadinessRow>,
}

const CSV_HEADER: &str = "Headline,Headline Name,Item Number,Description,Unit,Quantity,DC,MIR,Test Certificate,TDS,Checklist,JMR,Progress,Ready For Billing";

impl BillingReadinessSummary {
    pub fn from_rollup(rollup: &SiteRollup) -> Self {
        let rows = rollup
            .headlines
            .iter()
            .flat_map(|headline| {
                headline.line_items.iter().map(move |item| BillingReadinessRow {
                    headline_serial: headline.serial_number,
                    headline_name: headline.name.clone(),
                    item_number: item.item_number.clone(),
                    description: item.description.clone(),
                    unit: item.unit.clone(),
                    quantity: item.quantity,
                    dc: item.readiness.dc.status,
                    mir: item.readiness.mir.status,
                    test_certificate: item.readiness.test_certificate.status,
                    tds: item.readiness.tds.status,
                    checklist: item.readiness.checklist.status,
                    jmr: item.readiness.jmr.status,
                    progress: item.progress,
                    ready_for_billing: item.ready_for_billing,
                })
            })
            .collect();

        Self {
            site_id: rollup.site_id.clone(),
            site_name: rollup.site_name.clone(),
            overall_progress: rollup.overall_progress,
            total_line_items: rollup.total_line_items,
            ready_for_billing: rollup.ready_for_billing,
            rows,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_csv(&self) -> String {
        let mut output = String::new();
        output.push_str(CSV_HEADER);
        output.push('\n');

        for row in &self.rows {
            output.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
                row.headline_serial,
                csv_field(&row.headline_name),
                csv_field(&row.item_number),
                csv_field(&row.description),
                csv_field(&row.unit),
                row.quantity,
                row.dc.as_str(),
                row.mir.as_str(),
                row.test_certificate.as_str(),
                row.tds.as_str(),
                row.checklist.as_str(),
                row.jmr.as_str(),
                row.progress,
                if row.ready_for_billing { "Yes" } else { "No" }
            ));
        }

        output
    }
}

/// Quotes a field when it holds a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::{LineItemReadiness, ReadinessVector};
    use crate::rollup::{ChecklistCompletion, HeadlineRollup, ReadinessBadge};
    use crate::schema::WorkStatus;

    fn rollup() -> SiteRollup {
        let item = LineItemReadiness {
            line_item_id: "li1".to_string(),
            headline_id: "h1".to_string(),
            item_number: "1.1".to_string(),
            description: "PCC 1:4:8, below footings".to_string(),
            unit: "cum".to_string(),
            quantity: 12.5,
            readiness: ReadinessVector::default(),
            progress: 0,
            ready_for_billing: false,
            materials: vec![],
        };
        SiteRollup {
            site_id: "s1".to_string(),
            site_name: "Tower A".to_string(),
            overall_progress: 0,
            badge: ReadinessBadge::Pending,
            total_line_items: 1,
            ready_for_billing: 0,
            headlines: vec![HeadlineRollup {
                headline_id: "h1".to_string(),
                serial_number: 1,
                name: "Concrete".to_string(),
                status: WorkStatus::InProgress,
                progress: 0,
                badge: ReadinessBadge::Pending,
                ready_line_items: 0,
                line_items: vec![item],
                checklist: ChecklistCompletion::default(),
            }],
        }
    }

    #[test]
    fn test_summary_rows_follow_rollup() {
        let summary = BillingReadinessSummary::from_rollup(&rollup());
        assert_eq!(summary.rows.len(), 1);
        assert_eq!(summary.rows[0].headline_name, "Concrete");
        assert_eq!(summary.rows[0].dc, FacetStatus::N);
    }

    #[test]
    fn test_csv_quotes_descriptions() {
        let csv = BillingReadinessSummary::from_rollup(&rollup()).to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].starts_with("1,Concrete,1.1,\"PCC 1:4:8, below footings\",cum,12.5,N,"));
        assert!(lines[1].ends_with(",0,No"));
    }

    #[test]
    fn test_json_uses_facet_letters() {
        let json = BillingReadinessSummary::from_rollup(&rollup()).to_json().unwrap();
        assert!(json.contains("\"dc\": \"N\""));
    }

    #[test]
    fn test_empty_report() {
        let report = SiteReport::empty("s9");
        assert_eq!(report.rollup.site_id, "s9");
        assert!(report.invoice_groups.is_empty());
        assert!(report.expenses.is_none());
    }
}
