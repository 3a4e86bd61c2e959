use crate::documents::{resolve_documents, FacetResolution, FacetStatus};
use crate::schema::{ComplianceDocument, DocumentType, GrnInvoice, GrnLineItem, LegacyGrnRecord, Supplier};
use chrono::NaiveDate;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;

/// Grouping key for one commercial invoice.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub struct InvoiceKey {
    pub supplier_id: String,
    pub invoice_number: String,
}

impl InvoiceKey {
    pub fn new(supplier_id: impl Into<String>, invoice_number: impl Into<String>) -> Self {
        Self {
            supplier_id: supplier_id.into(),
            invoice_number: invoice_number.into(),
        }
    }

    pub fn of(invoice: &GrnInvoice) -> Self {
        Self::new(invoice.supplier_id.clone(), invoice.invoice_number.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ComplianceCounts {
    pub applicable: u32,
    pub uploaded: u32,
    pub not_applicable: u32,
}

impl ComplianceCounts {
    /// Counts one document slot. A missing record is the lazily created
    /// placeholder: applicable and not uploaded.
    pub fn count_slot(&mut self, doc: Option<&ComplianceDocument>) {
        match doc {
            None => self.applicable += 1,
            Some(d) if !d.is_applicable => self.not_applicable += 1,
            Some(d) => {
                self.applicable += 1;
                if d.has_file() {
                    self.uploaded += 1;
                }
            }
        }
    }

    pub fn for_line_item(line: &GrnLineItem) -> Self {
        let mut counts = Self::default();
        for document_type in DocumentType::GRN_LINE_ITEM {
            let of_type: Vec<&ComplianceDocument> = line
                .documents
                .iter()
                .filter(|d| d.document_type == document_type)
                .collect();
            if of_type.is_empty() {
                counts.count_slot(None);
            } else {
                for doc in of_type {
                    counts.count_slot(Some(doc));
                }
            }
        }
        counts
    }

    pub fn outstanding(&self) -> u32 {
        self.applicable.saturating_sub(self.uploaded)
    }

    pub fn is_complete(&self) -> bool {
        self.uploaded >= self.applicable
    }
}

impl AddAssign for ComplianceCounts {
    fn add_assign(&mut self, other: Self) {
        self.applicable += other.applicable;
        self.uploaded += other.uploaded;
        self.not_applicable += other.not_applicable;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GrnLineSummary {
    pub line_item_id: String,
    pub material_name: String,
    pub quantity: f64,
    pub unit: String,
    pub rate: f64,
    pub gst_rate: u8,
    pub amount_without_gst: f64,
    pub amount_with_gst: f64,
    pub compliance: ComplianceCounts,
}

impl GrnLineSummary {
    fn from_line(line: &GrnLineItem) -> Self {
        Self {
            line_item_id: line.id.clone(),
            material_name: line.material_name.clone(),
            quantity: line.quantity,
            unit: line.unit.clone(),
            rate: line.rate,
            gst_rate: line.gst_rate,
            amount_without_gst: line.amount_without_gst(),
            amount_with_gst: line.amount_with_gst(),
            compliance: ComplianceCounts::for_line_item(line),
        }
    }
}

/// One dated GRN row inside an invoice group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GrnEntry {
    pub grn_invoice_id: String,
    pub grn_date: NaiveDate,
    pub notes: Option<String>,
    pub amount_without_gst: f64,
    pub amount_with_gst: f64,
    pub line_items: Vec<GrnLineSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InvoiceGroup {
    pub key: InvoiceKey,
    pub supplier_name: String,
    /// Most recent first.
    pub entries: Vec<GrnEntry>,
    pub latest_grn_date: NaiveDate,
    pub total_without_gst: f64,
    pub total_with_gst: f64,
    /// Taken from the canonical (first listed) entry only.
    pub dc_status: FacetStatus,
    pub dc_counts: ComplianceCounts,
    pub line_item_compliance: ComplianceCounts,
    pub total_compliance: ComplianceCounts,
}

impl InvoiceGroup {
    pub fn line_item_count(&self) -> usize {
        self.entries.iter().map(|e| e.line_items.len()).sum()
    }
}

/// Groups GRN rows by supplier and invoice number. Output is deterministic for
/// any input order: entries are sorted by date (newest first, then id) and
/// groups by latest date, then key.
pub fn group_invoices(invoices: &[GrnInvoice], suppliers: &[Supplier]) -> Vec<InvoiceGroup> {
    let mut grouped: BTreeMap<InvoiceKey, Vec<&GrnInvoice>> = BTreeMap::new();
    for invoice in invoices {
        grouped.entry(InvoiceKey::of(invoice)).or_default().push(invoice);
    }

    let supplier_names: BTreeMap<&str, &str> = suppliers
        .iter()
        .map(|s| (s.id.as_str(), s.name.as_str()))
        .collect();

    let mut groups: Vec<InvoiceGroup> = grouped
        .into_iter()
        .filter_map(|(key, mut rows)| {
            rows.sort_by(|a, b| b.grn_date.cmp(&a.grn_date).then_with(|| a.id.cmp(&b.id)));
            let supplier_name = supplier_names
                .get(key.supplier_id.as_str())
                .map(|n| n.to_string())
                .unwrap_or_else(|| key.supplier_id.clone());
            build_group(key, supplier_name, &rows)
        })
        .collect();

    groups.sort_by(|a, b| {
        b.latest_grn_date
            .cmp(&a.latest_grn_date)
            .then_with(|| a.key.cmp(&b.key))
    });

    debug!(
        "Grouped {} GRN row(s) into {} invoice group(s)",
        invoices.len(),
        groups.len()
    );

    groups
}

fn build_group(key: InvoiceKey, supplier_name: String, rows: &[&GrnInvoice]) -> Option<InvoiceGroup> {
    let canonical = rows.first()?;

    let entries: Vec<GrnEntry> = rows
        .iter()
        .map(|row| GrnEntry {
            grn_invoice_id: row.id.clone(),
            grn_date: row.grn_date,
            notes: row.notes.clone(),
            amount_without_gst: row.amount_without_gst(),
            amount_with_gst: row.amount_with_gst(),
            line_items: row.line_items.iter().map(GrnLineSummary::from_line).collect(),
        })
        .collect();

    let total_without_gst = entries.iter().map(|e| e.amount_without_gst).sum();
    let total_with_gst = entries.iter().map(|e| e.amount_with_gst).sum();

    let mut dc_counts = ComplianceCounts::default();
    dc_counts.count_slot(canonical.dc_document.as_ref());
    let dc_status = resolve_documents(canonical.dc_document.iter(), DocumentType::Dc, true).status;

    let mut line_item_compliance = ComplianceCounts::default();
    for line in entries.iter().flat_map(|e| e.line_items.iter()) {
        line_item_compliance += line.compliance;
    }

    let mut total_compliance = line_item_compliance;
    total_compliance += dc_counts;

    Some(InvoiceGroup {
        key,
        supplier_name,
        latest_grn_date: canonical.grn_date,
        entries,
        total_without_gst,
        total_with_gst,
        dc_status,
        dc_counts,
        line_item_compliance,
        total_compliance,
    })
}

/// Document statuses of a legacy single-material GRN record. Legacy records
/// are never grouped by invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LegacyGrnStatus {
    pub record_id: String,
    pub material_name: String,
    pub invoice_number: Option<String>,
    pub grn_date: NaiveDate,
    pub dc: FacetResolution,
    pub mir: FacetResolution,
    pub test_certificate: FacetResolution,
    pub tds: FacetResolution,
}

impl LegacyGrnStatus {
    pub fn is_complete(&self) -> bool {
        [&self.dc, &self.mir, &self.test_certificate, &self.tds]
            .iter()
            .all(|r| r.status.is_satisfied())
    }
}

pub fn resolve_legacy_records(records: &[LegacyGrnRecord]) -> Vec<LegacyGrnStatus> {
    let mut statuses: Vec<LegacyGrnStatus> = records
        .iter()
        .map(|r| LegacyGrnStatus {
            record_id: r.id.clone(),
            material_name: r.material_name.clone(),
            invoice_number: r.invoice_number.clone(),
            grn_date: r.grn_date,
            dc: resolve_documents(&r.documents, DocumentType::Dc, true),
            mir: resolve_documents(&r.documents, DocumentType::Mir, true),
            test_certificate: resolve_documents(&r.documents, DocumentType::TestCertificate, true),
            tds: resolve_documents(&r.documents, DocumentType::Tds, true),
        })
        .collect();
    statuses.sort_by(|a, b| {
        b.grn_date
            .cmp(&a.grn_date)
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
    statuses
}
