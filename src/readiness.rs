use crate::documents::{resolve_documents, DocumentFile, FacetResolution, FacetStatus};
use crate::schema::{
    BoqLineItem, BoqRows, ComplianceDocument, DocumentType, Jmr, JmrStatus, LineItemChecklist,
    Material, MaterialReceipt,
};
use crate::utils::{file_name_from_path, round_percent};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const FACET_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Facet {
    Dc,
    Mir,
    TestCertificate,
    Tds,
    Checklist,
    Jmr,
}

impl Facet {
    pub const ALL: [Facet; FACET_COUNT] = [
        Facet::Dc,
        Facet::Mir,
        Facet::TestCertificate,
        Facet::Tds,
        Facet::Checklist,
        Facet::Jmr,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Facet::Dc => "DC",
            Facet::Mir => "MIR",
            Facet::TestCertificate => "Test Certificate",
            Facet::Tds => "TDS",
            Facet::Checklist => "Checklist",
            Facet::Jmr => "JMR",
        }
    }
}

/// The six readiness facets of a BOQ line item.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ReadinessVector {
    pub dc: FacetResolution,
    pub mir: FacetResolution,
    pub test_certificate: FacetResolution,
    pub tds: FacetResolution,
    pub checklist: FacetResolution,
    pub jmr: FacetResolution,
}

impl ReadinessVector {
    pub fn get(&self, facet: Facet) -> &FacetResolution {
        match facet {
            Facet::Dc => &self.dc,
            Facet::Mir => &self.mir,
            Facet::TestCertificate => &self.test_certificate,
            Facet::Tds => &self.tds,
            Facet::Checklist => &self.checklist,
            Facet::Jmr => &self.jmr,
        }
    }

    pub fn statuses(&self) -> [FacetStatus; FACET_COUNT] {
        Facet::ALL.map(|f| self.get(f).status)
    }

    pub fn satisfied_count(&self) -> usize {
        self.statuses().iter().filter(|s| s.is_satisfied()).count()
    }

    /// Share of satisfied facets, rounded to a whole percentage.
    pub fn progress(&self) -> u8 {
        round_percent(self.satisfied_count(), FACET_COUNT)
    }

    /// Stricter than `progress() == 100`: every facet must individually be Y or NA.
    pub fn is_ready_for_billing(&self) -> bool {
        self.satisfied_count() == FACET_COUNT
    }
}

/// Receipts accumulated against one material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MaterialProgress {
    pub material_id: String,
    pub name: String,
    pub unit: String,
    pub required_quantity: Option<f64>,
    pub received_quantity: f64,
    pub receipt_count: usize,
    /// Received over required, capped at 100. `None` without a required quantity.
    pub percent_received: Option<u8>,
    pub over_received: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LineItemReadiness {
    pub line_item_id: String,
    pub headline_id: String,
    pub item_number: String,
    pub description: String,
    pub unit: String,
    pub quantity: f64,
    pub readiness: ReadinessVector,
    pub progress: u8,
    pub ready_for_billing: bool,
    pub materials: Vec<MaterialProgress>,
}

/// Indexes a site's BOQ rows by owner so each line item is evaluated with
/// lookups instead of rescans.
pub struct LineItemReadinessAggregator<'a> {
    materials_by_line: HashMap<&'a str, Vec<&'a Material>>,
    documents_by_material: HashMap<&'a str, Vec<&'a ComplianceDocument>>,
    receipts_by_material: HashMap<&'a str, Vec<&'a MaterialReceipt>>,
    checklists_by_line: HashMap<&'a str, Vec<&'a LineItemChecklist>>,
    jmrs_by_line: HashMap<&'a str, Vec<&'a Jmr>>,
}

impl<'a> LineItemReadinessAggregator<'a> {
    pub fn new(rows: &'a BoqRows) -> Self {
        let mut materials_by_line: HashMap<&str, Vec<&Material>> = HashMap::new();
        for material in &rows.materials {
            materials_by_line
                .entry(material.line_item_id.as_str())
                .or_default()
                .push(material);
        }

        let mut documents_by_material: HashMap<&str, Vec<&ComplianceDocument>> = HashMap::new();
        for doc in &rows.material_documents {
            documents_by_material
                .entry(doc.owner_id.as_str())
                .or_default()
                .push(doc);
        }

        let mut receipts_by_material: HashMap<&str, Vec<&MaterialReceipt>> = HashMap::new();
        for receipt in &rows.receipts {
            receipts_by_material
                .entry(receipt.material_id.as_str())
                .or_default()
                .push(receipt);
        }

        let mut checklists_by_line: HashMap<&str, Vec<&LineItemChecklist>> = HashMap::new();
        for checklist in &rows.line_item_checklists {
            checklists_by_line
                .entry(checklist.line_item_id.as_str())
                .or_default()
                .push(checklist);
        }

        let mut jmrs_by_line: HashMap<&str, Vec<&Jmr>> = HashMap::new();
        for jmr in &rows.jmrs {
            jmrs_by_line
                .entry(jmr.line_item_id.as_str())
                .or_default()
                .push(jmr);
        }

        Self {
            materials_by_line,
            documents_by_material,
            receipts_by_material,
            checklists_by_line,
            jmrs_by_line,
        }
    }

    pub fn evaluate(&self, line_item: &BoqLineItem) -> LineItemReadiness {
        let materials = self
            .materials_by_line
            .get(line_item.id.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let readiness = ReadinessVector {
            dc: self.material_facet(materials, DocumentType::Dc),
            mir: self.material_facet(materials, DocumentType::Mir),
            test_certificate: self.material_facet(materials, DocumentType::TestCertificate),
            tds: self.material_facet(materials, DocumentType::Tds),
            checklist: checklist_facet(
                self.checklists_by_line
                    .get(line_item.id.as_str())
                    .map(Vec::as_slice)
                    .unwrap_or(&[]),
            ),
            jmr: jmr_facet(
                self.jmrs_by_line
                    .get(line_item.id.as_str())
                    .map(Vec::as_slice)
                    .unwrap_or(&[]),
            ),
        };

        let progress = readiness.progress();
        let ready_for_billing = readiness.is_ready_for_billing();

        debug!(
            "Line item {} ({}): {} of {} facets satisfied, progress {}%",
            line_item.item_number,
            line_item.id,
            readiness.satisfied_count(),
            FACET_COUNT,
            progress
        );

        LineItemReadiness {
            line_item_id: line_item.id.clone(),
            headline_id: line_item.headline_id.clone(),
            item_number: line_item.item_number.clone(),
            description: line_item.description.clone(),
            unit: line_item.unit.clone(),
            quantity: line_item.quantity,
            readiness,
            progress,
            ready_for_billing,
            materials: materials.iter().map(|m| self.material_progress(m)).collect(),
        }
    }

    /// Pools every material's documents of one type and resolves them together.
    fn material_facet(&self, materials: &[&Material], document_type: DocumentType) -> FacetResolution {
        let pooled = materials.iter().flat_map(|m| {
            self.documents_by_material
                .get(m.id.as_str())
                .into_iter()
                .flatten()
                .copied()
        });
        resolve_documents(pooled, document_type, !materials.is_empty())
    }

    fn material_progress(&self, material: &Material) -> MaterialProgress {
        let receipts = self
            .receipts_by_material
            .get(material.id.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let received_quantity: f64 = receipts.iter().map(|r| r.quantity_received).sum();

        let (percent_received, over_received) = match material.required_quantity {
            Some(required) if required > 0.0 => {
                let pct = (received_quantity / required * 100.0).round().clamp(0.0, 100.0) as u8;
                (Some(pct), received_quantity > required)
            }
            _ => (None, false),
        };

        MaterialProgress {
            material_id: material.id.clone(),
            name: material.name.clone(),
            unit: material.unit.clone(),
            required_quantity: material.required_quantity,
            received_quantity,
            receipt_count: receipts.len(),
            percent_received,
            over_received,
        }
    }
}

/// `Y` once any checklist carries a signed copy. No checklist at all is `N`, never `NA`.
pub fn checklist_facet(checklists: &[&LineItemChecklist]) -> FacetResolution {
    let files: Vec<DocumentFile> = checklists
        .iter()
        .filter_map(|c| {
            let path = c.signed_copy_path.as_deref().filter(|p| !p.trim().is_empty())?;
            Some(DocumentFile {
                path: path.to_string(),
                name: c
                    .signed_copy_name
                    .clone()
                    .unwrap_or_else(|| file_name_from_path(path)),
            })
        })
        .collect();

    if files.is_empty() {
        FacetResolution::outstanding()
    } else {
        FacetResolution::new(FacetStatus::Y, files)
    }
}

/// `Y` once any JMR is approved with a file attached; otherwise `N`, carrying
/// the files of unapproved JMRs for display.
pub fn jmr_facet(jmrs: &[&Jmr]) -> FacetResolution {
    let to_file = |j: &&Jmr| {
        let path = j.file_path.as_deref().filter(|_| j.has_file())?;
        Some(DocumentFile {
            path: path.to_string(),
            name: j
                .file_name
                .clone()
                .unwrap_or_else(|| file_name_from_path(path)),
        })
    };

    let approved: Vec<DocumentFile> = jmrs
        .iter()
        .filter(|j| j.status == JmrStatus::Approved)
        .filter_map(to_file)
        .collect();

    if !approved.is_empty() {
        return FacetResolution::new(FacetStatus::Y, approved);
    }

    FacetResolution::new(FacetStatus::N, jmrs.iter().filter_map(to_file).collect())
}

/// Evaluates every line item in the rows, in input order.
pub fn evaluate_line_items(rows: &BoqRows) -> Vec<LineItemReadiness> {
    let aggregator = LineItemReadinessAggregator::new(rows);
    rows.line_items
        .iter()
        .map(|item| aggregator.evaluate(item))
        .collect()
}
