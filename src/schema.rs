use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    #[schemars(description = "Delivery challan accompanying the goods")]
    Dc,

    #[schemars(description = "Material inspection report")]
    Mir,

    #[schemars(description = "Manufacturer or lab test certificate")]
    TestCertificate,

    #[schemars(description = "Technical data sheet")]
    Tds,
}

impl DocumentType {
    /// Document types tracked against a BOQ material.
    pub const MATERIAL: [DocumentType; 4] = [
        DocumentType::Dc,
        DocumentType::Mir,
        DocumentType::TestCertificate,
        DocumentType::Tds,
    ];

    /// Document types tracked against a GRN line item. DC belongs to the invoice.
    pub const GRN_LINE_ITEM: [DocumentType; 3] = [
        DocumentType::Mir,
        DocumentType::TestCertificate,
        DocumentType::Tds,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Dc => "dc",
            DocumentType::Mir => "mir",
            DocumentType::TestCertificate => "test_certificate",
            DocumentType::Tds => "tds",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DocumentType::Dc => "DC",
            DocumentType::Mir => "MIR",
            DocumentType::TestCertificate => "Test Certificate",
            DocumentType::Tds => "TDS",
        }
    }
}

/// The entity a compliance document hangs off.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentOwner {
    Material { material_id: String },
    GrnLineItem { line_item_id: String },
    GrnInvoice { grn_invoice_id: String },
    LegacyGrn { record_id: String },
}

impl DocumentOwner {
    pub fn id(&self) -> &str {
        match self {
            DocumentOwner::Material { material_id } => material_id,
            DocumentOwner::GrnLineItem { line_item_id } => line_item_id,
            DocumentOwner::GrnInvoice { grn_invoice_id } => grn_invoice_id,
            DocumentOwner::LegacyGrn { record_id } => record_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DocumentOwner::Material { .. } => "material",
            DocumentOwner::GrnLineItem { .. } => "grn_line_item",
            DocumentOwner::GrnInvoice { .. } => "grn_invoice",
            DocumentOwner::LegacyGrn { .. } => "legacy_grn",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ComplianceDocument {
    pub id: String,

    #[serde(alias = "material_id", alias = "grn_line_item_id", alias = "grn_invoice_id", alias = "grn_id")]
    #[schemars(description = "Id of the material, GRN line item, GRN invoice or legacy GRN owning this document")]
    pub owner_id: String,

    pub document_type: DocumentType,

    #[serde(default = "default_true")]
    #[schemars(description = "False when the document type does not apply (NA). NA documents never block readiness.")]
    pub is_applicable: bool,

    #[serde(default)]
    pub is_uploaded: bool,

    #[serde(default)]
    pub file_path: Option<String>,

    #[serde(default)]
    pub file_name: Option<String>,

    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl ComplianceDocument {
    /// Applicable, not-yet-uploaded record created on first access to a compliance view.
    pub fn placeholder(owner_id: &str, document_type: DocumentType) -> Self {
        Self {
            id: format!("{}:{}", owner_id, document_type.as_str()),
            owner_id: owner_id.to_string(),
            document_type,
            is_applicable: true,
            is_uploaded: false,
            file_path: None,
            file_name: None,
            uploaded_at: None,
        }
    }

    pub fn has_file(&self) -> bool {
        self.file_path
            .as_deref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub struct Site {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Package {
    pub id: String,
    pub site_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct BoqHeadline {
    pub id: String,
    pub package_id: String,
    pub serial_number: u32,
    pub name: String,
    #[serde(default)]
    pub status: WorkStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct BoqLineItem {
    pub id: String,
    pub headline_id: String,

    #[schemars(description = "Item number such as '1.2' or '3.10'. Sorted segment-wise, numerically where possible.")]
    pub item_number: String,

    pub description: String,

    #[serde(default)]
    pub location: Option<String>,

    pub unit: String,
    pub quantity: f64,

    #[serde(default)]
    pub status: WorkStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MaterialKind {
    Direct,
    Indirect,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Material {
    pub id: String,
    pub line_item_id: String,
    pub name: String,
    pub material_type: MaterialKind,
    pub unit: String,
    #[serde(default)]
    pub required_quantity: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct MaterialReceipt {
    pub id: String,
    pub material_id: String,
    pub receipt_date: NaiveDate,
    pub quantity_received: f64,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub invoice_reference: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistItemStatus {
    #[default]
    Pending,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ChecklistItem {
    pub id: String,
    pub checklist_id: String,
    pub sequence: u32,
    pub activity: String,
    #[serde(default)]
    pub status: ChecklistItemStatus,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Simple ordered activity list attached to a BOQ headline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct HeadlineChecklist {
    pub id: String,
    pub headline_id: String,
    pub name: String,
    #[serde(default)]
    pub items: Vec<ChecklistItem>,
}

/// Template-based quality checklist for a line item. Signing is what counts for readiness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct LineItemChecklist {
    pub id: String,
    pub line_item_id: String,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub signed_copy_path: Option<String>,
    #[serde(default)]
    pub signed_copy_name: Option<String>,
    #[serde(default)]
    pub items: Vec<ChecklistItem>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JmrStatus {
    #[default]
    Draft,
    Submitted,
    Approved,
    Disputed,
}

/// Joint measurement record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Jmr {
    pub id: String,
    pub line_item_id: String,
    pub jmr_number: String,
    pub measurement_date: NaiveDate,
    #[serde(default)]
    pub submitted_date: Option<NaiveDate>,
    #[serde(default)]
    pub approved_date: Option<NaiveDate>,
    pub boq_quantity: f64,
    pub executed_quantity: f64,
    #[serde(default)]
    pub approved_quantity: Option<f64>,
    #[serde(default)]
    pub contractor_representative: Option<String>,
    #[serde(default)]
    pub client_representative: Option<String>,
    #[serde(default)]
    pub status: JmrStatus,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Jmr {
    pub fn has_file(&self) -> bool {
        self.file_path
            .as_deref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Supplier {
    pub id: String,
    pub name: String,
}

/// One goods receipt against a supplier invoice. Several rows may share
/// `supplier_id` + `invoice_number` when one commercial invoice is delivered
/// in parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct GrnInvoice {
    pub id: String,
    pub site_id: String,
    pub supplier_id: String,
    pub invoice_number: String,
    pub grn_date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub dc_document: Option<ComplianceDocument>,
    #[serde(default)]
    pub line_items: Vec<GrnLineItem>,
}

impl GrnInvoice {
    pub fn amount_without_gst(&self) -> f64 {
        self.line_items.iter().map(|l| l.amount_without_gst()).sum()
    }

    pub fn amount_with_gst(&self) -> f64 {
        self.line_items.iter().map(|l| l.amount_with_gst()).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct GrnLineItem {
    pub id: String,
    pub grn_invoice_id: String,
    #[serde(default)]
    pub material_id: Option<String>,
    pub material_name: String,
    pub quantity: f64,
    pub unit: String,
    pub rate: f64,

    #[schemars(description = "GST percentage applied to this line (5, 12 or 18)")]
    pub gst_rate: u8,

    #[serde(default)]
    pub documents: Vec<ComplianceDocument>,
}

impl GrnLineItem {
    pub fn amount_without_gst(&self) -> f64 {
        self.quantity * self.rate
    }

    pub fn amount_with_gst(&self) -> f64 {
        self.amount_without_gst() * (1.0 + f64::from(self.gst_rate) / 100.0)
    }
}

/// Flat single-material GRN record from the older data model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct LegacyGrnRecord {
    pub id: String,
    pub site_id: String,
    #[serde(default)]
    pub material_id: Option<String>,
    pub material_name: String,
    #[serde(default)]
    pub supplier_id: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    pub grn_date: NaiveDate,
    pub quantity: f64,
    pub unit: String,
    #[serde(default)]
    pub documents: Vec<ComplianceDocument>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Partial,
    Paid,
}

impl PaymentStatus {
    /// `Paid` once the cumulative amount covers the invoice, `Partial` for any
    /// positive amount below it, `Pending` otherwise.
    pub fn derive(cumulative_paid: f64, invoice_total: f64) -> Self {
        if cumulative_paid >= invoice_total {
            PaymentStatus::Paid
        } else if cumulative_paid > 0.0 {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Pending
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Partial => "Partial",
            PaymentStatus::Paid => "Paid",
        }
    }
}

/// Payment ledger row, one per (site, supplier, invoice number).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct SupplierInvoicePayment {
    pub id: String,
    pub site_id: String,
    pub supplier_id: String,
    pub invoice_number: String,
    #[serde(default)]
    pub payment_status: PaymentStatus,

    #[serde(default)]
    #[schemars(description = "Cumulative amount paid so far against this invoice")]
    pub payment_amount: f64,

    #[serde(default)]
    pub payment_reference: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    Material,
    Manpower,
    Equipment,
    Other,
}

impl ExpenseCategory {
    pub const ALL: [ExpenseCategory; 4] = [
        ExpenseCategory::Material,
        ExpenseCategory::Manpower,
        ExpenseCategory::Equipment,
        ExpenseCategory::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ExpenseCategory::Material => "Material",
            ExpenseCategory::Manpower => "Manpower",
            ExpenseCategory::Equipment => "Equipment",
            ExpenseCategory::Other => "Other",
        }
    }
}

/// Plain dated amount, used for material and other expenses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ExpenseEntry {
    pub id: String,
    pub site_id: String,
    pub expense_date: NaiveDate,
    pub amount: f64,
    #[serde(default)]
    pub description: Option<String>,
}

/// Master rate card for a manpower category or an equipment type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct RateMaster {
    pub id: String,
    pub name: String,
    pub hourly_rate: f64,
}

/// Manpower or equipment expense. `rate_snapshot` is the master rate at entry
/// time and is never refreshed from the master afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct RatedExpense {
    pub id: String,
    pub site_id: String,
    pub expense_date: NaiveDate,
    pub master_id: String,
    pub hours: f64,
    pub rate_snapshot: f64,
    pub amount: f64,
    #[serde(default)]
    pub description: Option<String>,
}

impl RatedExpense {
    pub fn from_master(
        id: impl Into<String>,
        site_id: impl Into<String>,
        expense_date: NaiveDate,
        master: &RateMaster,
        hours: f64,
    ) -> Self {
        Self {
            id: id.into(),
            site_id: site_id.into(),
            expense_date,
            master_id: master.id.clone(),
            hours,
            rate_snapshot: master.hourly_rate,
            amount: hours * master.hourly_rate,
            description: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub struct ExpenseCollections {
    #[serde(default)]
    pub material: Vec<ExpenseEntry>,
    #[serde(default)]
    pub manpower: Vec<RatedExpense>,
    #[serde(default)]
    pub equipment: Vec<RatedExpense>,
    #[serde(default)]
    pub other: Vec<ExpenseEntry>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Number of calendar days in the range, inclusive. Zero when inverted.
    pub fn len_days(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start).num_days() as usize + 1
        }
    }
}

/// BOQ side of a site: packages down to material receipts and documents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub struct BoqRows {
    #[serde(default)]
    pub packages: Vec<Package>,
    #[serde(default)]
    pub headlines: Vec<BoqHeadline>,
    #[serde(default)]
    pub line_items: Vec<BoqLineItem>,
    #[serde(default)]
    pub materials: Vec<Material>,
    #[serde(default)]
    pub receipts: Vec<MaterialReceipt>,
    #[serde(default)]
    pub material_documents: Vec<ComplianceDocument>,
    #[serde(default)]
    pub line_item_checklists: Vec<LineItemChecklist>,
    #[serde(default)]
    pub headline_checklists: Vec<HeadlineChecklist>,
    #[serde(default)]
    pub jmrs: Vec<Jmr>,
}

/// Goods receipt side of a site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub struct GrnRows {
    #[serde(default)]
    pub suppliers: Vec<Supplier>,
    #[serde(default)]
    pub invoices: Vec<GrnInvoice>,
    #[serde(default)]
    pub legacy: Vec<LegacyGrnRecord>,
}

/// Every row fetched for one site, unordered, as the data store returned it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub struct SiteSnapshot {
    #[schemars(description = "The site all other rows belong to")]
    pub site: Site,

    #[serde(default)]
    pub boq: BoqRows,

    #[serde(default)]
    pub grn: GrnRows,

    #[serde(default)]
    pub payments: Vec<SupplierInvoicePayment>,

    #[serde(default)]
    pub expenses: ExpenseCollections,
}

impl SiteSnapshot {
    pub fn new(site: Site) -> Self {
        Self {
            site,
            ..Default::default()
        }
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(SiteSnapshot)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }

    pub fn supplier_name(&self, supplier_id: &str) -> Option<&str> {
        self.grn
            .suppliers
            .iter()
            .find(|s| s.id == supplier_id)
            .map(|s| s.name.as_str())
    }
}
