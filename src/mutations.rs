use crate::config::RollupConfig;
use crate::documents::{attach_file, ensure_placeholders, remove_file, set_applicability};
use crate::error::{Result, RollupError};
use crate::invoices::{group_invoices, InvoiceKey};
use crate::payments::{PaymentEntry, PaymentLedger};
use crate::schema::{
    ChecklistItem, ChecklistItemStatus, ComplianceDocument, DocumentOwner, DocumentType,
    GrnInvoice, JmrStatus, MaterialReceipt, SiteSnapshot,
};
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An ordered list of user edits, applied to a copy of a site snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct MutationBatch {
    #[schemars(description = "Edits applied in order. Any failing edit rejects the whole batch.")]
    #[serde(default)]
    pub mutations: Vec<SiteMutation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SiteMutation {
    /// Log a delivery against a BOQ material.
    AddReceipt { receipt: MaterialReceipt },

    UpdateReceipt {
        receipt_id: String,
        #[serde(default)]
        receipt_date: Option<NaiveDate>,
        #[serde(default)]
        quantity_received: Option<f64>,
        #[serde(default)]
        vendor: Option<String>,
        #[serde(default)]
        notes: Option<String>,
    },

    DeleteReceipt { receipt_id: String },

    /// Toggle NA. Marking a document NA drops its file.
    SetDocumentApplicability {
        owner: DocumentOwner,
        document_type: DocumentType,
        is_applicable: bool,
    },

    AttachDocumentFile {
        owner: DocumentOwner,
        document_type: DocumentType,
        file_path: String,
        file_name: String,
        uploaded_at: DateTime<Utc>,
    },

    RemoveDocumentFile {
        owner: DocumentOwner,
        document_type: DocumentType,
    },

    /// Moves a JMR through its workflow. Submitting or approving stamps the
    /// matching date when `date` is given.
    SetJmrStatus {
        jmr_id: String,
        status: JmrStatus,
        #[serde(default)]
        date: Option<NaiveDate>,
        #[serde(default)]
        approved_quantity: Option<f64>,
    },

    /// Marks an item of either checklist kind completed.
    CompleteChecklistItem {
        checklist_item_id: String,
        completed_at: DateTime<Utc>,
    },

    /// Records the signed copy of a line item quality checklist.
    SignLineItemChecklist {
        checklist_id: String,
        file_path: String,
        file_name: String,
    },

    RecordPayment {
        supplier_id: String,
        invoice_number: String,
        entry: PaymentEntry,
    },

    AddGrnInvoice { invoice: GrnInvoice },

    DeleteGrnInvoice { grn_invoice_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub snapshot: SiteSnapshot,
    /// Storage paths no longer referenced by any record.
    pub orphaned_files: Vec<String>,
}

impl MutationBatch {
    pub fn new(mutations: Vec<SiteMutation>) -> Self {
        Self { mutations }
    }

    /// Applies every edit to a clone of `base`. The base snapshot is never
    /// modified; on error nothing is returned but the error.
    pub fn apply(&self, base: &SiteSnapshot, config: &RollupConfig) -> Result<MutationOutcome> {
        let mut snapshot = base.clone();
        let mut orphaned_files = Vec::new();

        for (index, mutation) in self.mutations.iter().enumerate() {
            debug!("Applying mutation {} to site {}", index, snapshot.site.id);
            if let Some(files) = apply_single_mutation(&mut snapshot, mutation, config)? {
                orphaned_files.extend(files);
            }
        }

        info!(
            "Applied {} mutation(s) to site {}; {} file(s) orphaned",
            self.mutations.len(),
            snapshot.site.id,
            orphaned_files.len()
        );

        Ok(MutationOutcome {
            snapshot,
            orphaned_files,
        })
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(MutationBatch)
    }
}

fn validate_quantity(entity: &str, quantity: f64) -> Result<()> {
    if !quantity.is_finite() || quantity <= 0.0 {
        return Err(RollupError::validation(
            entity,
            format!("quantity must be a positive number, got {}", quantity),
        ));
    }
    Ok(())
}

fn require_non_empty(entity: &str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RollupError::validation(entity, format!("{} is required", field)));
    }
    Ok(())
}

fn allowed_types(owner: &DocumentOwner) -> &'static [DocumentType] {
    match owner {
        DocumentOwner::Material { .. } | DocumentOwner::LegacyGrn { .. } => &DocumentType::MATERIAL,
        DocumentOwner::GrnLineItem { .. } => &DocumentType::GRN_LINE_ITEM,
        DocumentOwner::GrnInvoice { .. } => &[DocumentType::Dc],
    }
}

/// Finds the owner's document of the given type, creating the placeholder on
/// first access.
fn document_slot<'s>(
    snapshot: &'s mut SiteSnapshot,
    owner: &DocumentOwner,
    document_type: DocumentType,
) -> Result<&'s mut ComplianceDocument> {
    if !allowed_types(owner).contains(&document_type) {
        return Err(RollupError::validation(
            format!("{} {}", owner.kind(), owner.id()),
            format!("{} documents are not tracked here", document_type.label()),
        ));
    }

    let owner_id = owner.id();
    let documents = match owner {
        DocumentOwner::Material { material_id } => {
            if !snapshot.boq.materials.iter().any(|m| &m.id == material_id) {
                return Err(RollupError::not_found("material", material_id.clone()));
            }
            &mut snapshot.boq.material_documents
        }
        DocumentOwner::GrnLineItem { line_item_id } => {
            let line = snapshot
                .grn
                .invoices
                .iter_mut()
                .flat_map(|i| i.line_items.iter_mut())
                .find(|l| &l.id == line_item_id)
                .ok_or_else(|| RollupError::not_found("GRN line item", line_item_id.clone()))?;
            &mut line.documents
        }
        DocumentOwner::LegacyGrn { record_id } => {
            let record = snapshot
                .grn
                .legacy
                .iter_mut()
                .find(|r| &r.id == record_id)
                .ok_or_else(|| RollupError::not_found("legacy GRN", record_id.clone()))?;
            &mut record.documents
        }
        DocumentOwner::GrnInvoice { grn_invoice_id } => {
            let invoice = snapshot
                .grn
                .invoices
                .iter_mut()
                .find(|i| &i.id == grn_invoice_id)
                .ok_or_else(|| RollupError::not_found("GRN invoice", grn_invoice_id.clone()))?;
            return Ok(invoice
                .dc_document
                .get_or_insert_with(|| ComplianceDocument::placeholder(grn_invoice_id, DocumentType::Dc)));
        }
    };

    ensure_placeholders(documents, owner_id, &[document_type]);
    documents
        .iter_mut()
        .find(|d| d.owner_id == owner_id && d.document_type == document_type)
        .ok_or_else(|| RollupError::not_found("document", format!("{}:{}", owner_id, document_type.as_str())))
}

fn find_checklist_item<'s>(snapshot: &'s mut SiteSnapshot, item_id: &str) -> Option<&'s mut ChecklistItem> {
    let boq = &mut snapshot.boq;
    let line_item_items = boq.line_item_checklists.iter_mut().flat_map(|c| c.items.iter_mut());
    let headline_items = boq.headline_checklists.iter_mut().flat_map(|c| c.items.iter_mut());
    line_item_items.chain(headline_items).find(|i| i.id == item_id)
}

fn validate_grn_invoice(invoice: &GrnInvoice, config: &RollupConfig) -> Result<()> {
    let entity = format!("GRN invoice {}", invoice.id);
    require_non_empty(&entity, "invoice number", &invoice.invoice_number)?;
    require_non_empty(&entity, "supplier", &invoice.supplier_id)?;
    if invoice.line_items.is_empty() {
        return Err(RollupError::validation(&entity, "at least one line item is required"));
    }
    for line in &invoice.line_items {
        let line_entity = format!("GRN line item {}", line.id);
        require_non_empty(&line_entity, "material name", &line.material_name)?;
        validate_quantity(&line_entity, line.quantity)?;
        if !line.rate.is_finite() || line.rate < 0.0 {
            return Err(RollupError::validation(
                &line_entity,
                format!("rate must be zero or more, got {}", line.rate),
            ));
        }
        if !config.allowed_gst_rates.contains(&line.gst_rate) {
            return Err(RollupError::validation(
                &line_entity,
                format!(
                    "GST rate {}% is not one of {:?}",
                    line.gst_rate, config.allowed_gst_rates
                ),
            ));
        }
    }
    Ok(())
}

fn apply_single_mutation(
    snapshot: &mut SiteSnapshot,
    mutation: &SiteMutation,
    config: &RollupConfig,
) -> Result<Option<Vec<String>>> {
    match mutation {
        SiteMutation::AddReceipt { receipt } => {
            let entity = format!("receipt {}", receipt.id);
            require_non_empty(&entity, "id", &receipt.id)?;
            validate_quantity(&entity, receipt.quantity_received)?;
            if !snapshot.boq.materials.iter().any(|m| m.id == receipt.material_id) {
                return Err(RollupError::not_found("material", receipt.material_id.clone()));
            }
            if snapshot.boq.receipts.iter().any(|r| r.id == receipt.id) {
                return Err(RollupError::validation(entity, "a receipt with this id already exists"));
            }
            snapshot.boq.receipts.push(receipt.clone());
            Ok(None)
        }

        SiteMutation::UpdateReceipt {
            receipt_id,
            receipt_date,
            quantity_received,
            vendor,
            notes,
        } => {
            if let Some(q) = quantity_received {
                validate_quantity(&format!("receipt {}", receipt_id), *q)?;
            }
            let receipt = snapshot
                .boq
                .receipts
                .iter_mut()
                .find(|r| &r.id == receipt_id)
                .ok_or_else(|| RollupError::not_found("receipt", receipt_id.clone()))?;
            if let Some(d) = receipt_date {
                receipt.receipt_date = *d;
            }
            if let Some(q) = quantity_received {
                receipt.quantity_received = *q;
            }
            if let Some(v) = vendor {
                receipt.vendor = Some(v.clone());
            }
            if let Some(n) = notes {
                receipt.notes = Some(n.clone());
            }
            Ok(None)
        }

        SiteMutation::DeleteReceipt { receipt_id } => {
            let before = snapshot.boq.receipts.len();
            snapshot.boq.receipts.retain(|r| &r.id != receipt_id);
            if snapshot.boq.receipts.len() == before {
                return Err(RollupError::not_found("receipt", receipt_id.clone()));
            }
            Ok(None)
        }

        SiteMutation::SetDocumentApplicability {
            owner,
            document_type,
            is_applicable,
        } => {
            let doc = document_slot(snapshot, owner, *document_type)?;
            Ok(set_applicability(doc, *is_applicable).map(|p| vec![p]))
        }

        SiteMutation::AttachDocumentFile {
            owner,
            document_type,
            file_path,
            file_name,
            uploaded_at,
        } => {
            require_non_empty("document upload", "file path", file_path)?;
            let doc = document_slot(snapshot, owner, *document_type)?;
            Ok(attach_file(doc, file_path.clone(), file_name.clone(), *uploaded_at).map(|p| vec![p]))
        }

        SiteMutation::RemoveDocumentFile {
            owner,
            document_type,
        } => {
            let doc = document_slot(snapshot, owner, *document_type)?;
            Ok(remove_file(doc).map(|p| vec![p]))
        }

        SiteMutation::SetJmrStatus {
            jmr_id,
            status,
            date,
            approved_quantity,
        } => {
            if let Some(q) = approved_quantity {
                if !q.is_finite() || *q < 0.0 {
                    return Err(RollupError::validation(
                        format!("JMR {}", jmr_id),
                        format!("approved quantity must be zero or more, got {}", q),
                    ));
                }
            }
            let jmr = snapshot
                .boq
                .jmrs
                .iter_mut()
                .find(|j| &j.id == jmr_id)
                .ok_or_else(|| RollupError::not_found("JMR", jmr_id.clone()))?;
            jmr.status = *status;
            match status {
                JmrStatus::Submitted => {
                    if date.is_some() {
                        jmr.submitted_date = *date;
                    }
                }
                JmrStatus::Approved => {
                    if date.is_some() {
                        jmr.approved_date = *date;
                    }
                    if approved_quantity.is_some() {
                        jmr.approved_quantity = *approved_quantity;
                    }
                }
                JmrStatus::Draft | JmrStatus::Disputed => {}
            }
            Ok(None)
        }

        SiteMutation::CompleteChecklistItem {
            checklist_item_id,
            completed_at,
        } => {
            let item = find_checklist_item(snapshot, checklist_item_id)
                .ok_or_else(|| RollupError::not_found("checklist item", checklist_item_id.clone()))?;
            item.status = ChecklistItemStatus::Completed;
            item.completed_at = Some(*completed_at);
            Ok(None)
        }

        SiteMutation::SignLineItemChecklist {
            checklist_id,
            file_path,
            file_name,
        } => {
            require_non_empty("signed checklist", "file path", file_path)?;
            let checklist = snapshot
                .boq
                .line_item_checklists
                .iter_mut()
                .find(|c| &c.id == checklist_id)
                .ok_or_else(|| RollupError::not_found("line item checklist", checklist_id.clone()))?;
            let replaced = checklist
                .signed_copy_path
                .replace(file_path.clone())
                .filter(|old| !old.trim().is_empty() && old != file_path);
            checklist.signed_copy_name = Some(file_name.clone());
            Ok(replaced.map(|p| vec![p]))
        }

        SiteMutation::RecordPayment {
            supplier_id,
            invoice_number,
            entry,
        } => {
            let key = InvoiceKey::new(supplier_id.clone(), invoice_number.trim());
            let site_invoices: Vec<GrnInvoice> = snapshot
                .grn
                .invoices
                .iter()
                .filter(|i| i.site_id == snapshot.site.id)
                .cloned()
                .collect();
            let invoice_total = group_invoices(&site_invoices, &snapshot.grn.suppliers)
                .into_iter()
                .find(|g| g.key == key)
                .map(|g| g.total_with_gst)
                .ok_or_else(|| {
                    RollupError::not_found("invoice", format!("{}/{}", supplier_id, invoice_number))
                })?;

            let site_id = snapshot.site.id.clone();
            let (own, others): (Vec<_>, Vec<_>) = std::mem::take(&mut snapshot.payments)
                .into_iter()
                .partition(|p| p.site_id == site_id);

            let mut ledger = PaymentLedger::from_records(site_id, &own);
            let recorded = ledger.record_payment(&key, invoice_total, entry.clone());
            let result = recorded.map(|_| None);

            snapshot.payments = others;
            snapshot.payments.extend(ledger.into_records());
            result
        }

        SiteMutation::AddGrnInvoice { invoice } => {
            validate_grn_invoice(invoice, config)?;
            if snapshot.grn.invoices.iter().any(|i| i.id == invoice.id) {
                return Err(RollupError::validation(
                    format!("GRN invoice {}", invoice.id),
                    "a GRN with this id already exists",
                ));
            }
            let mut invoice = invoice.clone();
            invoice.site_id = snapshot.site.id.clone();
            invoice.invoice_number = invoice.invoice_number.trim().to_string();
            snapshot.grn.invoices.push(invoice);
            Ok(None)
        }

        SiteMutation::DeleteGrnInvoice { grn_invoice_id } => {
            let index = snapshot
                .grn
                .invoices
                .iter()
                .position(|i| &i.id == grn_invoice_id)
                .ok_or_else(|| RollupError::not_found("GRN invoice", grn_invoice_id.clone()))?;
            let removed = snapshot.grn.invoices.remove(index);

            let files: Vec<String> = removed
                .dc_document
                .iter()
                .chain(removed.line_items.iter().flat_map(|l| l.documents.iter()))
                .filter(|d| d.has_file())
                .filter_map(|d| d.file_path.clone())
                .collect();
            Ok(Some(files))
        }
    }
}
