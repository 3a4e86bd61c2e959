//! Document applicability resolution and the placeholder lifecycle.
//!
//! Every readiness figure in the crate reduces to the three-valued
//! [`FacetStatus`] produced here. `Y` and `NA` both count as satisfied.

use crate::schema::{ComplianceDocument, DocumentType};
use crate::utils::file_name_from_path;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, JsonSchema)]
pub enum FacetStatus {
    #[serde(rename = "Y")]
    Y,
    #[default]
    #[serde(rename = "N")]
    N,
    #[serde(rename = "NA")]
    NA,
}

impl FacetStatus {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, FacetStatus::Y | FacetStatus::NA)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FacetStatus::Y => "Y",
            FacetStatus::N => "N",
            FacetStatus::NA => "NA",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DocumentFile {
    pub path: String,
    pub name: String,
}

impl DocumentFile {
    fn from_document(doc: &ComplianceDocument) -> Option<Self> {
        let path = doc.file_path.as_deref().filter(|_| doc.has_file())?;
        let name = doc
            .file_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| file_name_from_path(path));
        Some(Self {
            path: path.to_string(),
            name,
        })
    }
}

/// Status of one document type (or other facet) plus whatever files exist for it.
/// `files` may be non-empty on `N` so partial uploads can still be shown.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct FacetResolution {
    pub status: FacetStatus,
    pub files: Vec<DocumentFile>,
}

impl FacetResolution {
    pub fn new(status: FacetStatus, files: Vec<DocumentFile>) -> Self {
        Self { status, files }
    }

    pub fn not_applicable() -> Self {
        Self::new(FacetStatus::NA, Vec::new())
    }

    pub fn outstanding() -> Self {
        Self::new(FacetStatus::N, Vec::new())
    }
}

/// Resolves one document type for an owner (or for a pool of owners).
///
/// `owner_has_subjects` says whether the owner has anything that needs this
/// document at all, e.g. a line item with at least one material. With no
/// records of the type, that decides between `NA` and `N`.
pub fn resolve_documents<'a, I>(
    documents: I,
    document_type: DocumentType,
    owner_has_subjects: bool,
) -> FacetResolution
where
    I: IntoIterator<Item = &'a ComplianceDocument>,
{
    let of_type: Vec<&ComplianceDocument> = documents
        .into_iter()
        .filter(|d| d.document_type == document_type)
        .collect();

    if of_type.is_empty() {
        return if owner_has_subjects {
            FacetResolution::outstanding()
        } else {
            FacetResolution::not_applicable()
        };
    }

    let (applicable, _not_applicable): (Vec<&ComplianceDocument>, Vec<&ComplianceDocument>) =
        of_type.into_iter().partition(|d| d.is_applicable);

    if applicable.is_empty() {
        return FacetResolution::not_applicable();
    }

    let files: Vec<DocumentFile> = applicable
        .iter()
        .filter_map(|d| DocumentFile::from_document(d))
        .collect();

    if files.len() == applicable.len() {
        FacetResolution::new(FacetStatus::Y, files)
    } else {
        FacetResolution::new(FacetStatus::N, files)
    }
}

/// Creates applicable, not-uploaded placeholders for any of `types` the owner
/// does not have yet. Returns how many were created.
pub fn ensure_placeholders(
    documents: &mut Vec<ComplianceDocument>,
    owner_id: &str,
    types: &[DocumentType],
) -> usize {
    let mut created = 0;
    for &document_type in types {
        let exists = documents
            .iter()
            .any(|d| d.owner_id == owner_id && d.document_type == document_type);
        if !exists {
            documents.push(ComplianceDocument::placeholder(owner_id, document_type));
            created += 1;
        }
    }
    created
}

/// Toggles applicability. Marking a document NA drops its file; the dropped
/// storage path is returned so the blob can be deleted.
pub fn set_applicability(doc: &mut ComplianceDocument, is_applicable: bool) -> Option<String> {
    doc.is_applicable = is_applicable;
    if is_applicable {
        None
    } else {
        remove_file(doc)
    }
}

/// Records an uploaded file. Returns the path of a file it replaced, if any.
pub fn attach_file(
    doc: &mut ComplianceDocument,
    file_path: impl Into<String>,
    file_name: impl Into<String>,
    uploaded_at: DateTime<Utc>,
) -> Option<String> {
    let new_path = file_path.into();
    let replaced = doc
        .file_path
        .take()
        .filter(|old| !old.trim().is_empty() && *old != new_path);
    doc.file_path = Some(new_path);
    doc.file_name = Some(file_name.into());
    doc.is_uploaded = true;
    doc.is_applicable = true;
    doc.uploaded_at = Some(uploaded_at);
    replaced
}

/// Clears the file, keeping the record. Returns the removed storage path.
pub fn remove_file(doc: &mut ComplianceDocument) -> Option<String> {
    let removed = doc.file_path.take().filter(|p| !p.trim().is_empty());
    doc.file_name = None;
    doc.is_uploaded = false;
    doc.uploaded_at = None;
    removed
}
