//! Blob store contract for compliance files.
//!
//! Uploads and metadata updates are not transactional: an upload that
//! succeeds followed by a failed metadata write leaves an orphaned object.

use crate::config::RollupConfig;
use crate::documents::attach_file;
use crate::error::{Result, RollupError};
use crate::schema::{ComplianceDocument, DocumentOwner, DocumentType};
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

pub const DEFAULT_SIGNED_URL_EXPIRY_SECS: u64 = 3600;

/// One week.
pub const MAX_SIGNED_URL_EXPIRY_SECS: u64 = 7 * 24 * 3600;

/// Moment a signed URL issued at `issued_at` stops working.
pub fn signed_url_deadline(issued_at: DateTime<Utc>, expires_in_secs: u64) -> Result<DateTime<Utc>> {
    if expires_in_secs > MAX_SIGNED_URL_EXPIRY_SECS {
        return Err(RollupError::validation(
            "signed URL",
            format!(
                "expiry of {}s exceeds the maximum of {}s",
                expires_in_secs, MAX_SIGNED_URL_EXPIRY_SECS
            ),
        ));
    }
    i64::try_from(expires_in_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
        .ok_or_else(|| {
            RollupError::validation("signed URL", format!("expiry of {}s is out of range", expires_in_secs))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StorageErrorKind {
    BucketNotFound,
    PermissionDenied,
    Other,
}

impl StorageErrorKind {
    /// Message worth showing to the user for this kind of failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            StorageErrorKind::BucketNotFound => {
                "Storage bucket not found. Ask an administrator to create the documents bucket."
            }
            StorageErrorKind::PermissionDenied => {
                "Upload was rejected by a storage access policy. Check your permissions for this site."
            }
            StorageErrorKind::Other => "File operation failed. Please try again.",
        }
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorKind::BucketNotFound => write!(f, "bucket not found"),
            StorageErrorKind::PermissionDenied => write!(f, "permission denied"),
            StorageErrorKind::Other => write!(f, "storage failure"),
        }
    }
}

/// Classifies a storage error by substring match on its message.
pub fn classify_storage_error(message: &str) -> StorageErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("bucket not found") || (lower.contains("bucket") && lower.contains("not found")) {
        StorageErrorKind::BucketNotFound
    } else if lower.contains("policy")
        || lower.contains("permission")
        || lower.contains("row-level security")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
    {
        StorageErrorKind::PermissionDenied
    } else {
        StorageErrorKind::Other
    }
}

pub fn storage_error(message: impl Into<String>) -> RollupError {
    let message = message.into();
    RollupError::StorageError {
        kind: classify_storage_error(&message),
        message,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[allow(async_fn_in_trait)]
pub trait BlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    async fn signed_url(&self, path: &str, expires_in_secs: u64) -> Result<SignedUrl>;

    async fn delete(&self, path: &str) -> Result<()>;
}

/// Keeps only characters that are safe in an object key.
pub fn sanitize_file_name(file_name: &str) -> String {
    let cleaned: String = file_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches(['.', '_']).is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// `<site>/<owner kind>/<owner id>/<document type>/<unix millis>_<file name>`
pub fn object_path(
    site_id: &str,
    owner: &DocumentOwner,
    document_type: DocumentType,
    file_name: &str,
    uploaded_at: DateTime<Utc>,
) -> String {
    format!(
        "{}/{}/{}/{}/{}_{}",
        site_id,
        owner.kind(),
        owner.id(),
        document_type.as_str(),
        uploaded_at.timestamp_millis(),
        sanitize_file_name(file_name)
    )
}

/// Uploads a file for `doc` and records it. The replaced object, if any, is
/// deleted afterwards; a failed delete is logged and left behind.
#[allow(clippy::too_many_arguments)]
pub async fn upload_document<S: BlobStore>(
    store: &S,
    site_id: &str,
    owner: &DocumentOwner,
    doc: &mut ComplianceDocument,
    file_name: &str,
    content_type: &str,
    bytes: Vec<u8>,
    uploaded_at: DateTime<Utc>,
) -> Result<String> {
    if bytes.is_empty() {
        return Err(RollupError::validation(
            format!("{} upload", doc.document_type.label()),
            "file is empty",
        ));
    }

    let path = object_path(site_id, owner, doc.document_type, file_name, uploaded_at);
    store.upload(&path, bytes, content_type).await?;
    debug!("Uploaded {} for {} {}", path, owner.kind(), owner.id());

    if let Some(replaced) = attach_file(doc, path.clone(), file_name, uploaded_at) {
        if let Err(e) = store.delete(&replaced).await {
            warn!("Could not delete replaced object {}: {}", replaced, e);
        }
    }

    Ok(path)
}

/// Time-boxed read link for a document's file. `None` when nothing is uploaded.
pub async fn signed_document_url<S: BlobStore>(
    store: &S,
    doc: &ComplianceDocument,
    config: &RollupConfig,
) -> Result<Option<SignedUrl>> {
    match doc.file_path.as_deref().filter(|_| doc.has_file()) {
        Some(path) => Ok(Some(store.signed_url(path, config.signed_url_expiry_secs).await?)),
        None => Ok(None),
    }
}

/// In-process store, used by tests and offline tooling.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    base_url: String,
    objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
}

impl InMemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects
            .lock()
            .map(|objects| objects.contains_key(path))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> RollupError {
        storage_error("in-memory store lock poisoned")
    }
}

impl BlobStore for InMemoryBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let mut objects = self.objects.lock().map_err(|_| Self::poisoned())?;
        objects.insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn signed_url(&self, path: &str, expires_in_secs: u64) -> Result<SignedUrl> {
        if !self.contains(path) {
            return Err(storage_error(format!("Object not found: {}", path)));
        }
        let expires_at = signed_url_deadline(Utc::now(), expires_in_secs)?;
        Ok(SignedUrl {
            url: format!(
                "{}/{}?expires={}",
                self.base_url.trim_end_matches('/'),
                path,
                expires_at.timestamp()
            ),
            expires_at,
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut objects = self.objects.lock().map_err(|_| Self::poisoned())?;
        objects.remove(path);
        Ok(())
    }
}
