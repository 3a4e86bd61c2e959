use crate::error::{Result, RollupError};
use crate::fetch::SiteDataSource;
use crate::ingestion::{normalize_grn_rows, normalize_legacy_rows, RawGrnInvoiceRow, RawLegacyGrnRow};
use crate::rest::query::{distinct_ids, eq, gte, in_list, lte};
use crate::schema::{
    BoqHeadline, BoqLineItem, BoqRows, ComplianceDocument, DateRange, ExpenseEntry, GrnRows,
    HeadlineChecklist, Jmr, LineItemChecklist, Material, MaterialReceipt, Package, RatedExpense,
    Site, SupplierInvoicePayment,
};
use crate::storage::{signed_url_deadline, storage_error, BlobStore, SignedUrl};
use chrono::Utc;
use log::{debug, info};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tokio::fs;

const REST_PATH: &str = "/rest/v1";
const STORAGE_PATH: &str = "/storage/v1";

const GRN_SELECT: &str = "*,suppliers(id,name),grn_invoice_dc_documents(*),grn_line_items(*,materials(id,name,unit),grn_line_item_documents(*))";
const LEGACY_GRN_SELECT: &str = "*,materials(id,name,unit),grn_documents(*)";
const LINE_ITEM_CHECKLIST_SELECT: &str = "*,items:checklist_items(*)";
const HEADLINE_CHECKLIST_SELECT: &str = "*,items:headline_checklist_items(*)";

/// Content type for an upload, guessed from the file name.
pub fn content_type_for(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .to_string()
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

/// Adapter for a hosted Postgres backend exposing PostgREST tables and an
/// object storage API. Requests are never retried.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    bucket: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            access_token: None,
            bucket: "documents".to_string(),
        }
    }

    /// Signed-in user's token. Without one, requests run as the anonymous role.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(bearer)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        select: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let url = format!("{}{}/{}", self.base_url, REST_PATH, table);
        let mut query: Vec<(&str, String)> = vec![("select", select.to_string())];
        query.extend(filters.iter().cloned());

        let res = self
            .authorized(self.client.get(&url))
            .query(&query)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let error_text = res.text().await?;
            return Err(RollupError::FetchError {
                table: table.to_string(),
                details: format!("status {}: {}", status, error_text),
            });
        }

        let rows: Vec<T> = res.json().await?;
        debug!("Fetched {} row(s) from {}", rows.len(), table);
        Ok(rows)
    }

    /// `select` over `column in ids`; no request is made for an empty list.
    async fn select_in<T: DeserializeOwned>(
        &self,
        table: &str,
        select: &str,
        column: &str,
        ids: &[&str],
    ) -> Result<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.select(table, select, &[(column, in_list(ids))]).await
    }

    async fn select_dated<T: DeserializeOwned>(&self, table: &str, site_id: &str, range: DateRange) -> Result<Vec<T>> {
        self.select(
            table,
            "*",
            &[
                ("site_id", eq(site_id)),
                ("expense_date", gte(range.start)),
                ("expense_date", lte(range.end)),
            ],
        )
        .await
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}{}/object/{}/{}", self.base_url, STORAGE_PATH, self.bucket, path)
    }

    async fn storage_failure(res: Response, action: &str, path: &str) -> RollupError {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        storage_error(format!("{} {} failed (status {}): {}", action, path, status, body))
    }

    /// Uploads a local file, guessing its content type from the extension.
    pub async fn upload_local_file(&self, object_path: &str, local_path: &Path) -> Result<()> {
        let content_type = mime_guess::from_path(local_path)
            .first_or_octet_stream()
            .to_string();
        let bytes = fs::read(local_path).await?;
        self.upload(object_path, bytes, &content_type).await
    }
}

impl SiteDataSource for RestClient {
    async fn fetch_site(&self, site_id: &str) -> Result<Site> {
        let sites: Vec<Site> = self.select("sites", "id,name", &[("id", eq(site_id))]).await?;
        sites
            .into_iter()
            .next()
            .ok_or_else(|| RollupError::not_found("site", site_id))
    }

    async fn fetch_boq(&self, site_id: &str) -> Result<BoqRows> {
        let packages: Vec<Package> = self
            .select("boq_packages", "*", &[("site_id", eq(site_id))])
            .await?;
        let package_ids = distinct_ids(packages.iter().map(|p| p.id.as_str()));

        let headlines: Vec<BoqHeadline> = self
            .select_in("boq_headlines", "*", "package_id", &package_ids)
            .await?;
        let headline_ids = distinct_ids(headlines.iter().map(|h| h.id.as_str()));

        let (line_items, headline_checklists): (Vec<BoqLineItem>, Vec<HeadlineChecklist>) = futures::try_join!(
            self.select_in("boq_line_items", "*", "headline_id", &headline_ids),
            self.select_in("headline_checklists", HEADLINE_CHECKLIST_SELECT, "headline_id", &headline_ids),
        )?;
        let line_item_ids = distinct_ids(line_items.iter().map(|l| l.id.as_str()));

        let (materials, line_item_checklists, jmrs): (Vec<Material>, Vec<LineItemChecklist>, Vec<Jmr>) = futures::try_join!(
            self.select_in("boq_materials", "*", "line_item_id", &line_item_ids),
            self.select_in("line_item_checklists", LINE_ITEM_CHECKLIST_SELECT, "line_item_id", &line_item_ids),
            self.select_in("jmrs", "*", "line_item_id", &line_item_ids),
        )?;
        let material_ids = distinct_ids(materials.iter().map(|m| m.id.as_str()));

        let (receipts, material_documents): (Vec<MaterialReceipt>, Vec<ComplianceDocument>) = futures::try_join!(
            self.select_in("material_receipts", "*", "material_id", &material_ids),
            self.select_in("material_documents", "*", "material_id", &material_ids),
        )?;

        info!(
            "Fetched BOQ for site {}: {} headline(s), {} line item(s), {} material(s)",
            site_id,
            headlines.len(),
            line_items.len(),
            materials.len()
        );

        Ok(BoqRows {
            packages,
            headlines,
            line_items,
            materials,
            receipts,
            material_documents,
            line_item_checklists,
            headline_checklists,
            jmrs,
        })
    }

    async fn fetch_grn(&self, site_id: &str) -> Result<GrnRows> {
        let (raw_invoices, raw_legacy): (Vec<RawGrnInvoiceRow>, Vec<RawLegacyGrnRow>) = futures::try_join!(
            self.select("grn_invoices", GRN_SELECT, &[("site_id", eq(site_id))]),
            self.select("grns", LEGACY_GRN_SELECT, &[("site_id", eq(site_id))]),
        )?;
        let (invoices, suppliers) = normalize_grn_rows(raw_invoices)?;
        Ok(GrnRows {
            suppliers,
            invoices,
            legacy: normalize_legacy_rows(raw_legacy),
        })
    }

    async fn fetch_payments(&self, site_id: &str) -> Result<Vec<SupplierInvoicePayment>> {
        self.select("supplier_invoice_payments", "*", &[("site_id", eq(site_id))])
            .await
    }

    async fn fetch_material_expenses(&self, site_id: &str, range: DateRange) -> Result<Vec<ExpenseEntry>> {
        self.select_dated("material_expenses", site_id, range).await
    }

    async fn fetch_manpower_expenses(&self, site_id: &str, range: DateRange) -> Result<Vec<RatedExpense>> {
        self.select_dated("manpower_expenses", site_id, range).await
    }

    async fn fetch_equipment_expenses(&self, site_id: &str, range: DateRange) -> Result<Vec<RatedExpense>> {
        self.select_dated("equipment_expenses", site_id, range).await
    }

    async fn fetch_other_expenses(&self, site_id: &str, range: DateRange) -> Result<Vec<ExpenseEntry>> {
        self.select_dated("other_expenses", site_id, range).await
    }
}

impl BlobStore for RestClient {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let res = self
            .authorized(self.client.post(self.object_url(path)))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(Self::storage_failure(res, "Upload of", path).await);
        }
        info!("Uploaded {} to bucket {}", path, self.bucket);
        Ok(())
    }

    async fn signed_url(&self, path: &str, expires_in_secs: u64) -> Result<SignedUrl> {
        let expires_at = signed_url_deadline(Utc::now(), expires_in_secs)?;
        let url = format!(
            "{}{}/object/sign/{}/{}",
            self.base_url, STORAGE_PATH, self.bucket, path
        );
        let res = self
            .authorized(self.client.post(&url))
            .json(&json!({ "expiresIn": expires_in_secs }))
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(Self::storage_failure(res, "Signing", path).await);
        }

        let body: SignedUrlResponse = res.json().await?;
        Ok(SignedUrl {
            url: format!("{}{}{}", self.base_url, STORAGE_PATH, body.signed_url),
            expires_at,
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let res = self
            .authorized(self.client.delete(self.object_url(path)))
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(Self::storage_failure(res, "Delete of", path).await);
        }
        debug!("Deleted {} from bucket {}", path, self.bucket);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_guess() {
        assert_eq!(content_type_for("mir.pdf"), "application/pdf");
        assert_eq!(content_type_for("photo.JPG"), "image/jpeg");
        assert_eq!(content_type_for("blob"), "application/octet-stream");
    }

    #[test]
    fn test_object_url() {
        let client = RestClient::new("https://db.example/", "anon").with_bucket("site-docs");
        assert_eq!(
            client.object_url("s1/material/m1/dc/1_dc.pdf"),
            "https://db.example/storage/v1/object/site-docs/s1/material/m1/dc/1_dc.pdf"
        );
    }
}
