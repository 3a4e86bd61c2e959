//! Normalization of joined rows at the data-access boundary.
//!
//! A joined relation comes back as `null`, an object, or an array holding zero
//! or one rows depending on the join cardinality the store inferred.
//! [`ZeroOrOne`] folds all of those into an `Option` before anything reaches
//! the aggregators.

use crate::error::{Result, RollupError};
use crate::schema::{ComplianceDocument, GrnInvoice, GrnLineItem, LegacyGrnRecord, Supplier};
use chrono::NaiveDate;
use log::{debug, warn};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct ZeroOrOne<T>(Option<T>);

impl<T> ZeroOrOne<T> {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn one(value: T) -> Self {
        Self(Some(value))
    }

    pub fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }

    pub fn into_option(self) -> Option<T> {
        self.0
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }
}

impl<T> Default for ZeroOrOne<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T> From<ZeroOrOne<T>> for Option<T> {
    fn from(value: ZeroOrOne<T>) -> Self {
        value.0
    }
}

impl<T> From<Option<T>> for ZeroOrOne<T> {
    fn from(value: Option<T>) -> Self {
        Self(value)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ZeroOrOneRepr<T> {
    Many(Vec<T>),
    One(T),
}

impl<'de, T> Deserialize<'de> for ZeroOrOne<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<ZeroOrOneRepr<T>>::deserialize(deserializer)? {
            None => Ok(Self(None)),
            Some(ZeroOrOneRepr::One(value)) => Ok(Self(Some(value))),
            Some(ZeroOrOneRepr::Many(mut rows)) => match rows.len() {
                0 | 1 => Ok(Self(rows.pop())),
                n => Err(de::Error::custom(format!(
                    "expected at most one related row, got {}",
                    n
                ))),
            },
        }
    }
}

impl<T: Serialize> Serialize for ZeroOrOne<T> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSupplierRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMaterialRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGrnLineItemRow {
    pub id: String,
    pub grn_invoice_id: String,
    #[serde(default)]
    pub material_id: Option<String>,
    #[serde(default)]
    pub material_name: Option<String>,
    #[serde(default, alias = "materials")]
    pub material: ZeroOrOne<RawMaterialRef>,
    pub quantity: f64,
    #[serde(default)]
    pub unit: Option<String>,
    pub rate: f64,
    /// Numeric column; arrives as `18` or `18.0`.
    pub gst_rate: f64,
    #[serde(default, alias = "grn_line_item_documents")]
    pub documents: Vec<ComplianceDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGrnInvoiceRow {
    pub id: String,
    pub site_id: String,
    pub supplier_id: String,
    pub invoice_number: String,
    pub grn_date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, alias = "suppliers")]
    pub supplier: ZeroOrOne<RawSupplierRef>,
    #[serde(default, alias = "grn_invoice_dc_documents")]
    pub dc_document: ZeroOrOne<ComplianceDocument>,
    #[serde(default, alias = "grn_line_items")]
    pub line_items: Vec<RawGrnLineItemRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLegacyGrnRow {
    pub id: String,
    pub site_id: String,
    #[serde(default)]
    pub material_id: Option<String>,
    #[serde(default)]
    pub material_name: Option<String>,
    #[serde(default, alias = "materials")]
    pub material: ZeroOrOne<RawMaterialRef>,
    #[serde(default)]
    pub supplier_id: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    pub grn_date: NaiveDate,
    pub quantity: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default, alias = "grn_documents")]
    pub documents: Vec<ComplianceDocument>,
}

const UNKNOWN_MATERIAL: &str = "Unknown material";

fn gst_rate_from_raw(line_id: &str, raw: f64) -> Result<u8> {
    if !raw.is_finite() || !(0.0..=100.0).contains(&raw) || raw.fract() != 0.0 {
        return Err(RollupError::validation(
            format!("GRN line item {}", line_id),
            format!("GST rate {} is not a whole percentage", raw),
        ));
    }
    Ok(raw as u8)
}

fn material_name(explicit: Option<String>, joined: Option<&RawMaterialRef>) -> Option<String> {
    explicit
        .filter(|n| !n.trim().is_empty())
        .or_else(|| joined.map(|m| m.name.clone()))
}

fn convert_line_item(row: RawGrnLineItemRow) -> Result<GrnLineItem> {
    let gst_rate = gst_rate_from_raw(&row.id, row.gst_rate)?;
    let material = row.material.into_option();

    let name = material_name(row.material_name, material.as_ref()).unwrap_or_else(|| {
        warn!("GRN line item {} has no material name", row.id);
        UNKNOWN_MATERIAL.to_string()
    });
    let unit = row
        .unit
        .or_else(|| material.as_ref().and_then(|m| m.unit.clone()))
        .unwrap_or_default();

    Ok(GrnLineItem {
        material_id: row.material_id.or_else(|| material.map(|m| m.id)),
        id: row.id,
        grn_invoice_id: row.grn_invoice_id,
        material_name: name,
        quantity: row.quantity,
        unit,
        rate: row.rate,
        gst_rate,
        documents: row.documents,
    })
}

/// Converts joined GRN invoice rows into typed invoices and the distinct
/// suppliers they reference, sorted by supplier id.
pub fn normalize_grn_rows(rows: Vec<RawGrnInvoiceRow>) -> Result<(Vec<GrnInvoice>, Vec<Supplier>)> {
    let mut suppliers: BTreeMap<String, Supplier> = BTreeMap::new();
    let mut invoices = Vec::with_capacity(rows.len());

    for row in rows {
        match row.supplier.into_option() {
            Some(s) => {
                suppliers.entry(s.id.clone()).or_insert(Supplier {
                    id: s.id,
                    name: s.name,
                });
            }
            None => debug!(
                "GRN {} has no joined supplier row for {}",
                row.id, row.supplier_id
            ),
        }

        let line_items = row
            .line_items
            .into_iter()
            .map(convert_line_item)
            .collect::<Result<Vec<_>>>()?;

        invoices.push(GrnInvoice {
            id: row.id,
            site_id: row.site_id,
            supplier_id: row.supplier_id,
            invoice_number: row.invoice_number,
            grn_date: row.grn_date,
            notes: row.notes,
            dc_document: row.dc_document.into_option(),
            line_items,
        });
    }

    Ok((invoices, suppliers.into_values().collect()))
}

pub fn normalize_legacy_rows(rows: Vec<RawLegacyGrnRow>) -> Vec<LegacyGrnRecord> {
    rows.into_iter()
        .map(|row| {
            let material = row.material.into_option();
            LegacyGrnRecord {
                material_name: material_name(row.material_name, material.as_ref())
                    .unwrap_or_else(|| UNKNOWN_MATERIAL.to_string()),
                unit: row
                    .unit
                    .or_else(|| material.as_ref().and_then(|m| m.unit.clone()))
                    .unwrap_or_default(),
                material_id: row.material_id.or_else(|| material.map(|m| m.id)),
                id: row.id,
                site_id: row.site_id,
                supplier_id: row.supplier_id,
                invoice_number: row.invoice_number,
                grn_date: row.grn_date,
                quantity: row.quantity,
                documents: row.documents,
            }
        })
        .collect()
}

/// Parses a JSON array of joined GRN invoice rows.
pub fn parse_grn_rows(json: &str) -> Result<(Vec<GrnInvoice>, Vec<Supplier>)> {
    let rows: Vec<RawGrnInvoiceRow> = serde_json::from_str(json)?;
    normalize_grn_rows(rows)
}
