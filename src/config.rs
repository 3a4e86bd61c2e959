use crate::error::{Result, RollupError};
use crate::storage::{DEFAULT_SIGNED_URL_EXPIRY_SECS, MAX_SIGNED_URL_EXPIRY_SECS};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct RollupConfig {
    #[schemars(description = "Progress at or above which a headline or site is badged Ready (default 100)")]
    pub ready_threshold: u8,

    #[schemars(description = "Progress at or above which a headline or site is badged In Progress (default 50)")]
    pub in_progress_threshold: u8,

    #[schemars(description = "Lifetime of signed download URLs, in seconds (default 3600)")]
    pub signed_url_expiry_secs: u64,

    #[schemars(description = "GST percentages accepted on GRN line items")]
    pub allowed_gst_rates: Vec<u8>,

    #[schemars(description = "Width of the trailing expense window, in days (default 7)")]
    pub rolling_window_days: usize,

    #[schemars(description = "Storage bucket holding compliance documents")]
    pub storage_bucket: String,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            ready_threshold: 100,
            in_progress_threshold: 50,
            signed_url_expiry_secs: DEFAULT_SIGNED_URL_EXPIRY_SECS,
            allowed_gst_rates: vec![5, 12, 18],
            rolling_window_days: 7,
            storage_bucket: "documents".to_string(),
        }
    }
}

impl RollupConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ready_threshold > 100 || self.ready_threshold == 0 {
            return Err(RollupError::InvalidConfig(format!(
                "ready_threshold {} must be between 1 and 100",
                self.ready_threshold
            )));
        }

        if self.in_progress_threshold >= self.ready_threshold {
            return Err(RollupError::InvalidConfig(format!(
                "in_progress_threshold {} must be below ready_threshold {}",
                self.in_progress_threshold, self.ready_threshold
            )));
        }

        if self.signed_url_expiry_secs == 0 || self.signed_url_expiry_secs > MAX_SIGNED_URL_EXPIRY_SECS {
            return Err(RollupError::InvalidConfig(format!(
                "signed_url_expiry_secs {} must be between 1 and {}",
                self.signed_url_expiry_secs, MAX_SIGNED_URL_EXPIRY_SECS
            )));
        }

        if self.allowed_gst_rates.is_empty() || self.allowed_gst_rates.iter().any(|&r| r > 100) {
            return Err(RollupError::InvalidConfig(format!(
                "allowed_gst_rates {:?} must be a non-empty list of percentages",
                self.allowed_gst_rates
            )));
        }

        if self.rolling_window_days == 0 {
            return Err(RollupError::InvalidConfig(
                "rolling_window_days must be at least 1".to_string(),
            ));
        }

        if self.storage_bucket.trim().is_empty() {
            return Err(RollupError::InvalidConfig(
                "storage_bucket must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(RollupConfig)
    }
}
