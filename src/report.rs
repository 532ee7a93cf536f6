//! Export records and CI-aware progress grouping.
//!
//! The flattened, deduplicated descriptor list serializes as an
//! ordered sequence of records; this is the sole durable artifact the
//! resolver produces for downstream consumption (CI pipelines fan out
//! on it).

use crate::image::ImageDescriptor;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::info;

/// One exported build unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Final image reference, repository plus canonical tag.
    pub image: String,
    pub phpver: String,
    pub distro: String,
    pub distrover: String,
    /// Comma-joined alias list.
    pub aliases: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensionver: Option<String>,
    /// The runtime image an extension layers on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_image: Option<String>,
    /// Composer bootstrap version baked into extension images.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composer: Option<String>,
}

impl ImageRecord {
    pub fn from_descriptor(image: &ImageDescriptor) -> Self {
        let extension = image.extension.as_ref();
        Self {
            image: image.image_ref(),
            phpver: image.runtime_version.to_string(),
            distro: image.distro.clone(),
            distrover: image.distro_version.clone(),
            aliases: image.aliases().join(","),
            extension: extension.map(|e| e.name.clone()),
            extensionver: extension.map(|e| e.version.to_string()),
            base_image: extension.map(|e| e.base_image.clone()),
            composer: extension.map(|e| e.bootstrap_version.clone()),
        }
    }
}

/// Serialize records in export order.
pub fn to_json(records: &[ImageRecord]) -> Result<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

fn in_ci() -> bool {
    static CI: OnceLock<bool> = OnceLock::new();
    *CI.get_or_init(|| std::env::var("CI").map(|v| v == "true").unwrap_or(false))
}

/// Open a collapsible log group on CI, a plain info line otherwise.
pub fn log_group(label: &str) {
    if in_ci() {
        println!("::group::{label}");
    } else {
        info!("{label}");
    }
}

/// Close the current CI log group.
pub fn log_endgroup() {
    if in_ci() {
        println!("::endgroup::");
    }
}
