use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::keyspace::KeySpace;

pub const DEFAULT_PARTITIONS: usize = 10;
pub const MAX_PARTITIONS: usize = 1_000;
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Which server-side index a scan walks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanSelector {
    /// Match records whose attribute `name` equals the JSON-encoded `value`.
    Attribute { name: String, value: String },
    /// Match records granting `role`.
    Role { role: String },
}

/// Everything the remote endpoint needs besides the key window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanFilter {
    pub selector: ScanSelector,
    pub product: Option<String>,
    pub attribute_names: Vec<String>,
}

impl ScanFilter {
    pub fn attribute(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            selector: ScanSelector::Attribute {
                name: name.into(),
                value: value.into(),
            },
            product: None,
            attribute_names: Vec::new(),
        }
    }

    pub fn role(role: impl Into<String>) -> Self {
        Self {
            selector: ScanSelector::Role { role: role.into() },
            product: None,
            attribute_names: Vec::new(),
        }
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn with_attribute_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attribute_names = names.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanRequest {
    pub selector: ScanSelector,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub attribute_names: Vec<String>,
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub key_space: Option<KeySpace>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedScanRequest {
    pub filter: ScanFilter,
    pub partitions: usize,
    pub page_size: u32,
    pub key_space: KeySpace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn default_partitions() -> usize {
    DEFAULT_PARTITIONS
}

pub fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

pub fn validate_page_size(page_size: u32) -> Result<u32, ValidationError> {
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(ValidationError::new(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }
    Ok(page_size)
}

pub fn normalize_request(payload: ScanRequest) -> Result<NormalizedScanRequest, ValidationError> {
    let selector = match payload.selector {
        ScanSelector::Attribute { name, value } => {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(ValidationError::new("attribute name cannot be empty"));
            }
            let value = value.trim().to_string();
            if serde_json::from_str::<Value>(&value).is_err() {
                return Err(ValidationError::new(format!(
                    "The value '{value}' is not valid JSON. For strings, use quotes like: '\"example\"'"
                )));
            }
            ScanSelector::Attribute { name, value }
        }
        ScanSelector::Role { role } => {
            let role = role.trim().to_string();
            if role.is_empty() {
                return Err(ValidationError::new("role cannot be empty"));
            }
            ScanSelector::Role { role }
        }
    };

    let product = payload
        .product
        .map(|product| product.trim().to_string())
        .filter(|product| !product.is_empty());

    let mut attribute_names = Vec::with_capacity(payload.attribute_names.len());
    for name in payload.attribute_names {
        let name = name.trim();
        if !name.is_empty() && !attribute_names.iter().any(|seen: &String| seen == name) {
            attribute_names.push(name.to_string());
        }
    }

    if payload.partitions == 0 {
        return Err(ValidationError::new(
            "partitions must be a positive integer",
        ));
    }

    if payload.partitions > MAX_PARTITIONS {
        return Err(ValidationError::new(format!(
            "partitions exceeds MAX_PARTITIONS={MAX_PARTITIONS}"
        )));
    }

    let page_size = validate_page_size(payload.page_size)?;

    let key_space = match payload.key_space {
        Some(space) => KeySpace::new(space.start(), space.end())?,
        None => KeySpace::full(),
    };

    Ok(NormalizedScanRequest {
        filter: ScanFilter {
            selector,
            product,
            attribute_names,
        },
        partitions: payload.partitions,
        page_size,
        key_space,
    })
}

/// Stable identifier for one scan, used to correlate log lines.
pub fn scan_fingerprint(request: &NormalizedScanRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stable_contract_json(request));
    format!("{:x}", hasher.finalize())
}

pub fn stable_contract_json(value: impl Serialize) -> String {
    serde_json::to_string(&value).unwrap_or_default()
}
