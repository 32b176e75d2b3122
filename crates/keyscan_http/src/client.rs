//! Blocking client for the account service's scan and license endpoints.
//!
//! The client never retries; retry and backoff belong to the scan core.

use std::time::Duration;

use keyscan_core::{
    FetchError, GroupMutator, Page, PageFetcher, PageRequest, Record, ScanSelector,
};
use reqwest::blocking::{Client, Response};
use reqwest::header::InvalidHeaderValue;
use reqwest::Url;
use thiserror::Error;

use crate::auth::AuthHeaders;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Collection a client scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanResource {
    Accounts,
    Licenses,
}

impl ScanResource {
    pub fn path(self) -> &'static str {
        match self {
            ScanResource::Accounts => "accounts",
            ScanResource::Licenses => "licenses",
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid service URL '{endpoint}': {reason}")]
    Endpoint { endpoint: String, reason: String },
    #[error("invalid credential header: {0}")]
    Header(#[from] InvalidHeaderValue),
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct AccountServiceClient {
    client: Client,
    base: Url,
    resource: ScanResource,
}

impl AccountServiceClient {
    /// Create a client for the given service root (e.g. `http://localhost:8080/account/v2`).
    pub fn new(
        endpoint: &str,
        resource: ScanResource,
        auth: &AuthHeaders,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let base = parse_endpoint(endpoint)?;
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(auth.to_header_map()?)
            .build()?;
        Ok(Self {
            client,
            base,
            resource,
        })
    }

    pub fn resource(&self) -> ScanResource {
        self.resource
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, ClientError> {
    let invalid = |reason: String| ClientError::Endpoint {
        endpoint: endpoint.to_string(),
        reason,
    };
    let url = Url::parse(endpoint.trim_end_matches('/')).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(invalid("expected an http(s) URL".to_string()));
    }
    Ok(url)
}

/// Appends path segments to the service root. Segments are percent-encoded.
fn endpoint_url(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Full URL of one page request against `resource`.
pub fn build_scan_url(base: &Url, resource: ScanResource, request: &PageRequest<'_>) -> Url {
    let mut url = endpoint_url(base, &[resource.path()]);
    {
        let mut query = url.query_pairs_mut();
        match &request.filter.selector {
            ScanSelector::Attribute { name, value } => {
                query.append_pair("name", name).append_pair("value", value);
            }
            ScanSelector::Role { role } => {
                query.append_pair("role", role);
            }
        }
        if let Some(product) = &request.filter.product {
            query.append_pair("product", product);
        }
        query
            .append_pair("startKey", &request.start_key.to_string())
            .append_pair("startInclusive", bool_param(request.start_inclusive))
            .append_pair("endKey", &request.end_key.to_string())
            .append_pair("endInclusive", bool_param(request.end_inclusive))
            .append_pair("count", &request.count.to_string());
        if !request.filter.attribute_names.is_empty() {
            query.append_pair("attributeNames", &request.filter.attribute_names.join(","));
        }
    }
    url
}

fn bool_param(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn transport_error(err: reqwest::Error) -> FetchError {
    FetchError::Transport(err.to_string())
}

/// Turns a non-2xx response into a classified error carrying a bounded body excerpt.
fn status_error(response: Response) -> FetchError {
    let status = response.status().as_u16();
    let body = response.text().unwrap_or_default();
    let excerpt: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
    FetchError::from_status(status, excerpt)
}

impl PageFetcher for AccountServiceClient {
    fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Page, FetchError> {
        let url = build_scan_url(&self.base, self.resource, request);
        log::debug!("GET {url}");

        let response = self.client.get(url).send().map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(status_error(response));
        }
        let records: Vec<Record> = response
            .json()
            .map_err(|err| FetchError::Decode(err.to_string()))?;
        Ok(Page::new(records))
    }
}

impl GroupMutator for AccountServiceClient {
    fn move_member(&self, member: &str, target_key: i64) -> Result<(), FetchError> {
        let url = endpoint_url(
            &self.base,
            &["licenses", &target_key.to_string(), "users", member],
        );
        log::debug!("POST {url}");

        let response = self.client.post(url).send().map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(status_error(response));
        }
        Ok(())
    }

    fn delete_group(&self, key: i64) -> Result<(), FetchError> {
        let url = endpoint_url(&self.base, &["licenses", &key.to_string()]);
        log::debug!("DELETE {url}");

        let response = self.client.delete(url).send().map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(status_error(response));
        }
        Ok(())
    }
}
