use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use itsm_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use crate::{RawRecord, SourceError, TicketSource};

/// Shipped in sample configs; treated the same as no key at all.
pub const API_KEY_PLACEHOLDER: &str = "YOUR_SDP_API_KEY_HERE";

const SDP_ACCEPT: &str = "application/vnd.manageengine.sdp.v3+json";

pub const FIELDS_REQUIRED: &[&str] = &[
    "id",
    "subject",
    "description",
    "status",
    "priority",
    "category",
    "request_type",
    "is_service_request",
    "technician",
    "account",
    "created_time",
    "responded_time",
    "resolved_time",
    "completed_time",
    "time_elapsed",
    "is_overdue",
];

#[derive(Debug, Clone)]
pub struct ApiSourceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub page_size: usize,
    pub max_pages: usize,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for ApiSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sdp.example.com/api/v3".to_string(),
            api_key: None,
            page_size: 100,
            max_pages: 20,
            timeout: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ApiSourceConfig {
    /// The key, unless it is missing, blank or the shipped placeholder.
    pub fn usable_api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && *key != API_KEY_PLACEHOLDER)
    }
}

/// Paged REST fetcher against the ServiceDesk Plus v3 `requests` endpoint.
#[derive(Debug, Clone)]
pub struct ApiSource {
    http: HttpFetcher,
    url: String,
    headers: HeaderMap,
    page_size: usize,
    max_pages: usize,
}

impl ApiSource {
    /// `Ok(None)` when no usable API key is configured.
    pub fn from_config(config: &ApiSourceConfig) -> anyhow::Result<Option<Self>> {
        let Some(api_key) = config.usable_api_key() else {
            warn!("SDP API key not configured; skipping API source");
            return Ok(None);
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            "authtoken",
            HeaderValue::from_str(api_key).context("SDP API key is not a valid header value")?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static(SDP_ACCEPT));

        let http = HttpFetcher::new(HttpClientConfig {
            timeout: config.timeout,
            backoff: config.backoff,
            ..HttpClientConfig::default()
        })?;

        Ok(Some(Self {
            http,
            url: format!("{}/requests", config.base_url.trim_end_matches('/')),
            headers,
            page_size: config.page_size.max(1),
            max_pages: config.max_pages,
        }))
    }

    fn list_info(&self, page: usize) -> JsonValue {
        json!({
            "list_info": {
                "row_count": self.page_size,
                "start_index": page * self.page_size + 1,
                "sort_field": "created_time",
                "sort_order": "desc",
                "fields_required": FIELDS_REQUIRED,
            }
        })
    }

    async fn fetch_page(&self, page: usize) -> Result<Vec<JsonValue>, SourceError> {
        let query = [("input_data", self.list_info(page).to_string())];
        let response = self.http.get(self.name(), &self.url, &query, &self.headers).await?;
        let body: JsonValue = response.json()?;
        match body.get("requests") {
            None | Some(JsonValue::Null) => Ok(Vec::new()),
            Some(JsonValue::Array(items)) => Ok(items.clone()),
            Some(other) => Err(SourceError::InvalidPayload(format!(
                "`requests` is not an array: {other}"
            ))),
        }
    }
}

#[async_trait]
impl TicketSource for ApiSource {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        let mut records = Vec::new();
        for page in 0..self.max_pages {
            let items = match self.fetch_page(page).await {
                Ok(items) => items,
                Err(err) if page == 0 => return Err(err),
                Err(err) => {
                    warn!(page = page + 1, error = %err, "page fetch failed; keeping earlier pages");
                    break;
                }
            };
            if items.is_empty() {
                break;
            }
            let short_page = items.len() < self.page_size;
            records.extend(items.into_iter().map(RawRecord::Api));
            if short_page {
                break;
            }
        }
        info!(records = records.len(), url = %self.url, "api fetch complete");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_and_blank_keys_are_unusable() {
        let mut config = ApiSourceConfig::default();
        assert_eq!(config.usable_api_key(), None);
        config.api_key = Some(API_KEY_PLACEHOLDER.into());
        assert_eq!(config.usable_api_key(), None);
        config.api_key = Some("   ".into());
        assert_eq!(config.usable_api_key(), None);
        config.api_key = Some("abc123".into());
        assert_eq!(config.usable_api_key(), Some("abc123"));
    }

    #[test]
    fn unconfigured_source_is_not_constructed() {
        let source = ApiSource::from_config(&ApiSourceConfig::default()).unwrap();
        assert!(source.is_none());
    }

    #[test]
    fn list_info_pages_are_one_based_and_sorted_newest_first() {
        let config = ApiSourceConfig {
            api_key: Some("k".into()),
            page_size: 25,
            ..ApiSourceConfig::default()
        };
        let source = ApiSource::from_config(&config).unwrap().unwrap();
        let info = source.list_info(2);
        assert_eq!(info["list_info"]["row_count"], 25);
        assert_eq!(info["list_info"]["start_index"], 51);
        assert_eq!(info["list_info"]["sort_field"], "created_time");
        assert_eq!(info["list_info"]["sort_order"], "desc");
        assert_eq!(source.url, "https://sdp.example.com/api/v3/requests");
    }
}
