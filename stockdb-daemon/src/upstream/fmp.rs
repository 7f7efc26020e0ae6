use std::collections::BTreeMap;

use reqwest::Url;

use super::{Result, RetryingClient};
use crate::config::UpstreamConfig;
use crate::errors::UpstreamError;

/// Financial Modeling Prep client. Every request carries the API key.
#[derive(Debug, Clone)]
pub struct FmpClient {
    http: RetryingClient,
    base_url: String,
    api_key: String,
}

impl FmpClient {
    pub fn new(
        http: RetryingClient,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// `None` when no API key is configured
    pub fn from_config(config: &UpstreamConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.as_deref().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        let http = RetryingClient::from_config(config)?;
        Ok(Some(Self::new(http, config.base_url.clone(), api_key)))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full request URL for `endpoint` with `params` and the API key as query
    pub fn url(&self, endpoint: &str, params: &BTreeMap<String, String>) -> Result<Url> {
        let joined = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        let mut url = Url::parse(&joined)
            .map_err(|e| UpstreamError::InvalidUrl(format!("{}: {}", joined, e)))?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                if key != "api_key" {
                    query.append_pair(key, value);
                }
            }
            query.append_pair("api_key", &self.api_key);
        }
        Ok(url)
    }

    pub async fn get(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<reqwest::Response> {
        let url = self.url(endpoint, params)?;
        self.http.get(url.as_str()).await
    }
}
