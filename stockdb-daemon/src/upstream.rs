//! Outbound HTTP to market data providers.
//!
//! Transport errors are retried a fixed number of times with a fixed delay
//! between attempts. Any HTTP response, including non-2xx, is handed back to
//! the caller as is.

mod fmp;

use std::time::Duration;

use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::errors::UpstreamError;

pub use fmp::FmpClient;

pub type Result<T> = std::result::Result<T, UpstreamError>;

#[derive(Debug, Clone)]
pub struct RetryingClient {
    client: reqwest::Client,
    attempts: u32,
    retry_delay: Duration,
}

impl RetryingClient {
    /// `attempts` counts the first try
    pub fn new(attempts: u32, retry_delay: Duration) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), attempts, retry_delay)
    }

    pub fn with_client(
        client: reqwest::Client,
        attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self> {
        if attempts == 0 {
            return Err(UpstreamError::NoAttempts);
        }
        Ok(Self {
            client,
            attempts,
            retry_delay,
        })
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        Self::new(config.retries, config.retry_delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.execute(Method::GET, url, None).await
    }

    pub async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<reqwest::Response> {
        self.execute(Method::POST, url, Some((content_type, body))).await
    }

    pub async fn put(
        &self,
        url: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<reqwest::Response> {
        self.execute(Method::PUT, url, Some((content_type, body))).await
    }

    pub async fn patch(
        &self,
        url: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<reqwest::Response> {
        self.execute(Method::PATCH, url, Some((content_type, body))).await
    }

    pub async fn delete(&self, url: &str) -> Result<reqwest::Response> {
        self.execute(Method::DELETE, url, None).await
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<(&str, &[u8])>,
    ) -> Result<reqwest::Response> {
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            let mut request = self.client.request(method.clone(), url);
            if let Some((content_type, bytes)) = body {
                request = request.header(CONTENT_TYPE, content_type).body(bytes.to_vec());
            }

            match request.send().await {
                Ok(response) => {
                    debug!(
                        %method,
                        url,
                        attempt,
                        status = %response.status(),
                        "Upstream responded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    warn!(
                        %method,
                        url,
                        attempt,
                        attempts = self.attempts,
                        "Upstream request failed: {}",
                        e
                    );
                    last_error = Some(e);
                    if attempt < self.attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        match last_error {
            Some(source) => Err(UpstreamError::Request {
                url: url.to_string(),
                source,
            }),
            None => Err(UpstreamError::NoAttempts),
        }
    }
}
