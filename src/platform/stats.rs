use std::time::Duration;

use async_trait::async_trait;

use super::StatsFetcher;
use super::error::{PlatformError, Result as PlatformResult};
use super::types::LivestreamResponse;

const STATS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Polls a page's statistics API URL.
#[derive(Clone)]
pub struct HttpStatsFetcher {
    http: reqwest::Client,
}

impl HttpStatsFetcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl StatsFetcher for HttpStatsFetcher {
    async fn fetch(&self, api_url: &str) -> PlatformResult<LivestreamResponse> {
        let response = self
            .http
            .get(api_url)
            .timeout(STATS_REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let parsed = serde_json::from_str::<LivestreamResponse>(&body)?;
        Ok(parsed)
    }
}
