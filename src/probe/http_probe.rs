use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, REFERER};
use reqwest::{Client, StatusCode};
use url::Url;

use crate::app::{BookwatchError, Result};
use crate::config::ServiceConfig;
use crate::domain::metadata::ProbeResponse;
use crate::domain::{EpisodeId, EpisodeMetadata, WorkId};
use crate::probe::{ContentProbe, UrlStatus};

/// reqwest-based probe sharing one connection pool between short metadata
/// requests and long page transfers.
pub struct HttpProbe {
    client: Client,
    metadata_url: Url,
    request_timeout: Duration,
    page_timeout: Duration,
    referer: Option<HeaderValue>,
}

impl HttpProbe {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        if config.metadata_url.is_empty() {
            return Err(BookwatchError::Config("service.metadata_url is not set".into()));
        }
        let metadata_url = Url::parse(&config.metadata_url)?;

        let mut headers = HeaderMap::new();
        if let (Some(name), Some(value)) = (&config.header_name, &config.header_value) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| BookwatchError::Config(format!("Invalid header name: {}", e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| BookwatchError::Config(format!("Invalid header value: {}", e)))?;
            headers.insert(name, value);
        }

        let referer = match &config.referer {
            Some(referer) => Some(
                HeaderValue::from_str(referer)
                    .map_err(|e| BookwatchError::Config(format!("Invalid referer: {}", e)))?,
            ),
            None => None,
        };

        let client = Client::builder()
            .default_headers(headers)
            .gzip(true)
            .brotli(true)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            metadata_url,
            request_timeout: config.timeout(),
            page_timeout: config.page_timeout(),
            referer,
        })
    }

    fn get(&self, url: &str, timeout: Duration) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url).timeout(timeout);
        if let Some(ref referer) = self.referer {
            request = request.header(REFERER, referer.clone());
        }
        request
    }
}

#[async_trait]
impl ContentProbe for HttpProbe {
    async fn episode_metadata(&self, work: &WorkId, episode: &EpisodeId) -> Result<EpisodeMetadata> {
        let response = self
            .client
            .get(self.metadata_url.clone())
            .query(&[("book_id", work.as_str()), ("episode_id", episode.as_str())])
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(BookwatchError::transport)?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
            return Err(BookwatchError::Forbidden(response.url().to_string()));
        }
        if !status.is_success() {
            return Err(BookwatchError::UnexpectedStatus {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        let body = response.bytes().await.map_err(BookwatchError::transport)?;
        let parsed: ProbeResponse = serde_json::from_slice(&body)?;

        Ok(EpisodeMetadata::from_response(
            work.clone(),
            episode.clone(),
            parsed,
        ))
    }

    async fn url_status(&self, url: &str) -> Result<UrlStatus> {
        let response = self
            .get(url, self.request_timeout)
            .send()
            .await
            .map_err(BookwatchError::transport)?;

        Ok(response.status().into())
    }

    async fn fetch_page(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .get(url, self.page_timeout)
            .send()
            .await
            .map_err(BookwatchError::transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(BookwatchError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await.map_err(BookwatchError::transport)?;
        Ok(body.to_vec())
    }
}
