//! HTTP client for the `stash-api` campaign store.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RevisionStore;
use crate::connectivity::ConnectivityProbe;
use crate::error::{Error, Result};
use crate::models::{Document, DocumentId};
use crate::util::compact_text;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Revision store reached over HTTP.
///
/// Connection failures, timeouts and 5xx responses are transport errors;
/// `409 Conflict` on update means the predicate matched zero rows.
#[derive(Clone)]
pub struct HttpRevisionStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRevisionStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Build a client whose requests fail as transport errors after `timeout`
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn campaign_url(&self, id: &DocumentId) -> String {
        format!("{}/v1/campaigns/{id}", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct CreateCampaignRequest<'a> {
    payload: &'a Value,
}

#[derive(Debug, Serialize)]
struct UpdateCampaignRequest<'a> {
    payload: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    expected_revision: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UpdateCampaignResponse {
    revision: i64,
}

#[derive(Debug, Serialize)]
struct SummaryRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl RevisionStore for HttpRevisionStore {
    async fn create(&self, payload: &Value) -> Result<Document> {
        let response = self
            .client
            .post(format!("{}/v1/campaigns", self.base_url))
            .json(&CreateCampaignRequest { payload })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json::<Document>().await?)
    }

    async fn read(&self, id: &DocumentId) -> Result<Option<Document>> {
        let response = self.client.get(self.campaign_url(id)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(Some(response.json::<Document>().await?))
    }

    async fn update(
        &self,
        id: &DocumentId,
        payload: &Value,
        expected_revision: Option<i64>,
    ) -> Result<Option<i64>> {
        let response = self
            .client
            .put(self.campaign_url(id))
            .json(&UpdateCampaignRequest {
                payload,
                expected_revision,
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT | StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response.json::<UpdateCampaignResponse>().await?;
                Ok(Some(body.revision))
            }
            _ => Err(error_from_response(response).await),
        }
    }

    async fn update_summary(&self, id: &DocumentId, name: &str) -> Result<()> {
        let response = self
            .client
            .put(format!("{}/summary", self.campaign_url(id)))
            .json(&SummaryRequest { name })
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Validation(parse_api_error(status, &body)));
        }
        Err(error_from_response(response).await)
    }
}

impl ConnectivityProbe for HttpRevisionStore {
    async fn probe(&self) -> bool {
        match self
            .client
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!("Connectivity probe failed: {error}");
                false
            }
        }
    }
}

async fn error_from_response(response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = parse_api_error(status, &body);

    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Error::Transport(message)
    } else if status == StatusCode::NOT_FOUND {
        Error::NotFound(message)
    } else {
        Error::InvalidInput(message)
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let url = raw.trim().trim_end_matches('/');
    if url.is_empty() {
        return Err(Error::InvalidInput("store URL must not be empty".to_string()));
    }
    if !["http://", "https://"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
    {
        return Err(Error::InvalidInput(format!(
            "store URL must start with http:// or https://, got {url}"
        )));
    }
    Ok(url.to_string())
}
