//! External identity match service
//!
//! The service assigns a *reference id* to every identity it knows. A
//! definite answer carries that id; a fuzzy answer carries a match request
//! id and a list of potential matches for a human to choose from.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error, instrument};

use crate::error::CorrelationError;

/// Reference id the service reads as "create a new identity"
pub const NEW_REFERENCE_ID: &str = "new";

/// Subject as presented to the match service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    /// System-of-record label of the source
    pub sor_label: String,
    /// Id of the subject within its system of record
    pub sor_id: String,
    pub attributes: Map<String, Value>,
}

/// A potential match returned by a fuzzy answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PotentialMatch {
    /// Absent for the "new identity" option
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub new_identity: bool,
}

impl PotentialMatch {
    pub fn is_new_identity(&self) -> bool {
        self.new_identity || self.reference_id.is_none()
    }
}

/// Answer to a match request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchResponse {
    /// Set when the service is certain
    pub reference_id: Option<String>,
    /// Set when a human has to decide
    pub match_request_id: Option<String>,
    pub candidates: Vec<PotentialMatch>,
}

impl MatchResponse {
    pub fn definite(reference_id: impl Into<String>) -> Self {
        Self {
            reference_id: Some(reference_id.into()),
            ..Self::default()
        }
    }

    pub fn fuzzy(match_request_id: impl Into<String>, candidates: Vec<PotentialMatch>) -> Self {
        Self {
            reference_id: None,
            match_request_id: Some(match_request_id.into()),
            candidates,
        }
    }
}

#[async_trait]
pub trait MatchService: Send + Sync + 'static {
    async fn execute_match(&self, request: &MatchRequest) -> Result<MatchResponse, CorrelationError>;

    /// Report the decision on a fuzzy match
    ///
    /// `reference_id = None` asks for a new identity. Returns the reference
    /// id the subject ends up with, when the service tells it.
    async fn resolve(
        &self,
        request: &MatchRequest,
        match_request_id: &str,
        reference_id: Option<&str>,
    ) -> Result<Option<String>, CorrelationError>;
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Connection settings of [`HttpMatchService`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchServiceConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_timeout", with = "govrun_activity::reliability::duration_millis")]
    pub timeout: Duration,
}

impl MatchServiceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: None,
            password: None,
            timeout: default_timeout(),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefiniteBody {
    reference_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FuzzyBody {
    match_request: Option<String>,
    #[serde(default)]
    candidates: Vec<PotentialMatch>,
}

/// [`MatchService`] client for ID-Match-API style services
///
/// Every call is `PUT {base}/people/{sor}/{sorId}`: `200`/`201` answer with
/// `{referenceId}`, `300`/`202` with `{matchRequest, candidates}`.
pub struct HttpMatchService {
    config: MatchServiceConfig,
    client: Client,
}

impl HttpMatchService {
    pub fn new(config: MatchServiceConfig) -> Result<Self, CorrelationError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CorrelationError::configuration(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn url(&self, request: &MatchRequest) -> String {
        format!(
            "{}/people/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            request.sor_label,
            request.sor_id
        )
    }

    async fn put(&self, request: &MatchRequest, body: Value) -> Result<MatchResponse, CorrelationError> {
        let url = self.url(request);
        debug!(url = %url, "Sending match request");

        let mut builder = self.client.put(&url).json(&body);
        if let Some(username) = &self.config.username {
            builder = builder.basic_auth(username, self.config.password.as_deref());
        }

        let response = builder.send().await.map_err(|e| CorrelationError::MatchService {
            message: e.to_string(),
            status: None,
        })?;

        let status = response.status();
        match status {
            StatusCode::OK | StatusCode::CREATED => {
                let body: DefiniteBody = response.json().await.map_err(invalid_body)?;
                match body.reference_id {
                    Some(reference_id) => Ok(MatchResponse::definite(reference_id)),
                    None => Err(CorrelationError::MatchService {
                        message: "definite answer without referenceId".to_string(),
                        status: Some(status.as_u16()),
                    }),
                }
            }
            StatusCode::MULTIPLE_CHOICES | StatusCode::ACCEPTED => {
                let body: FuzzyBody = response.json().await.map_err(invalid_body)?;
                let match_request_id = body.match_request.ok_or_else(|| CorrelationError::MatchService {
                    message: "fuzzy answer without matchRequest".to_string(),
                    status: Some(status.as_u16()),
                })?;
                Ok(MatchResponse::fuzzy(match_request_id, body.candidates))
            }
            _ => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                error!(status = %status, body = %body, "Match service request failed");
                Err(CorrelationError::MatchService {
                    message: format!("HTTP {}: {}", status, body),
                    status: Some(status.as_u16()),
                })
            }
        }
    }
}

fn invalid_body(e: reqwest::Error) -> CorrelationError {
    CorrelationError::MatchService {
        message: format!("invalid response body: {e}"),
        status: e.status().map(|s| s.as_u16()),
    }
}

#[async_trait]
impl MatchService for HttpMatchService {
    #[instrument(skip(self, request), fields(sor = %request.sor_label, sor_id = %request.sor_id))]
    async fn execute_match(&self, request: &MatchRequest) -> Result<MatchResponse, CorrelationError> {
        self.put(request, json!({ "sorAttributes": request.attributes }))
            .await
    }

    #[instrument(skip(self, request), fields(sor = %request.sor_label, sor_id = %request.sor_id))]
    async fn resolve(
        &self,
        request: &MatchRequest,
        match_request_id: &str,
        reference_id: Option<&str>,
    ) -> Result<Option<String>, CorrelationError> {
        let body = json!({
            "sorAttributes": request.attributes,
            "referenceId": reference_id.unwrap_or(NEW_REFERENCE_ID),
            "matchRequest": match_request_id,
        });
        let response = self.put(request, body).await?;
        Ok(response.reference_id)
    }
}
