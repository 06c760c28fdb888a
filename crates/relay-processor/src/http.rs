use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::instrument;

use relay_core::errors::BridgeError;
use relay_core::processor::{DispatchReceipt, DispatchRequest, JobProcessor, JobStatus};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for [`HttpProcessor`].
#[derive(Debug)]
pub struct HttpProcessorConfig {
    pub base_url: String,
    pub dispatch_path: String,
    pub api_key: Option<SecretString>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl HttpProcessorConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            dispatch_path: "/jobs".to_string(),
            api_key: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Talks to the external agent processor over its HTTP job API.
pub struct HttpProcessor {
    client: Client,
    base_url: String,
    dispatch_path: String,
    api_key: Option<SecretString>,
}

impl HttpProcessor {
    pub fn new(config: HttpProcessorConfig) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BridgeError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            dispatch_path: config.dispatch_path,
            api_key: config.api_key,
        })
    }

    fn dispatch_url(&self) -> String {
        format!("{}{}", self.base_url, self.dispatch_path)
    }

    /// `{base}/jobs/{job_id}` with the id percent-encoded as one segment.
    fn status_url(&self, job_id: &str) -> Result<reqwest::Url, BridgeError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| BridgeError::transport(format!("invalid processor url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| BridgeError::transport("processor url cannot carry a path"))?
            .pop_if_empty()
            .extend(["jobs", job_id]);
        Ok(url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key.expose_secret()),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, BridgeError> {
        let resp = self
            .authorize(req)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| BridgeError::transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::from_status(status, &body));
        }
        Ok(resp)
    }
}

#[async_trait]
impl JobProcessor for HttpProcessor {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, request), fields(thread_id = %request.thread_id, agent_id = %request.agent_id))]
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, BridgeError> {
        let resp = self
            .send(self.client.post(self.dispatch_url()).json(request))
            .await?;

        resp.json::<DispatchReceipt>()
            .await
            .map_err(|e| BridgeError::transport(format!("invalid dispatch response: {e}")))
    }

    #[instrument(skip(self))]
    async fn status(&self, job_id: &str) -> Result<JobStatus, BridgeError> {
        let resp = self.send(self.client.get(self.status_url(job_id)?)).await?;

        let body = resp
            .json::<serde_json::Value>()
            .await
            .map_err(|e| BridgeError::transport(format!("invalid status response: {e}")))?;
        Ok(JobStatus::from_body(body))
    }
}
