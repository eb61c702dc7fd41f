//! Dashboard HTTP client

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use playdeck_common::{Run, RunStatus, TestResult, OWNER_HEADER};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: RunStatus,
}

#[derive(Deserialize)]
struct RunResponse {
    data: Run,
    results: Vec<TestResult>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Response of `POST /api/stop-test/:id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub message: String,
    pub report: serde_json::Value,
}

/// Client for the Playdeck dashboard
pub struct DashboardClient {
    base_url: String,
    user: Option<String>,
    client: Client,
}

impl DashboardClient {
    pub fn new(base_url: &str, user: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the owner header; user-scoped routes refuse requests without it.
    fn as_user(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let user = self
            .user
            .as_deref()
            .ok_or_else(|| anyhow!("--user (or PLAYDECK_USER) is required for this command"))?;
        Ok(request.header(OWNER_HEADER, user))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("cannot reach dashboard at {}", self.base_url))?;
        let response = check(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Check if the dashboard is up
    pub async fn health_check(&self) -> bool {
        match self.client.get(self.url("/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn run_status(&self, run_id: &str) -> Result<RunStatus> {
        let request = self
            .client
            .get(self.url(&format!("/api/test-run-status/{}", run_id)));
        let parsed: StatusResponse = self.send(request).await?;
        Ok(parsed.status)
    }

    pub async fn list_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let request = self
            .as_user(self.client.get(self.url("/api/runs")))?
            .query(&[("limit", limit)]);
        let parsed: DataResponse<Vec<Run>> = self.send(request).await?;
        Ok(parsed.data)
    }

    /// A run and its per-test results.
    pub async fn get_run(&self, run_id: &str) -> Result<(Run, Vec<TestResult>)> {
        let request = self.as_user(self.client.get(self.url(&format!("/api/runs/{}", run_id))))?;
        let parsed: RunResponse = self.send(request).await?;
        Ok((parsed.data, parsed.results))
    }

    pub async fn stop(&self, run_id: &str) -> Result<StopResponse> {
        let request =
            self.as_user(self.client.post(self.url(&format!("/api/stop-test/{}", run_id))))?;
        self.send(request).await
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    bail!("dashboard returned {}: {}", status, message)
}
