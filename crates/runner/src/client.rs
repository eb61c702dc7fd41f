//! Run store reached through the dashboard's callback API

use std::time::Duration;

use async_trait::async_trait;
use playdeck_common::{
    CreateTestResultsRequest, Error, Result, RunReport, RunStatus, RunStore, RunUpdate,
    StatusWrite, TestRef, TestResult, TestResultUpdate, UpdateTestResultRequest,
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookResponse {
    status_write: StatusWrite,
}

#[derive(Deserialize)]
struct CreatedResults {
    data: Vec<TestResult>,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: RunStatus,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP client for the dashboard's coordinator endpoints.
#[derive(Debug, Clone)]
pub struct HttpRunStore {
    base_url: String,
    client: Client,
}

fn transport(e: reqwest::Error) -> Error {
    Error::Transport(e.to_string())
}

impl HttpRunStore {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(transport)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-2xx response into an error carrying the server's message.
    async fn check(response: Response, kind: &str, id: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(Error::not_found(kind, id));
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        Err(Error::Transport(format!("{} returned {}: {}", kind, status, message)))
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
        response.json::<T>().await.map_err(transport)
    }
}

#[async_trait]
impl RunStore for HttpRunStore {
    async fn update_run(&self, run_id: &str, update: RunUpdate) -> Result<StatusWrite> {
        let body = RunReport {
            run_id: run_id.to_string(),
            update,
        };
        let response = self
            .client
            .post(self.url("/api/webhook"))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let response = Self::check(response, "run", run_id).await?;
        let parsed: WebhookResponse = Self::json(response).await?;
        Ok(parsed.status_write)
    }

    async fn bulk_create_test_results(&self, run_id: &str, tests: &[TestRef]) -> Result<Vec<TestResult>> {
        let body = CreateTestResultsRequest {
            test_run_id: run_id.to_string(),
            tests: tests.to_vec(),
        };
        let response = self
            .client
            .post(self.url("/api/test-results"))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let response = Self::check(response, "run", run_id).await?;
        let parsed: CreatedResults = Self::json(response).await?;
        Ok(parsed.data)
    }

    async fn update_test_result(
        &self,
        run_id: &str,
        test_name: &str,
        test_file: Option<&str>,
        update: TestResultUpdate,
    ) -> Result<()> {
        let body = UpdateTestResultRequest {
            test_run_id: run_id.to_string(),
            test_name: test_name.to_string(),
            test_file: test_file.map(str::to_string),
            update,
        };
        let response = self
            .client
            .patch(self.url("/api/test-results"))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        Self::check(response, "test result", test_name).await?;
        Ok(())
    }

    async fn get_run_status(&self, run_id: &str) -> Result<Option<RunStatus>> {
        let response = self
            .client
            .get(self.url(&format!("/api/test-run-status/{}", run_id)))
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response, "run", run_id).await?;
        let parsed: StatusResponse = Self::json(response).await?;
        Ok(Some(parsed.status))
    }
}
