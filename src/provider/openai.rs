//! OpenAI Batch API client.
//!
//! Implements the three provider interactions the pipeline needs: upload a
//! JSONL input file, create a batch over it, and fetch batch state plus the
//! output file once completed. Works with any service implementing the
//! OpenAI files/batches API.

use super::{BatchInfo, BatchProvider, ProviderBatchStatus, ProviderError};
use crate::scoring::request::BATCH_ENDPOINT;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

const COMPLETION_WINDOW: &str = "24h";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct OpenAiBatchProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiBatchProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(REQUEST_TIMEOUT)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

fn map_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Connection(e.to_string())
    }
}

#[async_trait]
impl BatchProvider for OpenAiBatchProvider {
    async fn upload_batch_file(&self, jsonl: &str) -> Result<String, ProviderError> {
        let part = Part::bytes(jsonl.as_bytes().to_vec())
            .file_name("batch.jsonl")
            .mime_str("application/jsonl")
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let form = Form::new().text("purpose", "batch").part("file", part);

        let response = self
            .request(reqwest::Method::POST, "/v1/files")
            .multipart(form)
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = Self::check_status(response).await?;

        let file: FileObject = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        debug!(file_id = %file.id, "Uploaded batch input file");
        Ok(file.id)
    }

    async fn create_batch(&self, input_file_id: &str) -> Result<String, ProviderError> {
        let request = json!({
            "input_file_id": input_file_id,
            "endpoint": BATCH_ENDPOINT,
            "completion_window": COMPLETION_WINDOW,
        });

        let response = self
            .request(reqwest::Method::POST, "/v1/batches")
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = Self::check_status(response).await?;

        let batch: BatchObject = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        debug!(batch_id = %batch.id, "Created batch");
        Ok(batch.id)
    }

    async fn get_batch(&self, batch_id: &str) -> Result<BatchInfo, ProviderError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/v1/batches/{}", batch_id))
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = Self::check_status(response).await?;

        let batch: BatchObject = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(batch.into())
    }

    async fn download_file(&self, file_id: &str) -> Result<String, ProviderError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/files/{}/content", file_id),
            )
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = Self::check_status(response).await?;

        response
            .text()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

// OpenAI API types

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BatchObject {
    id: String,
    status: String,
    output_file_id: Option<String>,
    request_counts: Option<RequestCounts>,
}

#[derive(Debug, Deserialize)]
struct RequestCounts {
    total_tokens: Option<i64>,
}

impl From<BatchObject> for BatchInfo {
    fn from(batch: BatchObject) -> Self {
        BatchInfo {
            id: batch.id,
            status: ProviderBatchStatus::parse(&batch.status),
            output_file_id: batch.output_file_id,
            total_tokens: batch.request_counts.and_then(|c| c.total_tokens),
        }
    }
}
