//! HTTP client for the control plane REST and SSE endpoints.

use std::collections::VecDeque;

use futures_util::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use agentrun_core::{Decision, Event, Run, RunId, RunMode, Task};

use crate::error::ClientError;
use crate::sse::SseParser;

/// Body of POST /v1/runs.
#[derive(Debug, Serialize)]
pub struct StartRunBody {
    pub goal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,
    pub mode: RunMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartRunReply {
    run_id: RunId,
}

#[derive(Debug, Deserialize)]
struct RunList {
    runs: Vec<Run>,
}

/// A run with its tasks and events.
#[derive(Debug, Deserialize)]
pub struct RunDetail {
    pub run: Run,
    pub tasks: Vec<Task>,
    pub events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// HTTP client for the control plane.
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client.
    pub fn new(base_url: &str) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn start_run(&self, body: &StartRunBody) -> Result<RunId, ClientError> {
        let url = format!("{}/v1/runs", self.base_url);
        debug!(url = %url, "POST request");

        let response = self.inner.post(&url).json(body).send().await?;
        let reply: StartRunReply = decode(response).await?;
        Ok(reply.run_id)
    }

    pub async fn decide(&self, run_id: &RunId, decision: Decision) -> Result<(), ClientError> {
        let url = format!("{}/v1/runs/{}/decision", self.base_url, run_id);
        debug!(url = %url, action = %decision, "POST request");

        let response = self
            .inner
            .post(&url)
            .json(&serde_json::json!({ "action": decision.as_str() }))
            .send()
            .await?;
        decode::<serde_json::Value>(response).await?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: &RunId) -> Result<RunDetail, ClientError> {
        self.get_json(&format!("/v1/runs/{run_id}")).await
    }

    pub async fn list_runs(&self) -> Result<Vec<Run>, ClientError> {
        let list: RunList = self.get_json("/v1/runs").await?;
        Ok(list.runs)
    }

    pub async fn delete_run(&self, run_id: &RunId) -> Result<(), ClientError> {
        let url = format!("{}/v1/runs/{}", self.base_url, run_id);
        debug!(url = %url, "DELETE request");

        let response = self.inner.delete(&url).send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }

    pub async fn metrics(&self) -> Result<serde_json::Value, ClientError> {
        self.get_json("/v1/metrics").await
    }

    /// Open the event stream, replaying everything after `after` if given.
    pub async fn events(&self, after: Option<u64>) -> Result<EventStream, ClientError> {
        let url = format!("{}/v1/events", self.base_url);
        debug!(url = %url, after = ?after, "Opening event stream");

        let mut request = self.inner.get(&url);
        if let Some(after) = after {
            request = request.query(&[("after", after)]);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(EventStream {
            body,
            parser: SseParser::new(),
            pending: VecDeque::new(),
        })
    }

    /// Get JSON from an endpoint.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "GET request");

        let response = self.inner.get(&url).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }
    response
        .json()
        .await
        .map_err(|e| ClientError::Serialization(e.to_string()))
}

async fn api_error(response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error.message)
        .unwrap_or(text);
    ClientError::Api { status, message }
}

/// Events decoded from an SSE response body.
pub struct EventStream {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    parser: SseParser,
    pending: VecDeque<Event>,
}

impl EventStream {
    /// Next event, or `None` once the server closes the stream.
    pub async fn next(&mut self) -> Option<Result<Event, ClientError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            let chunk = match self.body.next().await? {
                Ok(chunk) => chunk,
                Err(e) => return Some(Err(e.into())),
            };
            for frame in self.parser.push(&chunk) {
                match serde_json::from_str::<Event>(&frame.data) {
                    Ok(event) => self.pending.push_back(event),
                    Err(e) => warn!(id = ?frame.id, error = %e, "Skipping undecodable event"),
                }
            }
        }
    }
}
