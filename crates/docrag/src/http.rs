//! One retrying HTTP client for the vector index, embedding and LLM calls.

use std::time::Duration;

use anyhow::Result as AnyResult;
use docrag_core::{RagError, Result};

use crate::retry::{classify_reqwest, is_retriable_status, RetryPolicy};

#[derive(Clone)]
pub struct RetryingClient {
    inner: reqwest::Client,
    policy: RetryPolicy,
    service: String,
}

impl RetryingClient {
    pub fn new(service: impl Into<String>, timeout: Duration, policy: RetryPolicy) -> AnyResult<Self> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner,
            policy,
            service: service.into(),
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send the request built by `build`, retrying transport errors and
    /// 429/5xx responses. Other statuses are returned to the caller.
    ///
    /// `build` is called once per attempt.
    pub async fn send<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        self.policy
            .run(&self.service, || async {
                let response = build(&self.inner)
                    .send()
                    .await
                    .map_err(|e| classify_reqwest(&self.service, e))?;
                let status = response.status();
                if is_retriable_status(status) {
                    let body = response.text().await.unwrap_or_default();
                    return Err(RagError::unavailable(
                        &self.service,
                        format!("HTTP {}: {}", status, truncate(&body, 500)),
                    ));
                }
                Ok(response)
            })
            .await
    }

    /// Like [`send`](Self::send), but non-success statuses become
    /// [`RagError::Backend`].
    pub async fn send_ok<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let response = self.send(build).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RagError::backend(
            &self.service,
            format!("HTTP {}: {}", status, truncate(&body, 500)),
        ))
    }

    /// Send and decode a JSON body.
    pub async fn json<F>(&self, build: F) -> Result<serde_json::Value>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        self.send_ok(build)
            .await?
            .json()
            .await
            .map_err(|e| RagError::backend(&self.service, format!("invalid JSON response: {}", e)))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
