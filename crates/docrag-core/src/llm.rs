//! Remote language model and image captioning interfaces.
//!
//! Both are consumed as opaque text-in/text-out calls. The streaming
//! OpenAI-compatible client lives in the `docrag` app crate.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::error::{RagError, Result};

/// A stream of token deltas. An `Err` item ends the stream.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Start a completion and stream its tokens.
    ///
    /// Dropping the returned stream cancels the upstream request.
    async fn stream(&self, prompt: &str) -> Result<TokenStream>;

    /// Collect a full completion.
    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut stream = self.stream(prompt).await?;
        let mut out = String::new();
        while let Some(token) = stream.next().await {
            out.push_str(&token?);
        }
        if out.trim().is_empty() {
            return Err(RagError::UpstreamLlm("empty completion".into()));
        }
        Ok(out)
    }
}

/// Produces a text caption for an image.
#[async_trait]
pub trait ImageCaptioner: Send + Sync {
    async fn caption(&self, bytes: &[u8], mime: &str) -> Result<String>;
}
