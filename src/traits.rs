use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("Unexpected HTTP status {0}")]
    Status(u16),
    #[error("Failed to decode response body: {0}")]
    Decode(String),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Network seam to the inspection provider.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches a page as text using a throwaway client identity.
    async fn get_text(&self, url: &str) -> Result<String, TransportError>;

    /// Opens a fresh client identity presenting `referer` on every request.
    ///
    /// Each source gets its own session so requests for different
    /// jurisdictions are not tied together by cookies or connections.
    fn open_session(&self, referer: &str) -> Result<Box<dyn ProviderSession>, TransportError>;
}

/// A client identity bound to one source.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    /// Posts a search payload to the provider API and returns the decoded body.
    async fn post_json(&self, body: &Value) -> Result<Value, TransportError>;
}
