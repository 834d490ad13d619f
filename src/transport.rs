//! reqwest-backed [`Transport`] for the live provider.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::traits::{ProviderSession, Transport, TransportError};

pub struct HttpTransport {
    endpoint: String,
    user_agent: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            endpoint: config.base_url.clone(),
            user_agent: config.user_agent.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    fn build_client(&self, referer: Option<&str>) -> Result<Client, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/html;q=0.9, */*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        if let Some(referer) = referer {
            let value = HeaderValue::from_str(referer)
                .map_err(|e| TransportError::Client(format!("invalid referer: {}", e)))?;
            headers.insert(REFERER, value);
        }

        Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.as_str())
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_text(&self, url: &str) -> Result<String, TransportError> {
        let client = self.build_client(None)?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| classify(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        response.text().await.map_err(|e| classify(e, self.timeout))
    }

    fn open_session(&self, referer: &str) -> Result<Box<dyn ProviderSession>, TransportError> {
        debug!(referer, "Opening provider session");
        Ok(Box::new(HttpSession {
            client: self.build_client(Some(referer))?,
            endpoint: self.endpoint.clone(),
            timeout: self.timeout,
        }))
    }
}

struct HttpSession {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

#[async_trait]
impl ProviderSession for HttpSession {
    async fn post_json(&self, body: &Value) -> Result<Value, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| classify(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| classify(e, self.timeout))
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout.as_secs())
    } else if let Some(status) = err.status() {
        TransportError::Status(status.as_u16())
    } else if err.is_decode() {
        TransportError::Decode(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_session_with_referer() {
        let transport = HttpTransport::new(&ProviderConfig::default());
        let session = transport.open_session("https://inspections.myhealthdepartment.com/tennessee");
        assert!(session.is_ok());
    }

    #[test]
    fn rejects_unencodable_referer() {
        let transport = HttpTransport::new(&ProviderConfig::default());
        let result = transport.open_session("bad\nreferer");
        assert!(matches!(result, Err(TransportError::Client(_))));
    }
}
