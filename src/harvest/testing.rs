//! Scripted [`Transport`] double for offline tests.

use async_trait::async_trait;
use serde_json::Value;
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

use crate::traits::{ProviderSession, Transport, TransportError};

type Responder = dyn Fn(&Value) -> Result<Value, TransportError> + Send + Sync;

pub(crate) struct ScriptedTransport {
    directory_html: Option<String>,
    inner: Arc<Inner>,
}

struct Inner {
    responder: Box<Responder>,
    posts: Mutex<Vec<Value>>,
    referers: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    /// `responder` answers every search POST; the directory page is unavailable.
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        Self {
            directory_html: None,
            inner: Arc::new(Inner {
                responder: Box::new(responder),
                posts: Mutex::new(Vec::new()),
                referers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn with_directory(mut self, html: &str) -> Self {
        self.directory_html = Some(html.to_string());
        self
    }

    pub(crate) fn posts(&self) -> Vec<Value> {
        self.inner.posts.lock().unwrap().clone()
    }

    pub(crate) fn referers(&self) -> Vec<String> {
        self.inner.referers.lock().unwrap().clone()
    }
}

/// Reads `data.path` out of a search payload.
pub(crate) fn payload_path(body: &Value) -> &str {
    body["data"]["path"].as_str().unwrap_or_default()
}

/// Reads `data.programName` out of a search payload.
pub(crate) fn payload_program(body: &Value) -> &str {
    body["data"]["programName"].as_str().unwrap_or_default()
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get_text(&self, _url: &str) -> Result<String, TransportError> {
        self.directory_html
            .clone()
            .ok_or(TransportError::Status(503))
    }

    fn open_session(&self, referer: &str) -> Result<Box<dyn ProviderSession>, TransportError> {
        self.inner.referers.lock().unwrap().push(referer.to_string());
        Ok(Box::new(ScriptedSession {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct ScriptedSession {
    inner: Arc<Inner>,
}

#[async_trait]
impl ProviderSession for ScriptedSession {
    async fn post_json(&self, body: &Value) -> Result<Value, TransportError> {
        self.inner.posts.lock().unwrap().push(body.clone());
        (self.inner.responder)(body)
    }
}

/// In-memory log sink for asserting on emitted events.
#[derive(Clone, Default)]
pub(crate) struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub(crate) fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .finish()
    }

    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
