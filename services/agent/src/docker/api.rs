//! Docker Engine HTTP API client.
//!
//! Talks to the engine over its Unix socket. Only the endpoints the
//! reconciler needs are wrapped.
//!
//! Reference: https://docs.docker.com/engine/api/v1.41/

use std::path::Path;

use hyper::{body::Buf, Body, Client, Method, Request, StatusCode};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::runtime::RuntimeError;

/// API version prefix sent with every request.
pub const API_VERSION: &str = "v1.41";

/// Errors from the Docker Engine API.
#[derive(Debug, Error)]
pub enum DockerApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Error reported inside a streamed (pull/build) response.
    #[error("stream error: {0}")]
    Stream(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<hyper::http::Error> for DockerApiError {
    fn from(err: hyper::http::Error) -> Self {
        DockerApiError::Api {
            status: 0,
            message: err.to_string(),
        }
    }
}

impl DockerApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<DockerApiError> for RuntimeError {
    fn from(err: DockerApiError) -> Self {
        match err {
            DockerApiError::Http(e) => RuntimeError::Unavailable(e.to_string()),
            DockerApiError::Io(e) => RuntimeError::Unavailable(e.to_string()),
            DockerApiError::Api { status, message } => RuntimeError::Rejected { status, message },
            DockerApiError::Json(e) => {
                RuntimeError::rejected(500, format!("malformed response: {e}"))
            }
            DockerApiError::Stream(message) => RuntimeError::rejected(500, message),
        }
    }
}

/// Error body returned by the engine.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// One line of a streamed pull or build response.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StreamLine {
    pub stream: Option<String>,
    pub status: Option<String>,
    pub error: Option<String>,
    pub aux: Option<StreamAux>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamAux {
    #[serde(rename = "ID")]
    pub id: Option<String>,
}

/// Docker Engine API client for Unix socket communication.
pub struct DockerClient {
    socket_path: String,
    client: Client<UnixConnector>,
}

impl DockerClient {
    /// Create a new client for the given socket path.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        let socket_path = socket_path.as_ref().to_string_lossy().to_string();
        let client = Client::unix();
        Self {
            socket_path,
            client,
        }
    }

    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    fn uri(&self, path: &str) -> hyper::Uri {
        Uri::new(&self.socket_path, &format!("/{API_VERSION}{path}")).into()
    }

    /// GET a JSON document. A 404 is returned as `Ok(None)`.
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, DockerApiError> {
        debug!(path = path, "GET request to Docker API");

        let request = Request::builder()
            .method(Method::GET)
            .uri(self.uri(path))
            .header("Accept", "application/json")
            .body(Body::empty())?;

        let response = self.client.request(request).await?;
        let status = response.status();
        let body = hyper::body::aggregate(response.into_body()).await?;

        match status {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(serde_json::from_reader(body.reader())?)),
            _ => Err(api_error(status, body.chunk())),
        }
    }

    /// POST without a body, discarding the response.
    ///
    /// `304 Not Modified` (already started, already stopped) is success.
    pub async fn post_empty(&self, path: &str) -> Result<(), DockerApiError> {
        self.send(Method::POST, path, Body::empty(), None)
            .await
            .map(drop)
    }

    /// POST a JSON body and decode a JSON response.
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, DockerApiError> {
        let bytes = serde_json::to_vec(body)?;
        let response = self
            .send(Method::POST, path, Body::from(bytes), Some("application/json"))
            .await?;
        Ok(serde_json::from_slice(&response)?)
    }

    /// POST a body whose response is a stream of JSON lines, as pull and
    /// build return. An `error` line fails the call even on a 200.
    pub async fn post_stream(
        &self,
        path: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<Vec<StreamLine>, DockerApiError> {
        let response = self
            .send(Method::POST, path, Body::from(body), content_type)
            .await?;

        let mut lines = Vec::new();
        for raw in response.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
            let line: StreamLine = serde_json::from_slice(raw)?;
            if let Some(message) = line.error {
                error!(path = path, message = %message, "Docker API stream error");
                return Err(DockerApiError::Stream(message));
            }
            lines.push(line);
        }
        Ok(lines)
    }

    /// DELETE a resource.
    pub async fn delete(&self, path: &str) -> Result<(), DockerApiError> {
        self.send(Method::DELETE, path, Body::empty(), None)
            .await
            .map(drop)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Body,
        content_type: Option<&str>,
    ) -> Result<Vec<u8>, DockerApiError> {
        debug!(method = %method, path = path, "Request to Docker API");

        let mut builder = Request::builder()
            .method(method)
            .uri(self.uri(path))
            .header("Accept", "application/json");
        if let Some(content_type) = content_type {
            builder = builder.header("Content-Type", content_type);
        }
        let request = builder.body(body)?;

        let response = self.client.request(request).await?;
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await?;

        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            Ok(bytes.to_vec())
        } else {
            Err(api_error(status, &bytes))
        }
    }
}

fn api_error(status: StatusCode, body: &[u8]) -> DockerApiError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());
    debug!(status = %status, message = %message, "Docker API error");
    DockerApiError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Percent-encode a query parameter value.
pub fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_query() {
        assert_eq!(encode_query("web-1"), "web-1");
        assert_eq!(encode_query("registry:5000/app"), "registry%3A5000%2Fapp");
    }

    #[test]
    fn test_api_error_message_from_json() {
        let err = api_error(StatusCode::CONFLICT, br#"{"message":"name in use"}"#);
        assert_eq!(err.status(), Some(409));
        assert!(err.to_string().contains("name in use"));
    }

    #[test]
    fn test_api_error_message_plain() {
        let err = api_error(StatusCode::NOT_FOUND, b"page not found\n");
        match err {
            DockerApiError::Api { message, .. } => assert_eq!(message, "page not found"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_error_conversion() {
        let err: RuntimeError = DockerApiError::Stream("manifest unknown".into()).into();
        assert!(matches!(err, RuntimeError::Rejected { status: 500, .. }));
    }

    #[test]
    fn test_stream_line_parse() {
        let line: StreamLine =
            serde_json::from_str(r#"{"aux":{"ID":"sha256:abc"}}"#).unwrap();
        assert_eq!(line.aux.unwrap().id.as_deref(), Some("sha256:abc"));
    }
}
