//! Retrieving the datafile over HTTP.

use crate::config::SDK_KEY_PLACEHOLDER;
use crate::error::{ClientError, DatafileError};
use crate::model::Datafile;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

/// Where a remote datafile lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatafileSource {
    /// Resolved through the URL template.
    SdkKey(String),
    Url(String),
}

impl DatafileSource {
    pub fn url(&self, template: &str) -> String {
        match self {
            DatafileSource::SdkKey(key) => template.replace(SDK_KEY_PLACEHOLDER, key),
            DatafileSource::Url(url) => url.clone(),
        }
    }
}

/// Raw HTTP response: status and body, before any interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

/// Performs the single unauthenticated GET for a datafile.
///
/// Only transport failures are errors here; status handling belongs to
/// [`parse_response`].
#[async_trait]
pub trait DatafileFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, DatafileError>;
}

/// [`DatafileFetcher`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DatafileFetcher for HttpFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<FetchResponse, DatafileError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DatafileError::Fetch(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| DatafileError::Fetch(e.to_string()))?;
        debug!(status, bytes = body.len(), "Datafile response received");

        Ok(FetchResponse { status, body })
    }
}

/// Turns a response into a datafile.
///
/// Any status of 400 or above is an error carrying the body; so is a body that
/// is not JSON.
pub fn parse_response(response: FetchResponse) -> Result<Datafile, DatafileError> {
    let FetchResponse { status, body } = response;
    if status >= 400 {
        return Err(DatafileError::Status { status, body });
    }
    Datafile::from_json_str(&body).map_err(|_| DatafileError::Parse { body })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> FetchResponse {
        FetchResponse {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_source_urls() {
        let template = "https://cdn.optimizely.com/datafiles/{sdk_key}.json";
        assert_eq!(
            DatafileSource::SdkKey("abc".into()).url(template),
            "https://cdn.optimizely.com/datafiles/abc.json"
        );
        assert_eq!(
            DatafileSource::Url("https://example.com/x.json".into()).url(template),
            "https://example.com/x.json"
        );
    }

    #[test]
    fn test_parse_success() {
        let datafile = parse_response(response(200, r#"{"revision":"9"}"#)).unwrap();
        assert_eq!(datafile.revision(), Some("9"));
    }

    #[test]
    fn test_parse_error_status_keeps_body() {
        let err = parse_response(response(403, "denied")).unwrap_err();
        assert!(matches!(err, DatafileError::Status { status: 403, ref body } if body == "denied"));
    }

    #[test]
    fn test_parse_invalid_json_keeps_body() {
        let err = parse_response(response(200, "<html>")).unwrap_err();
        assert!(matches!(err, DatafileError::Parse { ref body } if body == "<html>"));
    }
}
