//! Clients of the coordinator API.
//!
//! [`Client`] talks to the HTTP API of a coordinator through any backend that implements
//! [`HttpClient`]. With the `in-memory` feature, [`InMemoryClient`] talks to a coordinator state
//! machine running in the same process.

#[cfg(feature = "in-memory")]
#[cfg_attr(docsrs, doc(cfg(feature = "in-memory")))]
mod in_memory;

#[cfg(feature = "in-memory")]
pub use self::in_memory::InMemoryClient;

use async_trait::async_trait;
use hefl_core::{EvaluationReport, GlobalModel, PhaseName, RoundParameters, Submission};
use thiserror::Error;
use url::Url;

use crate::ApiClient;

/// Error returned by a [`Client`]
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to deserialize data: {0}")]
    Deserialize(String),

    #[error("failed to serialize data: {0}")]
    Serialize(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("the coordinator rejected the request: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(String),

    #[error("Unexpected response")]
    UnexpectedResponse(u16),
}

impl ClientError {
    #[cfg_attr(not(feature = "reqwest-client"), allow(dead_code))]
    fn http_error<E: std::error::Error>(e: E) -> Self {
        Self::Http(format!("{}", e))
    }
}

/// A basic HTTP interface that [`Client`] HTTP backends must implement.
#[cfg_attr(test, mockall::automock(type GetResponse = Vec<u8>;))]
#[async_trait]
pub trait HttpClient {
    /// Reponse type for `GET` requests
    type GetResponse: AsRef<[u8]>;

    /// Perform an HTTP `GET` on the given URL.
    ///
    /// If the response is `NO_CONTENT`, the implementor must return `Ok(None)`. Otherwise, the
    /// response body must be returned
    async fn get(&mut self, url: &str) -> Result<Option<Self::GetResponse>, ClientError>;

    /// Perform an HTTP `POST` on the given URL, with the given body.
    ///
    /// If the response is `BAD_REQUEST`, the implementor must return
    /// [`ClientError::Rejected`] with the response body.
    async fn post(&mut self, url: &str, body: Vec<u8>) -> Result<(), ClientError>;
}

#[derive(Debug, Clone)]
/// A client that communicates with the coordinator's API via HTTP(S).
pub struct Client<C> {
    /// HTTP(S) client
    client: C,
    /// Coordinator URL
    base_url: Url,
}

/// Error returned when trying to build a [`Client`] with an invalid
/// address for the coordinator.
#[derive(Debug, Error)]
#[error("Invalid base URL: {}", .0)]
pub struct InvalidBaseUrl(String);

impl<C> Client<C>
where
    C: HttpClient,
{
    /// Create a new client.
    ///
    /// # Args
    ///
    /// - `client` is the HTTP client that will be used to perform the HTTP requests. Any HTTP
    ///   client can be used, as long as it implements the [`HttpClient`] trait.
    /// - `base_url` is the URL to the coordinator
    ///
    /// # Errors
    ///
    /// An error is returned if `base_url` is not a valid URL
    pub fn new(http_client: C, base_url: &str) -> Result<Self, InvalidBaseUrl> {
        let base_url = Url::parse(base_url).map_err(|e| InvalidBaseUrl(format!("{}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(InvalidBaseUrl(String::from("cannot be a base URL")));
        }
        Ok(Self {
            client: http_client,
            base_url,
        })
    }

    /// Append the given segment to the client base URL
    fn url(&self, segment: &str) -> Url {
        let mut url = self.base_url.clone();
        // `new()` rejects URLs that cannot be a base
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(segment);
        }
        url
    }

    async fn get<T>(&mut self, url: &Url) -> Result<Option<T>, ClientError>
    where
        T: for<'a> serde::Deserialize<'a>,
    {
        Ok(match self.client.get(url.as_str()).await? {
            Some(data) => Some(
                bincode::deserialize::<T>(data.as_ref())
                    .map_err(|e| ClientError::Deserialize(e.to_string()))?,
            ),
            None => None,
        })
    }

    async fn post<T>(&mut self, url: &Url, data: &T) -> Result<(), ClientError>
    where
        T: serde::Serialize,
    {
        let body = bincode::serialize(data).map_err(|e| ClientError::Serialize(e.to_string()))?;
        self.client.post(url.as_str(), body).await
    }
}

#[async_trait]
impl<C> ApiClient for Client<C>
where
    C: HttpClient + Send,
{
    type Error = ClientError;

    async fn get_round_params(&mut self) -> Result<RoundParameters, Self::Error> {
        let url = self.url("params");
        let round_params: Option<RoundParameters> = self.get(&url).await?;
        round_params.ok_or_else(|| {
            ClientError::Other("failed to fetch round parameters: empty response".to_string())
        })
    }

    async fn get_phase(&mut self) -> Result<PhaseName, Self::Error> {
        let url = self.url("phase");
        let phase: Option<PhaseName> = self.get(&url).await?;
        phase.ok_or_else(|| ClientError::Other("failed to fetch the phase: empty response".into()))
    }

    async fn get_model(&mut self) -> Result<Option<GlobalModel>, Self::Error> {
        let url = self.url("model");
        self.get(&url).await
    }

    async fn submit(&mut self, submission: Submission) -> Result<(), Self::Error> {
        let url = self.url("submit");
        self.post(&url, &submission).await
    }

    async fn evaluate(&mut self, report: EvaluationReport) -> Result<(), Self::Error> {
        let url = self.url("evaluate");
        self.post(&url, &report).await
    }
}

#[cfg(feature = "reqwest-client")]
#[async_trait]
impl HttpClient for reqwest::Client {
    type GetResponse = bytes::Bytes;

    async fn get(&mut self, url: &str) -> Result<Option<Self::GetResponse>, ClientError> {
        let resp = reqwest::Client::get(self, url)
            .send()
            .await
            .map_err(ClientError::http_error)?
            .error_for_status()
            .map_err(ClientError::http_error)?;
        match resp.status() {
            reqwest::StatusCode::OK => {
                Ok(Some(resp.bytes().await.map_err(ClientError::http_error)?))
            }
            reqwest::StatusCode::NO_CONTENT => Ok(None),
            status => Err(ClientError::UnexpectedResponse(status.as_u16())),
        }
    }

    async fn post(&mut self, url: &str, body: Vec<u8>) -> Result<(), ClientError> {
        let resp = reqwest::Client::post(self, url)
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(ClientError::http_error)?;
        if resp.status() == reqwest::StatusCode::BAD_REQUEST {
            let reason = resp.text().await.map_err(ClientError::http_error)?;
            return Err(ClientError::Rejected(reason));
        }
        resp.error_for_status().map_err(ClientError::http_error)?;
        Ok(())
    }
}
