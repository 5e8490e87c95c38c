//! Thin HTTP client shared by the origins.

use std::time::Duration;

use reqwest::{header, Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{SourceError, SourceResult};

/// Browser-like user agent; the official site rejects bare clients.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// HTTP client for origin requests.
///
/// The client-wide timeout is the request budget: a fetch that does not
/// complete within it fails with [`SourceError::Transport`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new client with the given request budget.
    pub fn new(timeout: Duration) -> SourceResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SourceError::transport("<client>", e))?;

        Ok(Self { client })
    }

    /// GET an HTML document.
    pub async fn get_html(&self, url: &str) -> SourceResult<String> {
        debug!(url, "GET html");

        let response = self
            .client
            .get(url)
            .header(
                header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(header::ACCEPT_LANGUAGE, "es-ES,es;q=0.9")
            .send()
            .await
            .map_err(|e| SourceError::transport(url, e))?;

        Self::check_status(url, response)?
            .text()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }

    /// GET a JSON document.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> SourceResult<T> {
        debug!(url, "GET json");

        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| SourceError::transport(url, e))?;

        Self::check_status(url, response)?
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }

    /// POST a JSON body and decode a JSON reply.
    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> SourceResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(url, "POST json");

        let response = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| SourceError::transport(url, e))?;

        Self::check_status(url, response)?
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }

    fn check_status(url: &str, response: Response) -> SourceResult<Response> {
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}
