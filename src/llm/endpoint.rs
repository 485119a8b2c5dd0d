//! Connection details shared by every OpenAI-compatible client

use reqwest::{Client, Method, RequestBuilder, Response};

use crate::{Error, Result};

/// Base URL plus optional bearer key
#[derive(Debug, Clone)]
pub struct Endpoint {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl Endpoint {
    /// `service` names the endpoint in the configuration error
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is blank
    pub fn new(base_url: &str, api_key: Option<String>, service: &str) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(Error::Config(format!("{service} base URL is empty")));
        }

        Ok(Self {
            client: Client::new(),
            base_url: base_url.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// POST to `path` below the base URL, authorized when a key is set
    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    /// GET `path` below the base URL, authorized when a key is set
    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{path}", self.base_url));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Send a request, turning transport failures and non-2xx replies into `wrap` errors
///
/// # Errors
///
/// Returns error if the request fails or the server answers with an error status
pub async fn send(builder: RequestBuilder, wrap: fn(String) -> Error) -> Result<Response> {
    let response = builder
        .send()
        .await
        .map_err(|e| wrap(format!("request failed: {e}")))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(%status, body = %body, "endpoint returned an error");
    Err(wrap(format!("API error {status}: {body}")))
}
