//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, multipart, Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::{DeploydError, PlatformError};

/// How requests authenticate
enum Auth {
    Bearer(SecretString),
    Header(&'static str, SecretString),
}

/// HTTP client for one external API
pub struct HttpClient {
    client: Client,
    base_url: String,
    auth: Option<Auth>,
}

impl HttpClient {
    /// Create a new HTTP client.
    ///
    /// `default_timeout` bounds every request; callers pass a tighter
    /// per-request timeout where they have one.
    pub fn new(base_url: &str, default_timeout: Duration) -> Result<Self, DeploydError> {
        let client = Client::builder().timeout(default_timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: None,
        })
    }

    /// Authenticate with `Authorization: Bearer <token>`
    pub fn with_bearer(mut self, token: SecretString) -> Self {
        self.auth = Some(Auth::Bearer(token));
        self
    }

    /// Authenticate with a custom header
    pub fn with_header_auth(mut self, name: &'static str, value: SecretString) -> Self {
        self.auth = Some(Auth::Header(name, value));
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(Auth::Bearer(token)) => request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            ),
            Some(Auth::Header(name, value)) => request.header(*name, value.expose_secret()),
            None => request,
        }
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<T, PlatformError> {
        let url = self.url(path);
        debug!("GET {}", url);

        let request = self.client.get(&url).timeout(timeout);
        let response = self.send("GET", &url, request).await?;
        decode(response).await
    }

    /// Make a POST request with a JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T, PlatformError> {
        let url = self.url(path);
        debug!("POST {}", url);

        let request = self.client.post(&url).timeout(timeout).json(body);
        let response = self.send("POST", &url, request).await?;
        decode(response).await
    }

    /// Make a POST request with a JSON body and return the raw response bytes
    pub async fn post_for_bytes<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<Vec<u8>, PlatformError> {
        let url = self.url(path);
        debug!("POST {} (binary response)", url);

        let request = self.client.post(&url).timeout(timeout).json(body);
        let response = self.send("POST", &url, request).await?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Make a multipart POST request
    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: multipart::Form,
        timeout: Duration,
    ) -> Result<T, PlatformError> {
        let url = self.url(path);
        debug!("POST {} (multipart)", url);

        let request = self.client.post(&url).timeout(timeout).multipart(form);
        let response = self.send("POST", &url, request).await?;
        decode(response).await
    }

    async fn send(
        &self,
        method: &str,
        url: &str,
        request: RequestBuilder,
    ) -> Result<Response, PlatformError> {
        let response = self.authorize(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP {} {} failed: {} - {}", method, url, status, body);
            return Err(PlatformError::from_status(status, &body));
        }

        Ok(response)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, PlatformError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| PlatformError::Permanent(format!("invalid response body: {}", e)))
}
