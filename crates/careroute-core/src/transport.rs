//! Handler transport over HTTP/JSON

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::dispatcher::{HandlerRequest, HandlerTransport};
use crate::error::DispatchError;

/// Reaches handlers at `{base_url}/{endpoint}`
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("client", &"<reqwest::Client>")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn url_for(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

#[async_trait]
impl HandlerTransport for HttpTransport {
    async fn send(&self, endpoint: &str, request: &HandlerRequest) -> Result<Value, DispatchError> {
        let url = self.url_for(endpoint);
        debug!("POST {}", url);

        let mut builder = self.client.post(&url).json(request);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DispatchError::Unreachable(format!("{}: {}", url, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DispatchError::Unreachable(format!("{}: {}", url, e)))?;

        let body: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) if !status.is_success() => {
                return Err(DispatchError::HandlerError {
                    code: status.as_u16().to_string(),
                    message: excerpt(&text),
                });
            }
            Err(e) => {
                return Err(DispatchError::MalformedResponse(format!(
                    "invalid JSON ({}): {}",
                    e,
                    excerpt(&text)
                )));
            }
        };

        // Error bodies that follow the contract are interpreted by the
        // dispatcher; anything else on a non-2xx status is a handler error.
        if !status.is_success() && body.get("errorCode").is_none() {
            return Err(DispatchError::HandlerError {
                code: status.as_u16().to_string(),
                message: excerpt(&text),
            });
        }

        Ok(body)
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(200).collect()
}
