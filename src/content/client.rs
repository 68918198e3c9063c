//! HTTP implementation of the content service.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ContentError, ContentService};
use crate::checkout::CheckoutSession;
use crate::config::{Config, ContentConfig};
use crate::contribution::ContributionRequest;

/// Content service client over the backend's REST API.
#[derive(Clone)]
pub struct HttpContentClient {
  client: reqwest::Client,
  base_url: Url,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TributePayload<'a> {
  owner_id: &'a str,
  checkout: &'a CheckoutSession,
}

#[derive(Serialize)]
struct RolePayload<'a> {
  role: &'a str,
}

#[derive(Deserialize)]
struct RoleResponse {
  role: Option<String>,
}

impl HttpContentClient {
  /// Create a client from configuration, reading the API token from the
  /// environment.
  pub fn new(config: &ContentConfig) -> Result<Self> {
    let token = Config::get_api_token()?;
    Self::with_token(config, &token)
  }

  pub fn with_token(config: &ContentConfig, token: &str) -> Result<Self> {
    let base = config
      .base_url
      .as_deref()
      .ok_or_else(|| eyre!("content.base_url is not configured"))?;

    let mut base_url =
      Url::parse(base).map_err(|e| eyre!("Invalid content base URL {}: {}", base, e))?;
    if base_url.cannot_be_a_base() {
      return Err(eyre!("Content base URL {} cannot have paths", base));
    }
    // A trailing slash makes path segments append instead of replace
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let mut headers = HeaderMap::new();
    let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
      .map_err(|e| eyre!("Invalid API token: {}", e))?;
    headers.insert(AUTHORIZATION, bearer);

    let client = reqwest::Client::builder()
      .timeout(Duration::from_millis(config.timeout_ms))
      .default_headers(headers)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  /// Resolve path segments against the base URL, escaping each one.
  fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base_url.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  async fn check(response: Response) -> Result<Response, ContentError> {
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ContentError::from_status(status.as_u16(), body))
  }
}

fn transport(e: reqwest::Error) -> ContentError {
  ContentError::Transport(e.to_string())
}

#[async_trait]
impl ContentService for HttpContentClient {
  async fn persist_checkout(
    &self,
    user_id: &str,
    session: &CheckoutSession,
  ) -> Result<(), ContentError> {
    let url = self.endpoint(&["tributes"]);
    debug!(%url, session_id = %session.id, "Persisting completed checkout");

    let response = self
      .client
      .post(url)
      .json(&TributePayload {
        owner_id: user_id,
        checkout: session,
      })
      .send()
      .await
      .map_err(transport)?;
    Self::check(response).await?;
    Ok(())
  }

  async fn store_contribution_request(
    &self,
    request: &ContributionRequest,
  ) -> Result<(), ContentError> {
    let url = self.endpoint(&["contribution-requests", request.id.as_str()]);
    debug!(%url, status = %request.status, "Storing contribution request");

    let response = self
      .client
      .put(url)
      .json(request)
      .send()
      .await
      .map_err(transport)?;
    Self::check(response).await?;
    Ok(())
  }

  async fn assign_role(&self, user_id: &str, role: &str) -> Result<(), ContentError> {
    let url = self.endpoint(&["users", user_id, "role"]);

    let response = self
      .client
      .put(url)
      .json(&RolePayload { role })
      .send()
      .await
      .map_err(transport)?;
    Self::check(response).await?;
    Ok(())
  }

  async fn fetch_role(&self, user_id: &str) -> Result<Option<String>, ContentError> {
    let url = self.endpoint(&["users", user_id, "role"]);

    let response = self.client.get(url).send().await.map_err(transport)?;
    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }

    let body: RoleResponse = Self::check(response)
      .await?
      .json()
      .await
      .map_err(|e| ContentError::InvalidResponse(e.to_string()))?;
    Ok(body.role)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(base_url: &str) -> ContentConfig {
    ContentConfig {
      base_url: Some(base_url.to_string()),
      ..Default::default()
    }
  }

  #[test]
  fn test_endpoint_escapes_segments() {
    let client = HttpContentClient::with_token(&config("https://api.example.com/v1"), "t").unwrap();
    let url = client.endpoint(&["users", "a/b c", "role"]);
    assert_eq!(url.as_str(), "https://api.example.com/v1/users/a%2Fb%20c/role");
  }

  #[test]
  fn test_endpoint_with_trailing_slash_base() {
    let client = HttpContentClient::with_token(&config("https://api.example.com/"), "t").unwrap();
    assert_eq!(
      client.endpoint(&["tributes"]).as_str(),
      "https://api.example.com/tributes"
    );
  }

  #[test]
  fn test_missing_base_url_is_an_error() {
    let result = HttpContentClient::with_token(&ContentConfig::default(), "t");
    assert!(result.is_err());
  }

  #[test]
  fn test_invalid_base_url_is_an_error() {
    assert!(HttpContentClient::with_token(&config("not a url"), "t").is_err());
  }
}
