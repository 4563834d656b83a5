use super::tokens::TokenManager;
use super::{BlobMetadata, BlobStore};
use crate::error::CloudError;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use url::Url;

/// HTTP adapter for a path-addressed blob store.
///
/// The provider wraps some "not found" conditions in a 409-class response
/// with a structured body instead of a plain 404, so absence is classified
/// by inspecting the body's error tag, never by status code alone.
pub struct HttpBlobStore {
    http: reqwest::Client,
    base: Url,
    tokens: Arc<TokenManager>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataResponse {
    server_modified: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    error: Option<ProviderErrorTag>,
    #[serde(default, rename = "errorSummary")]
    error_summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorTag {
    #[serde(default)]
    tag: String,
}

fn transport(error: reqwest::Error) -> CloudError {
    CloudError::Transport(error.to_string())
}

impl HttpBlobStore {
    pub fn new(base: Url, tokens: Arc<TokenManager>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base,
            tokens,
        }
    }

    fn endpoint(&self, segment: &str) -> Result<Url, CloudError> {
        self.base
            .join(segment)
            .map_err(|error| CloudError::Transport(error.to_string()))
    }

    /// Send with a bearer token; on 401 refresh once and retry the call
    /// exactly once. A second 401 invalidates the credential.
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response, CloudError>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let token = self.tokens.ensure_valid().await?;
        let response = build(&token).send().await.map_err(transport)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::debug!("blob store returned 401, refreshing credential");
        let token = self.tokens.refresh().await?;
        let response = build(&token).send().await.map_err(transport)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate_and_clear().await;
            return Err(CloudError::AuthRequired(
                "still unauthorized after token refresh".to_string(),
            ));
        }
        Ok(response)
    }

    /// `Ok(None)` when the response is a not-found (plain 404 or structured
    /// 409-class body); `Ok(Some(response))` on success; error otherwise.
    async fn classify_absent(
        path: &str,
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, CloudError> {
        let status = response.status();
        if status.is_success() {
            return Ok(Some(response));
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::CONFLICT {
            let body: ProviderErrorBody = response.json().await.unwrap_or(ProviderErrorBody {
                error: None,
                error_summary: None,
            });
            let tag = body.error.map(|error| error.tag).unwrap_or_default();
            if tag == "not_found"
                || body
                    .error_summary
                    .as_deref()
                    .is_some_and(|summary| summary.contains("not_found"))
            {
                return Ok(None);
            }
            return Err(CloudError::Rejected {
                path: path.to_string(),
                message: format!("{status}: {tag}"),
            });
        }
        if status.is_server_error() {
            return Err(CloudError::Transport(format!("server returned {status}")));
        }
        Err(CloudError::Rejected {
            path: path.to_string(),
            message: status.to_string(),
        })
    }
}

impl BlobStore for HttpBlobStore {
    fn get_metadata<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<BlobMetadata>, CloudError>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.endpoint("files/metadata")?;
            let response = self
                .send_authorized(|token| {
                    self.http
                        .get(url.clone())
                        .bearer_auth(token)
                        .query(&[("path", path)])
                })
                .await?;
            let Some(response) = Self::classify_absent(path, response).await? else {
                return Ok(None);
            };
            let metadata: MetadataResponse = response.json().await.map_err(transport)?;
            Ok(Some(BlobMetadata {
                modified_at: metadata.server_modified,
            }))
        })
    }

    fn download<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, CloudError>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.endpoint("files/content")?;
            let response = self
                .send_authorized(|token| {
                    self.http
                        .get(url.clone())
                        .bearer_auth(token)
                        .query(&[("path", path)])
                })
                .await?;
            let Some(response) = Self::classify_absent(path, response).await? else {
                return Ok(None);
            };
            let bytes = response.bytes().await.map_err(transport)?;
            Ok(Some(bytes.to_vec()))
        })
    }

    fn upload<'a>(
        &'a self,
        path: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CloudError>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.endpoint("files/content")?;
            let response = self
                .send_authorized(|token| {
                    self.http
                        .post(url.clone())
                        .bearer_auth(token)
                        .query(&[("path", path), ("mode", "overwrite")])
                        .header("content-type", "application/octet-stream")
                        .body(bytes.clone())
                })
                .await?;
            let status = response.status();
            if !status.is_success() {
                if status.is_server_error() {
                    return Err(CloudError::Transport(format!("upload returned {status}")));
                }
                return Err(CloudError::Rejected {
                    path: path.to_string(),
                    message: format!("upload returned {status}"),
                });
            }
            Ok(())
        })
    }

    fn delete<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CloudError>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.endpoint("files/delete")?;
            let response = self
                .send_authorized(|token| {
                    self.http
                        .post(url.clone())
                        .bearer_auth(token)
                        .query(&[("path", path)])
                })
                .await?;
            // Deleting an absent blob is a no-op, not a failure.
            if Self::classify_absent(path, response).await?.is_none() {
                tracing::debug!(path, "delete target already absent");
            }
            Ok(())
        })
    }
}
