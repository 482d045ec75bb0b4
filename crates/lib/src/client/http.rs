//! HTTP implementations of the service clients.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use super::{
  BuildPatternArtifacts, BuildPatternRequest, ClientError, DistributionClient, PatternSearchResult, RemoteChecksums,
  RepositoryClient, ServiceResponse,
};
use crate::buildinfo::{BuildInfo, BuildRetention};
use crate::config::ServerConfig;
use crate::consts::{HEADER_CHECKSUM_MD5, HEADER_CHECKSUM_SHA1, HEADER_CHECKSUM_SHA256};
use crate::deploy::{DeployDetail, Properties};
use crate::promote::PromotionRequest;
use crate::promote::distribution::{DeleteBundleRequest, DistributionRequest};

const BUILD_INFO_CONTENT_TYPE: &str = "application/vnd.org.jfrog.artifactory+json";

/// Credentials passed through to the transport. Never persisted.
#[derive(Clone, Default)]
pub struct Credentials {
  pub user: Option<String>,
  pub password: Option<String>,
  pub access_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Credentials")
      .field("user", &self.user)
      .field("password", &self.password.as_ref().map(|_| "***"))
      .field("access_token", &self.access_token.as_ref().map(|_| "***"))
      .finish()
  }
}

impl Credentials {
  pub fn from_server(server: &ServerConfig) -> Self {
    Self {
      user: server.user.clone(),
      password: server.password.clone(),
      access_token: server.access_token.clone(),
    }
  }

  fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
    if let Some(token) = self.access_token.as_deref().filter(|t| !t.is_empty()) {
      return builder.bearer_auth(token);
    }
    match self.user.as_deref().filter(|u| !u.is_empty()) {
      Some(user) => builder.basic_auth(user, self.password.as_deref()),
      None => builder,
    }
  }
}

/// Shared request plumbing: auth, timeout and connection retries.
#[derive(Debug, Clone)]
struct Transport {
  http: Client,
  base_url: String,
  credentials: Credentials,
  max_retries: u32,
}

impl Transport {
  fn new(server: &ServerConfig) -> Result<Self, ClientError> {
    let http = Client::builder()
      .timeout(server.timeout())
      .user_agent(concat!("shipyard/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| ClientError::Setup(e.to_string()))?;
    Ok(Self {
      http,
      base_url: server.url.trim_end_matches('/').to_string(),
      credentials: Credentials::from_server(server),
      max_retries: server.max_retries,
    })
  }

  /// URL under the base with each segment percent-encoded.
  fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
    let mut url = Url::parse(&self.base_url).map_err(|e| ClientError::Setup(format!("{}: {e}", self.base_url)))?;
    url
      .path_segments_mut()
      .map_err(|_| ClientError::Setup(format!("{} cannot be a base URL", self.base_url)))?
      .pop_if_empty()
      .extend(segments.iter().flat_map(|s| s.split('/')).filter(|s| !s.is_empty()));
    Ok(url)
  }

  /// Send a request, rebuilding it for each retry. Only connection failures
  /// are retried.
  async fn send<F>(&self, url: &str, make: F) -> Result<Response, ClientError>
  where
    F: Fn() -> Result<RequestBuilder, ClientError>,
  {
    let mut attempt = 0;
    loop {
      let request = self.credentials.apply(make()?);
      match request.send().await {
        Ok(response) => return Ok(response),
        Err(e) if e.is_connect() && attempt < self.max_retries => {
          attempt += 1;
          warn!(url = %url, attempt, error = %e, "connection failed, retrying");
        }
        Err(e) => {
          return Err(ClientError::Transport {
            url: url.to_string(),
            message: e.to_string(),
          });
        }
      }
    }
  }
}

/// Map 404 to `NotFound` and other failures to `Status`.
async fn expect_success(url: &str, response: Response) -> Result<Response, ClientError> {
  let status = response.status();
  if status == StatusCode::NOT_FOUND {
    return Err(ClientError::NotFound { url: url.to_string() });
  }
  if !status.is_success() {
    let body = response.text().await.unwrap_or_default();
    return Err(ClientError::Status {
      url: url.to_string(),
      status: status.as_u16(),
      body,
    });
  }
  Ok(response)
}

async fn service_response(url: &str, response: Response) -> Result<ServiceResponse, ClientError> {
  let status = response.status().as_u16();
  let body = response.text().await.map_err(|e| ClientError::Transport {
    url: url.to_string(),
    message: e.to_string(),
  })?;
  Ok(ServiceResponse::from_body(status, body))
}

fn to_json<T: serde::Serialize>(url: &str, value: &T) -> Result<Vec<u8>, ClientError> {
  serde_json::to_vec(value).map_err(|e| ClientError::Json {
    url: url.to_string(),
    message: e.to_string(),
  })
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
  headers
    .get(name)
    .and_then(|v| v.to_str().ok())
    .map(str::to_string)
    .filter(|v| !v.is_empty())
}

fn encode(value: &str) -> String {
  url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// `;key=v1,v2` suffix for matrix parameters. Keys and values are encoded.
pub fn matrix_suffix(properties: &Properties) -> String {
  properties
    .iter()
    .map(|(key, values)| {
      let values: Vec<String> = values.iter().map(|v| encode(v)).collect();
      format!(";{}={}", encode(key), values.join(","))
    })
    .collect()
}

/// Client for the binary repository service.
#[derive(Debug, Clone)]
pub struct HttpRepositoryClient {
  transport: Transport,
}

impl HttpRepositoryClient {
  pub fn new(server: &ServerConfig) -> Result<Self, ClientError> {
    Ok(Self {
      transport: Transport::new(server)?,
    })
  }

  /// Upload URL: `{base}/{repo}/{path};k=v`.
  pub fn upload_url(&self, detail: &DeployDetail) -> Result<String, ClientError> {
    let url = self
      .transport
      .url(&[detail.target_repository.as_str(), detail.artifact_path.as_str()])?;
    Ok(format!("{}{}", url, matrix_suffix(&detail.properties)))
  }
}

#[async_trait]
impl RepositoryClient for HttpRepositoryClient {
  fn base_url(&self) -> &str {
    &self.transport.base_url
  }

  async fn upload(&self, detail: &DeployDetail) -> Result<(), ClientError> {
    let url = self.upload_url(detail)?;
    let path = detail.source_file.clone();
    let length = std::fs::metadata(&path)
      .map_err(|source| ClientError::Io {
        path: path.display().to_string(),
        source,
      })?
      .len();

    let response = self
      .transport
      .send(&url, || {
        let file = std::fs::File::open(&path).map_err(|source| ClientError::Io {
          path: path.display().to_string(),
          source,
        })?;
        let mut request = self
          .transport
          .http
          .put(&url)
          .header(HEADER_CHECKSUM_MD5, &detail.md5)
          .header(HEADER_CHECKSUM_SHA1, &detail.sha1)
          .header(CONTENT_LENGTH, length)
          .body(fs::File::from_std(file));
        if !detail.sha256.is_empty() {
          request = request.header(HEADER_CHECKSUM_SHA256, &detail.sha256);
        }
        Ok(request)
      })
      .await?;
    expect_success(&url, response).await?;
    debug!(url = %url, "upload acknowledged");
    Ok(())
  }

  async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, ClientError> {
    let response = self.transport.send(url, || Ok(self.transport.http.get(url))).await?;
    let mut response = expect_success(url, response).await?;

    let io_err = |source| ClientError::Io {
      path: dest.display().to_string(),
      source,
    };
    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let mut file = fs::File::create(dest).await.map_err(io_err)?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(|e| ClientError::Transport {
      url: url.to_string(),
      message: e.to_string(),
    })? {
      file.write_all(&chunk).await.map_err(io_err)?;
      written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err)?;

    info!(url = %url, path = ?dest, size = written, "download complete");
    Ok(written)
  }

  async fn checksums(&self, url: &str) -> Result<RemoteChecksums, ClientError> {
    let response = self.transport.send(url, || Ok(self.transport.http.head(url))).await?;
    let response = expect_success(url, response).await?;
    let headers = response.headers();
    Ok(RemoteChecksums {
      md5: header(headers, HEADER_CHECKSUM_MD5),
      sha1: header(headers, HEADER_CHECKSUM_SHA1),
    })
  }

  async fn search_pattern(&self, pattern: &str) -> Result<PatternSearchResult, ClientError> {
    let mut url = self.transport.url(&["api", "search", "pattern"])?;
    url.query_pairs_mut().append_pair("pattern", pattern);
    let url = url.to_string();

    let response = self.transport.send(&url, || Ok(self.transport.http.get(&url))).await?;
    let response = expect_success(&url, response).await?;
    response.json().await.map_err(|e| ClientError::Json {
      url: url.clone(),
      message: e.to_string(),
    })
  }

  async fn build_pattern_artifacts(
    &self,
    requests: &[BuildPatternRequest],
  ) -> Result<Vec<BuildPatternArtifacts>, ClientError> {
    let url = self.transport.url(&["api", "patternArtifacts"])?.to_string();
    let body = to_json(&url, &requests)?;

    let response = self
      .transport
      .send(&url, || {
        Ok(
          self
            .transport
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.clone()),
        )
      })
      .await?;
    let response = expect_success(&url, response).await?;
    response.json().await.map_err(|e| ClientError::Json {
      url: url.clone(),
      message: e.to_string(),
    })
  }

  async fn publish_build_info(&self, build_info: &BuildInfo) -> Result<(), ClientError> {
    let url = self.transport.url(&["api", "build"])?.to_string();
    let body = to_json(&url, &build_info.for_publication())?;
    info!(build = %build_info.name, number = %build_info.number, "publishing build-info");

    let response = self
      .transport
      .send(&url, || {
        Ok(
          self
            .transport
            .http
            .put(&url)
            .header(CONTENT_TYPE, BUILD_INFO_CONTENT_TYPE)
            .body(body.clone()),
        )
      })
      .await?;
    expect_success(&url, response).await?;
    Ok(())
  }

  async fn apply_retention(&self, build_name: &str, retention: &BuildRetention) -> Result<(), ClientError> {
    let mut url = self.transport.url(&["api", "build", "retention"])?;
    url
      .path_segments_mut()
      .map_err(|_| ClientError::Setup("cannot be a base URL".to_string()))?
      .push(build_name);
    url
      .query_pairs_mut()
      .append_pair("async", if retention.run_async { "true" } else { "false" });
    let url = url.to_string();
    let body = to_json(&url, &retention.to_request(Utc::now()))?;

    let response = self
      .transport
      .send(&url, || {
        Ok(
          self
            .transport
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.clone()),
        )
      })
      .await?;
    expect_success(&url, response).await?;
    Ok(())
  }

  async fn promote(
    &self,
    build_name: &str,
    build_number: &str,
    request: &PromotionRequest,
  ) -> Result<ServiceResponse, ClientError> {
    let mut url = self.transport.url(&["api", "build", "promote"])?;
    url
      .path_segments_mut()
      .map_err(|_| ClientError::Setup("cannot be a base URL".to_string()))?
      .push(build_name)
      .push(build_number);
    let url = url.to_string();
    let body = to_json(&url, request)?;

    let response = self
      .transport
      .send(&url, || {
        Ok(
          self
            .transport
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.clone()),
        )
      })
      .await?;
    service_response(&url, response).await
  }
}

/// Client for the release-bundle distribution service.
#[derive(Debug, Clone)]
pub struct HttpDistributionClient {
  transport: Transport,
}

impl HttpDistributionClient {
  pub fn new(server: &ServerConfig) -> Result<Self, ClientError> {
    Ok(Self {
      transport: Transport::new(server)?,
    })
  }

  async fn post_json<T: serde::Serialize + Sync>(&self, url: Url, payload: &T) -> Result<ServiceResponse, ClientError> {
    let url = url.to_string();
    let body = to_json(&url, payload)?;
    let response = self
      .transport
      .send(&url, || {
        Ok(
          self
            .transport
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.clone()),
        )
      })
      .await?;
    service_response(&url, response).await
  }

  fn bundle_url(&self, bundle: &str, version: &str) -> Result<Url, ClientError> {
    let mut url = self.transport.url(&["api", "v1", "distribution"])?;
    url
      .path_segments_mut()
      .map_err(|_| ClientError::Setup("cannot be a base URL".to_string()))?
      .push(bundle)
      .push(version);
    Ok(url)
  }
}

#[async_trait]
impl DistributionClient for HttpDistributionClient {
  async fn distribute(
    &self,
    bundle: &str,
    version: &str,
    request: &DistributionRequest,
  ) -> Result<ServiceResponse, ClientError> {
    let url = self.bundle_url(bundle, version)?;
    self.post_json(url, request).await
  }

  async fn delete_bundle(
    &self,
    bundle: &str,
    version: &str,
    request: &DeleteBundleRequest,
  ) -> Result<ServiceResponse, ClientError> {
    let mut url = self.bundle_url(bundle, version)?;
    url
      .path_segments_mut()
      .map_err(|_| ClientError::Setup("cannot be a base URL".to_string()))?
      .push("delete");
    self.post_json(url, request).await
  }
}
