//! Results upload collaborator
//!
//! Upload steps hand a results artifact (e.g. a SARIF file from a linter) to
//! an [`Uploader`]. The default implementation POSTs the file to an HTTP
//! endpoint, or copies it into a local directory for anything else.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

/// Default timeout for upload requests (30 seconds)
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub file: PathBuf,
    pub target: String,
    pub bearer_token: Option<String>,
}

/// Where the file ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub destination: String,
    pub bytes: u64,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("cannot read results file '{}': {source}", path.display())]
    MissingFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid upload target '{target}': {details}")]
    InvalidTarget { target: String, details: String },

    #[error("HTTP request to {target} failed: {details}")]
    Http { target: String, details: String },

    #[error("{target} rejected the upload with status {status}")]
    Rejected { target: String, status: u16 },

    #[error("copy to '{}' failed: {source}", dir.display())]
    Copy {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, UploadError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum UploadTarget {
    Http(Url),
    Directory(PathBuf),
}

impl UploadTarget {
    fn parse(target: &str) -> Result<Self, UploadError> {
        let invalid = |details: &str| UploadError::InvalidTarget {
            target: target.to_string(),
            details: details.to_string(),
        };

        match Url::parse(target) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(UploadTarget::Http(url)),
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(UploadTarget::Directory)
                .map_err(|_| invalid("file URL is not a local path")),
            // single-letter schemes are Windows drive letters
            Ok(url) if url.scheme().len() > 1 => {
                Err(invalid(&format!("unsupported scheme '{}'", url.scheme())))
            }
            _ if target.trim().is_empty() => Err(invalid("empty target")),
            _ => Ok(UploadTarget::Directory(PathBuf::from(target))),
        }
    }
}

/// HTTP POST for `http(s)://` targets, directory copy otherwise
#[derive(Debug, Clone)]
pub struct DefaultUploader {
    http_client: reqwest::Client,
}

impl DefaultUploader {
    pub fn new() -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("stepwise/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { http_client }
    }

    async fn post(
        &self,
        url: &Url,
        body: Vec<u8>,
        request: &UploadRequest,
    ) -> Result<UploadReceipt, UploadError> {
        let bytes = body.len() as u64;
        let mut builder = self
            .http_client
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, content_type(&request.file))
            .body(body);
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| UploadError::Http {
            target: url.to_string(),
            details: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Rejected {
                target: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(UploadReceipt {
            destination: url.to_string(),
            bytes,
        })
    }

    async fn copy_into(&self, dir: &Path, file: &Path) -> Result<UploadReceipt, UploadError> {
        let file_name = file.file_name().ok_or_else(|| UploadError::InvalidTarget {
            target: file.display().to_string(),
            details: "results path has no file name".to_string(),
        })?;

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| UploadError::Copy {
                dir: dir.to_path_buf(),
                source,
            })?;

        let destination = dir.join(file_name);
        if same_file(file, &destination).await {
            debug!(path = %file.display(), "results file already in target directory");
            let bytes = tokio::fs::metadata(file)
                .await
                .map_err(|source| UploadError::MissingFile {
                    path: file.to_path_buf(),
                    source,
                })?
                .len();
            return Ok(UploadReceipt {
                destination: destination.display().to_string(),
                bytes,
            });
        }

        let bytes = tokio::fs::copy(file, &destination)
            .await
            .map_err(|source| UploadError::Copy {
                dir: dir.to_path_buf(),
                source,
            })?;

        Ok(UploadReceipt {
            destination: destination.display().to_string(),
            bytes,
        })
    }
}

impl Default for DefaultUploader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Uploader for DefaultUploader {
    #[instrument(skip(self, request), fields(file = %request.file.display(), target = %request.target))]
    async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, UploadError> {
        let target = UploadTarget::parse(&request.target)?;

        let body = tokio::fs::read(&request.file)
            .await
            .map_err(|source| UploadError::MissingFile {
                path: request.file.clone(),
                source,
            })?;

        let receipt = match target {
            UploadTarget::Http(url) => self.post(&url, body, request).await?,
            UploadTarget::Directory(dir) => self.copy_into(&dir, &request.file).await?,
        };

        debug!(destination = %receipt.destination, bytes = receipt.bytes, "uploaded");
        Ok(receipt)
    }
}

/// Copying a file onto itself truncates it
async fn same_file(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn content_type(file: &Path) -> &'static str {
    match file.extension().and_then(|e| e.to_str()) {
        Some("json" | "sarif") => "application/json",
        _ => "application/octet-stream",
    }
}
