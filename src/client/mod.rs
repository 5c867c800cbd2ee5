//! Async client for the data bank HTTP API.
//!
//! Every call goes through one [`RetryPolicy`] that retries only transport
//! failures. Any HTTP response the server sends back, 5xx included, is final
//! and is mapped to a [`ClientError`] by [`ClientError::from_response`].

mod error;
mod retry;

pub use error::{ClientError, ErrorResponse};
pub use retry::RetryPolicy;

use crate::{
    digest::{self, CHUNK_SIZE},
    models::{
        file::{FileInfo, FileMetadata},
        wire::{API_KEY_HEADER, ErrorBody, REQUEST_ID_HEADER},
    },
};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{
    Body, Method, RequestBuilder, Response, StatusCode,
    header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG, HeaderMap, RANGE},
    multipart::{Form, Part},
};
use serde::de::DeserializeOwned;
use std::{path::Path, time::Duration};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;

pub type ClientResult<T> = Result<T, ClientError>;

/// Multipart field the server reads uploads from.
const UPLOAD_FIELD: &str = "file";

/// What a HEAD request reports about a remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHead {
    pub size: u64,
    /// SHA-256 of the object; `None` if the server sent no usable ETag.
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

/// How [`DataBankClient::download`] treats an existing destination file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Continue from the length of an existing local file.
    pub resume: bool,
    /// Hash the finished file and compare it with the ETag.
    pub verify_etag: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            resume: false,
            verify_etag: true,
        }
    }
}

/// Builder for [`DataBankClient`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    retry: RetryPolicy,
    request_id: Option<String>,
    http: Option<reqwest::Client>,
}

impl ClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            request_id: None,
            http: None,
        }
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Per-attempt timeout. Ignored when an HTTP client is injected.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Correlation id sent with every request unless a call overrides it.
    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> ClientResult<DataBankClient> {
        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder().timeout(self.timeout).build()?,
        };
        Ok(DataBankClient {
            http,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            api_key: self.api_key.filter(|key| !key.trim().is_empty()),
            retry: self.retry,
            request_id: self.request_id,
        })
    }
}

/// Client for one data bank server.
#[derive(Debug, Clone)]
pub struct DataBankClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
    request_id: Option<String>,
}

impl DataBankClient {
    /// Client with default timeout and retry policy.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> ClientResult<Self> {
        let mut builder = ClientBuilder::new(base_url);
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        builder.build()
    }

    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.base_url)
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.base_url, file_id)
    }

    fn request(&self, method: Method, url: &str, request_id: Option<&str>) -> RequestBuilder {
        let mut req = self.http.request(method, url);
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key);
        }
        if let Some(rid) = request_id {
            req = req.header(REQUEST_ID_HEADER, rid);
        }
        req
    }

    /// Upload an in-memory buffer.
    pub async fn upload(
        &self,
        data: impl Into<Bytes>,
        filename: &str,
        content_type: &str,
    ) -> ClientResult<FileMetadata> {
        let data: Bytes = data.into();
        let url = self.files_url();
        let rid = self.request_id.as_deref();

        let response = self
            .retry
            .run(move || {
                let data = data.clone();
                let url = url.clone();
                async move {
                    let length = data.len() as u64;
                    let part = file_part(Body::from(data), length, filename, content_type)?;
                    let form = Form::new().part(UPLOAD_FIELD, part);
                    let response = self
                        .request(Method::POST, &url, rid)
                        .multipart(form)
                        .send()
                        .await?;
                    Ok::<_, ClientError>(response)
                }
            })
            .await?;

        decode(check(response, rid).await?).await
    }

    /// Upload a file from disk, streaming it. The file is reopened for every
    /// attempt.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        content_type: &str,
    ) -> ClientResult<FileMetadata> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload");
        let url = self.files_url();
        let rid = self.request_id.as_deref();

        let response = self
            .retry
            .run(move || {
                let url = url.clone();
                async move {
                    let file = File::open(path).await?;
                    let length = file.metadata().await?.len();
                    let body = Body::wrap_stream(ReaderStream::with_capacity(file, CHUNK_SIZE));
                    let part = file_part(body, length, filename, content_type)?;
                    let form = Form::new().part(UPLOAD_FIELD, part);
                    let response = self
                        .request(Method::POST, &url, rid)
                        .multipart(form)
                        .send()
                        .await?;
                    Ok::<_, ClientError>(response)
                }
            })
            .await?;

        decode(check(response, rid).await?).await
    }

    /// Size, ETag and content type of a remote object.
    ///
    /// `request_id` overrides the client's default correlation id.
    pub async fn head(&self, file_id: &str, request_id: Option<&str>) -> ClientResult<RemoteHead> {
        let url = self.file_url(file_id);
        let rid = request_id.or(self.request_id.as_deref());

        let response = self
            .retry
            .run(|| self.request(Method::HEAD, &url, rid).send())
            .await?;
        let response = check(response, rid).await?;
        remote_head(response.headers())
    }

    /// Metadata as JSON from `/files/{id}/info`.
    pub async fn info(&self, file_id: &str) -> ClientResult<FileInfo> {
        let url = format!("{}/info", self.file_url(file_id));
        let rid = self.request_id.as_deref();

        let response = self
            .retry
            .run(|| self.request(Method::GET, &url, rid).send())
            .await?;
        decode(check(response, rid).await?).await
    }

    pub async fn delete(&self, file_id: &str) -> ClientResult<()> {
        let url = self.file_url(file_id);
        let rid = self.request_id.as_deref();

        let response = self
            .retry
            .run(|| self.request(Method::DELETE, &url, rid).send())
            .await?;
        check(response, rid).await?;
        Ok(())
    }

    /// Download an object into `destination`.
    ///
    /// With `resume`, an existing local file of the remote size is taken as
    /// complete and a shorter one is extended with a ranged request. A local
    /// file longer than the object is still requested, so the server's 416
    /// comes back as [`ClientError::RangeNotSatisfiable`]. Without `resume`
    /// the destination is rewritten from scratch.
    ///
    /// Only sending the request goes through the [`RetryPolicy`]. A transport
    /// error while the body streams is returned as [`ClientError::Transport`]
    /// straight away and the bytes written so far stay on disk, so calling
    /// again with `resume` continues from where the transfer stopped.
    pub async fn download(
        &self,
        file_id: &str,
        destination: impl AsRef<Path>,
        options: DownloadOptions,
    ) -> ClientResult<RemoteHead> {
        let dest = destination.as_ref();
        let head = self.head(file_id, None).await?;

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let local_len = if options.resume {
            match fs::metadata(dest).await {
                Ok(meta) if meta.is_file() => Some(meta.len()),
                _ => None,
            }
        } else {
            None
        };

        match local_len {
            Some(len) if len == head.size => {
                debug!(file_id, len, "local copy already complete");
            }
            Some(len) => {
                debug!(file_id, len, size = head.size, "resuming download");
                self.fetch(file_id, dest, Some(len)).await?;
            }
            None => self.fetch(file_id, dest, None).await?,
        }

        if options.verify_etag {
            verify(dest, head.etag.as_deref()).await?;
        }
        Ok(head)
    }

    /// GET the object, from `offset` onwards when given, into `dest`.
    async fn fetch(&self, file_id: &str, dest: &Path, offset: Option<u64>) -> ClientResult<()> {
        let url = self.file_url(file_id);
        let rid = self.request_id.as_deref();

        let response = self
            .retry
            .run(|| {
                let mut req = self.request(Method::GET, &url, rid);
                if let Some(offset) = offset {
                    req = req.header(RANGE, format!("bytes={}-", offset));
                }
                req.send()
            })
            .await?;
        let response = check(response, rid).await?;

        let mut file = match (response.status(), offset) {
            (StatusCode::PARTIAL_CONTENT, Some(offset)) => {
                let start = content_range_start(response.headers());
                if start != Some(offset) {
                    return Err(ClientError::Protocol(format!(
                        "partial response starts at {:?}, expected {}",
                        start, offset
                    )));
                }
                OpenOptions::new().append(true).open(dest).await?
            }
            (StatusCode::PARTIAL_CONTENT, None) => {
                return Err(ClientError::Protocol(
                    "partial response to a full request".into(),
                ));
            }
            // A 200 carries the whole object even when a range was asked for.
            _ => File::create(dest).await?,
        };

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(chunk) => file.write_all(&chunk).await?,
                // Keep what arrived so a resumed download can pick it up.
                Err(err) => {
                    file.flush().await?;
                    return Err(err.into());
                }
            }
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}

fn file_part(body: Body, length: u64, filename: &str, content_type: &str) -> ClientResult<Part> {
    Part::stream_with_length(body, length)
        .file_name(filename.to_string())
        .mime_str(content_type)
        .map_err(|_| ClientError::InvalidContentType(content_type.to_string()))
}

/// Pass 2xx responses through; turn anything else into a typed error.
async fn check(response: Response, request_id: Option<&str>) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .bytes()
        .await
        .ok()
        .and_then(|raw| serde_json::from_slice::<ErrorBody>(&raw).ok());
    Err(ClientError::from_response(
        status,
        body,
        request_id.map(str::to_string),
    ))
}

async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let raw = response.bytes().await?;
    serde_json::from_slice(&raw)
        .map_err(|err| ClientError::Protocol(format!("invalid response body: {}", err)))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &reqwest::header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Read size, ETag and content type from HEAD response headers.
///
/// Content-Length is parsed from the header because a HEAD response has no
/// body to measure.
fn remote_head(headers: &HeaderMap) -> ClientResult<RemoteHead> {
    let size = header_str(headers, &CONTENT_LENGTH)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .ok_or_else(|| ClientError::Protocol("HEAD response without Content-Length".into()))?;
    let etag = header_str(headers, &ETAG)
        .map(|value| value.trim().trim_start_matches("W/").trim_matches('"').to_string())
        .filter(|value| !value.is_empty());
    let content_type = header_str(headers, &CONTENT_TYPE).map(str::to_string);

    Ok(RemoteHead {
        size,
        etag,
        content_type,
    })
}

/// First byte position of a `Content-Range: bytes start-last/size` header.
fn content_range_start(headers: &HeaderMap) -> Option<u64> {
    let value = header_str(headers, &CONTENT_RANGE)?;
    let (start, _) = value.trim().strip_prefix("bytes ")?.split_once('-')?;
    start.parse().ok()
}

/// Compare the file's SHA-256 with the ETag. Nothing to compare with means
/// nothing to verify.
async fn verify(path: &Path, etag: Option<&str>) -> ClientResult<()> {
    let Some(expected) = etag else {
        debug!("no ETag for {}, skipping verification", path.display());
        return Ok(());
    };
    let actual = digest::sha256_file(path).await?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(ClientError::Integrity {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
