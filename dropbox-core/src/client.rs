use std::time::{Duration, SystemTime};

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_API_URL: &str = "https://api.dropboxapi.com";
const DEFAULT_CONTENT_URL: &str = "https://content.dropboxapi.com";
const API_ARG_HEADER: &str = "Dropbox-API-Arg";

#[derive(Debug, Error)]
pub enum DropboxError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid api argument: {0}")]
    Argument(#[from] serde_json::Error),
    #[error("api returned {status}: {body}")]
    Api {
        status: StatusCode,
        body: String,
        retry_after: Option<Duration>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Dropbox API v2 client. The access token is supplied per call because it
/// rotates underneath long-running callers.
#[derive(Clone)]
pub struct DropboxClient {
    http: Client,
    api_url: Url,
    content_url: Url,
}

impl DropboxClient {
    pub fn new() -> Result<Self, DropboxError> {
        Self::with_base_urls(DEFAULT_API_URL, DEFAULT_CONTENT_URL)
    }

    pub fn with_base_urls(api_url: &str, content_url: &str) -> Result<Self, DropboxError> {
        Ok(Self {
            http: Client::new(),
            api_url: Url::parse(api_url)?,
            content_url: Url::parse(content_url)?,
        })
    }

    pub async fn get_current_account(&self, token: &str) -> Result<Account, DropboxError> {
        let url = self.api_url.join("/2/users/get_current_account")?;
        let response = self.http.post(url).bearer_auth(token).send().await?;
        Self::handle_response(response).await
    }

    pub async fn list_folder(
        &self,
        token: &str,
        path: &str,
        limit: Option<u32>,
    ) -> Result<ListFolderResult, DropboxError> {
        let url = self.api_url.join("/2/files/list_folder")?;
        let arg = ListFolderArg {
            path,
            recursive: false,
            limit,
        };
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&arg)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn list_folder_continue(
        &self,
        token: &str,
        cursor: &str,
    ) -> Result<ListFolderResult, DropboxError> {
        let url = self.api_url.join("/2/files/list_folder/continue")?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&ListFolderContinueArg { cursor })
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Starts a download and hands back the open body. Non-success statuses
    /// are reported as [`DropboxError::Api`] before any body is read.
    pub async fn download(&self, token: &str, path: &str) -> Result<Download, DropboxError> {
        let url = self.content_url.join("/2/files/download")?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(API_ARG_HEADER, api_arg_header(path)?)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(Download { response })
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DropboxError> {
        let response = Self::check_status(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DropboxError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(DropboxError::Api {
            status,
            body,
            retry_after,
        })
    }
}

/// Body of an in-flight `files/download` call.
pub struct Download {
    response: reqwest::Response,
}

impl Download {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Next chunk of the body, `None` once it is fully received.
    pub async fn chunk(&mut self) -> Result<Option<bytes::Bytes>, DropboxError> {
        Ok(self.response.chunk().await?)
    }
}

impl DropboxError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DropboxError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DropboxError::Api { status, .. } => Some(*status),
            DropboxError::Request(err) => err.status(),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DropboxError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.classification(), Some(ApiErrorClass::Auth))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            DropboxError::Request(err) => err.is_timeout() || err.is_connect(),
            _ => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if status == StatusCode::UNAUTHORIZED {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(SystemTime::now()).unwrap_or_default())
}

/// Dropbox requires the JSON argument header to be ASCII-only; everything
/// outside that range is sent as `\uXXXX` escapes.
pub fn api_arg_header(path: &str) -> Result<String, DropboxError> {
    let json = serde_json::to_string(&PathArg { path })?;
    let mut out = String::with_capacity(json.len());
    for ch in json.chars() {
        if ch.is_ascii() && ch != '\u{7f}' {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    Ok(out)
}

#[derive(Serialize)]
struct PathArg<'a> {
    path: &'a str,
}

#[derive(Serialize)]
struct ListFolderArg<'a> {
    path: &'a str,
    recursive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

#[derive(Serialize)]
struct ListFolderContinueArg<'a> {
    cursor: &'a str,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Account {
    pub account_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ListFolderResult {
    pub entries: Vec<Metadata>,
    pub cursor: String,
    pub has_more: bool,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = ".tag", rename_all = "lowercase")]
pub enum Metadata {
    File(FileMetadata),
    Folder(FolderMetadata),
    #[serde(other)]
    Other,
}

impl Metadata {
    /// Display path, falling back to the lower-cased one.
    pub fn path(&self) -> Option<&str> {
        let (display, lower) = match self {
            Metadata::File(file) => (&file.path_display, &file.path_lower),
            Metadata::Folder(folder) => (&folder.path_display, &folder.path_lower),
            Metadata::Other => return None,
        };
        display.as_deref().or(lower.as_deref())
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    #[serde(default)]
    pub path_display: Option<String>,
    #[serde(default)]
    pub path_lower: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub server_modified: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct FolderMetadata {
    pub name: String,
    #[serde(default)]
    pub path_display: Option<String>,
    #[serde(default)]
    pub path_lower: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}
