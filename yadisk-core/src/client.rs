use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://cloud-api.yandex.net";
const RESOURCES: &str = "/v1/disk/resources";

/// Path of the Disk root as the API reports it.
pub const DISK_ROOT: &str = "disk:/";

/// Fields requested when only the identity of a resource matters.
const STAT_FIELDS: &str = "path,name,type,md5";
/// Fields requested per listed child.
const LIST_FIELDS: &str = "_embedded.items.path,_embedded.items.name,_embedded.items.type,\
_embedded.items.md5,_embedded.items.size,_embedded.limit,_embedded.offset,_embedded.total";

#[derive(Debug, Error)]
pub enum YadiskError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("disk api answered {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("listing response carries no _embedded section")]
    MissingEmbedded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    NotFound,
    RateLimit,
    Transient,
    Permanent,
}

impl YadiskError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        let YadiskError::Api { status, .. } = self else {
            return None;
        };
        Some(match status.as_u16() {
            401 | 403 => ApiErrorClass::Auth,
            404 => ApiErrorClass::NotFound,
            429 => ApiErrorClass::RateLimit,
            408 | 409 | 425 | 500..=599 => ApiErrorClass::Transient,
            _ => ApiErrorClass::Permanent,
        })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.classification() == Some(ApiErrorClass::NotFound)
    }

    /// The service could not be reached at all (as opposed to answering
    /// with an error status).
    pub fn is_connectivity(&self) -> bool {
        matches!(self, YadiskError::Request(err) if err.is_connect() || err.is_timeout())
    }
}

/// Authenticated access to the Disk REST API. Paths are `disk:/…`.
#[derive(Clone)]
pub struct YadiskClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl YadiskClient {
    pub fn new(token: impl Into<String>) -> Result<Self, YadiskError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, YadiskError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Quota summary; also serves as the connectivity and token probe.
    pub async fn disk_info(&self) -> Result<DiskInfo, YadiskError> {
        self.call(Method::GET, "/v1/disk", &[]).await
    }

    /// Metadata of one resource, without its children.
    pub async fn stat(&self, path: &str) -> Result<Resource, YadiskError> {
        self.call(
            Method::GET,
            RESOURCES,
            &[("path", path), ("limit", "0"), ("fields", STAT_FIELDS)],
        )
        .await
    }

    /// One page of the children of `path`.
    pub async fn list_page(
        &self,
        path: &str,
        offset: u32,
        limit: u32,
    ) -> Result<ResourceList, YadiskError> {
        let (offset, limit) = (offset.to_string(), limit.to_string());
        let page: Listing = self
            .call(
                Method::GET,
                RESOURCES,
                &[
                    ("path", path),
                    ("offset", offset.as_str()),
                    ("limit", limit.as_str()),
                    ("fields", LIST_FIELDS),
                ],
            )
            .await?;
        page.embedded.ok_or(YadiskError::MissingEmbedded)
    }

    /// Every child of `path`, following `offset` page by page.
    pub async fn list_all(&self, path: &str, page_size: u32) -> Result<Vec<Resource>, YadiskError> {
        let page_size = page_size.max(1);
        let mut children = Vec::new();
        loop {
            let page = self
                .list_page(path, children.len() as u32, page_size)
                .await?;
            let exhausted = page.items.is_empty();
            children.extend(page.items);
            if exhausted || children.len() as u32 >= page.total {
                return Ok(children);
            }
        }
    }

    /// Creates one folder; the parent must exist.
    pub async fn make_folder(&self, path: &str) -> Result<Link, YadiskError> {
        self.call(Method::PUT, RESOURCES, &[("path", path)]).await
    }

    /// `None` when the API deleted synchronously (204); otherwise the
    /// operation to poll (202).
    pub async fn remove(&self, path: &str, permanently: bool) -> Result<Option<Link>, YadiskError> {
        let permanently = if permanently { "true" } else { "false" };
        let url = self.url(RESOURCES, &[("path", path), ("permanently", permanently)])?;
        let response = self.send(Method::DELETE, url).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }

    pub async fn operation_status(&self, href: &str) -> Result<OperationStatus, YadiskError> {
        let response = self.send(Method::GET, Url::parse(href)?).await?;
        let operation: Operation = decode(response).await?;
        Ok(operation.status)
    }

    pub async fn download_link(&self, path: &str) -> Result<Link, YadiskError> {
        self.call(Method::GET, "/v1/disk/resources/download", &[("path", path)])
            .await
    }

    pub async fn upload_link(&self, path: &str, overwrite: bool) -> Result<Link, YadiskError> {
        let overwrite = if overwrite { "true" } else { "false" };
        self.call(
            Method::GET,
            "/v1/disk/resources/upload",
            &[("path", path), ("overwrite", overwrite)],
        )
        .await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, YadiskError> {
        let url = self.url(endpoint, query)?;
        decode(self.send(method, url).await?).await
    }

    fn url(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Url, YadiskError> {
        let mut url = self.base_url.join(endpoint)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url) -> Result<Response, YadiskError> {
        Ok(self
            .http
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, format!("OAuth {}", self.token))
            .send()
            .await?)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, YadiskError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(YadiskError::Api { status, body });
    }
    Ok(response.json().await?)
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskInfo {
    pub total_space: u64,
    pub used_space: u64,
    #[serde(default)]
    pub trash_size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Resource {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub size: Option<u64>,
    /// Hex md5; files only.
    #[serde(default)]
    pub md5: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationStatus {
    Success,
    Failure,
    InProgress,
}

#[derive(Debug, Deserialize)]
pub struct ResourceList {
    pub items: Vec<Resource>,
    pub limit: u32,
    pub offset: u32,
    pub total: u32,
}

#[derive(Deserialize)]
struct Listing {
    #[serde(rename = "_embedded")]
    embedded: Option<ResourceList>,
}

#[derive(Deserialize)]
struct Operation {
    status: OperationStatus,
}

/// Hypermedia link handed out for transfers, folder creation and
/// background operations.
#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: Url,
    pub method: String,
    #[serde(default)]
    pub templated: bool,
}
