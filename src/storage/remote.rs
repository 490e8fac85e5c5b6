//! HTTP access to remote resources
//!
//! Covers endpoint hashing, downloads into the staging area and proxying of
//! remote bytes. Failures are classified into client facing error kinds.

use reqwest::{redirect, Client, Response, StatusCode, Url};
use std::fs::{self, File};
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::archive::is_zip;
use super::content_filter::ContentFilter;
use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::models::{TestObject, PROP_PASSWORD, PROP_USERNAME};
use crate::utils::sanitize_file_name;

/// Item hash used when an endpoint answers a plain request with 400
pub const BAD_REQUEST_SENTINEL_HASH: &str = "0000000000000400";

const MAX_REDIRECTS: usize = 10;

/// Basic auth credentials taken from object properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn from_properties(object: &TestObject) -> Option<Self> {
        let username = object.property(PROP_USERNAME).filter(|u| !u.is_empty())?;
        Some(Self {
            username: username.to_string(),
            password: object.property(PROP_PASSWORD).unwrap_or_default().to_string(),
        })
    }
}

/// Whether an address lies in a private, loopback, link-local or otherwise
/// non-public range.
pub fn is_private_address(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_v4(mapped);
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // unique local
                || (first & 0xffc0) == 0xfe80 // link-local
        }
    }
}

fn is_private_v4(v4: Ipv4Addr) -> bool {
    let [a, b, ..] = v4.octets();
    v4.is_private()
        || v4.is_loopback()
        || v4.is_link_local()
        || v4.is_unspecified()
        || v4.is_broadcast()
        || (a == 100 && (64..128).contains(&b)) // carrier-grade NAT
}

/// Map a non-success status to an error; `Ok` for success codes.
pub fn classify_status(status: StatusCode, url: &Url) -> IngestResult<()> {
    let code = status.as_u16();
    match code {
        _ if status.is_success() => Ok(()),
        401 | 403 => Err(IngestError::RemoteAuthRequired {
            host: url.host_str().unwrap_or_default().to_string(),
        }),
        400..=499 => Err(IngestError::RemoteClientError { status: code }),
        _ => Err(IngestError::RemoteServerError { status: code }),
    }
}

fn invalid_url(url: &Url, reason: impl ToString) -> IngestError {
    IngestError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

/// Result of a download into a staging directory
#[derive(Debug, Clone)]
pub struct Download {
    pub path: PathBuf,
    pub content_type: Option<String>,
    pub size: u64,
}

/// HTTP client for remote resources
#[derive(Debug, Clone)]
pub struct RemoteClient {
    client: Client,
    allow_private_net_access: bool,
    max_object_size: u64,
}

impl RemoteClient {
    pub fn new(config: &IngestConfig) -> IngestResult<Self> {
        // Redirects are followed in `get`, so that every hop is checked
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| IngestError::Storage(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            allow_private_net_access: config.allow_private_net_access,
            max_object_size: config.max_object_size,
        })
    }

    /// Resolve the host of `url` and apply the private network policy.
    pub async fn check_host(&self, url: &Url) -> IngestResult<()> {
        let host = url
            .host_str()
            .ok_or_else(|| invalid_url(url, "missing host"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid_url(url, "missing port"))?;
        // Url keeps IPv6 literals in brackets
        let lookup_host = host.trim_start_matches('[').trim_end_matches(']');

        let addrs: Vec<_> = tokio::net::lookup_host((lookup_host, port))
            .await
            .map_err(|_| IngestError::UnknownHost {
                host: host.to_string(),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(IngestError::UnknownHost {
                host: host.to_string(),
            });
        }

        if !self.allow_private_net_access && addrs.iter().any(|a| is_private_address(a.ip())) {
            log::warn!("Rejected access to private network address of {}", host);
            return Err(IngestError::RemoteAccessDenied {
                host: host.to_string(),
            });
        }
        Ok(())
    }

    /// GET `url`, following redirects. Credentials are only sent to the
    /// host of the original URL.
    async fn get(&self, url: &Url, credentials: Option<&Credentials>) -> IngestResult<Response> {
        let mut current = url.clone();
        for _ in 0..=MAX_REDIRECTS {
            self.check_host(&current).await?;

            let mut request = self.client.get(current.clone());
            if let Some(c) = credentials.filter(|_| current.host_str() == url.host_str()) {
                request = request.basic_auth(&c.username, Some(&c.password));
            }
            let response = request.send().await.map_err(|e| invalid_url(&current, e))?;
            if !response.status().is_redirection() {
                return Ok(response);
            }

            let Some(location) = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
            else {
                return Ok(response);
            };
            let next = current
                .join(location)
                .map_err(|e| invalid_url(&current, e))?;
            log::debug!("Following redirect {} -> {}", current, next);
            current = next;
        }
        Err(invalid_url(url, "too many redirects"))
    }

    /// Fingerprint the content behind a service endpoint.
    ///
    /// A 400 answer yields [`BAD_REQUEST_SENTINEL_HASH`]; endpoints such as
    /// OGC services reject requests without parameters this way.
    pub async fn hash_from_content(
        &self,
        url: &Url,
        credentials: Option<&Credentials>,
    ) -> IngestResult<String> {
        let mut response = self.get(url, credentials).await?;
        if response.status() == StatusCode::BAD_REQUEST {
            log::debug!("{} answered 400, using sentinel hash", url);
            return Ok(BAD_REQUEST_SENTINEL_HASH.to_string());
        }
        classify_status(response.status(), url)?;

        let mut hasher = blake3::Hasher::new();
        let mut total = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| invalid_url(url, e))? {
            total += chunk.len() as u64;
            if total > self.max_object_size {
                return Err(IngestError::QuotaExceeded {
                    limit: self.max_object_size,
                });
            }
            hasher.update(&chunk);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }

    /// Download `url` into `dir`, bounded by the object size limit.
    ///
    /// The file is named after the last URL segment. A name without a known
    /// extension gets `.xml` appended when the content type is XML.
    pub async fn download(
        &self,
        url: &Url,
        credentials: Option<&Credentials>,
        dir: &Path,
        filter: &ContentFilter,
    ) -> IngestResult<Download> {
        let mut response = self.get(url, credentials).await?;
        classify_status(response.status(), url)?;

        if let Some(len) = response.content_length() {
            if len > self.max_object_size {
                return Err(IngestError::QuotaExceeded {
                    limit: self.max_object_size,
                });
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let file_name = download_file_name(response.url(), content_type.as_deref(), filter);

        fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        let mut file = File::create(&path)?;
        let mut size = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| invalid_url(url, e))? {
            size += chunk.len() as u64;
            if size > self.max_object_size {
                drop(file);
                let _ = fs::remove_file(&path);
                return Err(IngestError::QuotaExceeded {
                    limit: self.max_object_size,
                });
            }
            file.write_all(&chunk)?;
        }
        file.flush()?;

        log::info!("Downloaded {} ({} bytes) to {:?}", url, size, path);
        Ok(Download {
            path,
            content_type,
            size,
        })
    }

    /// Copy the bytes behind `url` into `out`.
    pub async fn stream_to<W: Write>(
        &self,
        url: &Url,
        credentials: Option<&Credentials>,
        out: &mut W,
    ) -> IngestResult<u64> {
        let mut response = self.get(url, credentials).await?;
        classify_status(response.status(), url)?;

        let mut total = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| invalid_url(url, e))? {
            total += chunk.len() as u64;
            out.write_all(&chunk)?;
        }
        out.flush()?;
        Ok(total)
    }
}

fn download_file_name(url: &Url, content_type: Option<&str>, filter: &ContentFilter) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map(sanitize_file_name);

    match segment {
        Some(name) if filter.accepts_extension(&name) || is_zip(&name, None) => name,
        Some(name) if filter.accepts_content_type(content_type) => format!("{}.xml", name),
        Some(name) if is_zip(&name, content_type) => format!("{}.zip", name),
        Some(name) => name,
        None if is_zip("", content_type) => "resource.zip".to_string(),
        None => "resource.xml".to_string(),
    }
}
