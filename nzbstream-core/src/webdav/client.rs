//! WebDAV `PROPFIND` client.

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::{Method, StatusCode};
use tracing::trace;

use super::{DirEntry, RemoteFilesystem, WebDavError, normalize_path, remote_url};
use crate::config::WebDavConfig;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:getcontentlength/>
  </d:prop>
</d:propfind>"#;

/// Lists directories on the backend's WebDAV share.
pub struct WebDavClient {
    base_url: String,
    base_path: String,
    username: Option<String>,
    password: Option<String>,
    client: reqwest::Client,
}

impl WebDavClient {
    /// # Errors
    /// - `WebDavError::Parse` - Base URL is not a valid URL
    /// - `WebDavError::Request` - HTTP client could not be constructed
    pub fn new(config: &WebDavConfig) -> Result<Self, WebDavError> {
        let parsed = url::Url::parse(&config.url).map_err(|e| WebDavError::Parse {
            reason: format!("invalid WebDAV URL '{}': {e}", config.url),
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            base_path: normalize_path(parsed.path()),
            username: config.username.clone(),
            password: config.password.clone(),
            client,
        })
    }

    /// Absolute URL of a remote path, each segment percent-encoded.
    pub fn url_for(&self, path: &str) -> String {
        remote_url(&self.base_url, path)
    }

    fn server_path(&self, path: &str) -> String {
        if self.base_path == "/" {
            normalize_path(path)
        } else {
            normalize_path(&format!("{}/{}", self.base_path, path.trim_matches('/')))
        }
    }
}

#[async_trait]
impl RemoteFilesystem for WebDavClient {
    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, WebDavError> {
        let method = Method::from_bytes(b"PROPFIND").map_err(|e| WebDavError::Parse {
            reason: e.to_string(),
        })?;
        let url = format!("{}/", self.url_for(path).trim_end_matches('/'));

        let mut request = self
            .client
            .request(method, &url)
            .header("Depth", "1")
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(PROPFIND_BODY);
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_ref());
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(WebDavError::NotFound {
                    path: path.to_string(),
                });
            }
            status if !status.is_success() => {
                return Err(WebDavError::Status {
                    status: status.as_u16(),
                    path: path.to_string(),
                });
            }
            _ => {}
        }

        let body = response.bytes().await?;
        let entries = parse_multistatus(&body, &self.server_path(path))?;
        trace!("Listed {} entries under {}", entries.len(), path);
        Ok(entries)
    }
}

#[derive(Default)]
struct ResponseBuilder {
    href: Option<String>,
    size: u64,
    is_collection: bool,
}

/// Parses a `207 Multi-Status` body into the children of `listed_path`.
///
/// The entry describing `listed_path` itself is dropped.
pub fn parse_multistatus(xml: &[u8], listed_path: &str) -> Result<Vec<DirEntry>, WebDavError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let listed_path = normalize_path(listed_path);
    let mut entries = Vec::new();
    let mut buf = Vec::new();
    let mut current: Option<ResponseBuilder> = None;
    let mut current_element = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                match name.as_slice() {
                    b"response" => current = Some(ResponseBuilder::default()),
                    b"collection" => {
                        if let Some(builder) = current.as_mut() {
                            builder.is_collection = true;
                        }
                    }
                    _ => {}
                }
                current_element = name;
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"collection" {
                    if let Some(builder) = current.as_mut() {
                        builder.is_collection = true;
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(builder) = current.as_mut() {
                    let text = e.unescape().unwrap_or_default();
                    match current_element.as_slice() {
                        b"href" => builder.href = Some(text.into_owned()),
                        b"getcontentlength" => builder.size = text.trim().parse().unwrap_or(0),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"response" {
                    if let Some(entry) = current.take().and_then(|b| finish_entry(b, &listed_path))
                    {
                        entries.push(entry);
                    }
                }
                current_element.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(WebDavError::Parse {
                    reason: format!("XML parse error: {e}"),
                });
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

fn finish_entry(builder: ResponseBuilder, listed_path: &str) -> Option<DirEntry> {
    let href = builder.href?;
    let path = href_path(&href);
    if path == listed_path {
        return None;
    }

    let name = path.rsplit('/').next().filter(|n| !n.is_empty())?.to_string();
    Some(DirEntry {
        name,
        size: if builder.is_collection { 0 } else { builder.size },
        is_directory: builder.is_collection,
    })
}

/// Decoded, normalized path of an href that may be absolute or server-relative.
fn href_path(href: &str) -> String {
    let raw = match url::Url::parse(href) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => href.to_string(),
    };
    let decoded = urlencoding::decode(&raw)
        .map(|d| d.into_owned())
        .unwrap_or(raw);
    normalize_path(&decoded)
}
